use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use aofs::{AofsFilesystem, Engine};

/// Mount a single-container-file filesystem over FUSE.
#[derive(Parser, Debug)]
#[command(name = "aofs", version, about)]
struct Args {
    /// Path to the container file; created if it doesn't exist.
    container: PathBuf,

    /// Directory to mount the filesystem at.
    mountpoint: PathBuf,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let engine = match Engine::open_container(&args.container) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!("{}: {e}", args.container.display());
            return ExitCode::FAILURE;
        }
    };

    let options = vec![
        fuser::MountOption::FSName("aofs".to_string()),
        fuser::MountOption::AutoUnmount,
    ];
    let fs = AofsFilesystem::new(engine);
    if let Err(e) = fuser::mount2(fs, &args.mountpoint, &options) {
        aofs::fuse_adapter::log_mount_error(&e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
