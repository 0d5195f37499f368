//! End-to-end scenarios against a real temporary container file, driving
//! `Engine` directly rather than through a FUSE mount (the
//! `fuser::Filesystem` impl is a thin, separately-reasoned-about shim
//! over this layer).

use aofs::{AofsError, Engine};
use tempfile::tempdir;

fn open_fresh() -> (tempfile::TempDir, Engine) {
    let dir = tempdir().unwrap();
    let engine = Engine::open_container(&dir.path().join("container.img")).unwrap();
    (dir, engine)
}

#[test]
fn s1_fresh_mount_create_getattr_readdir() {
    let (_dir, engine) = open_fresh();
    engine.create("a", 0o644).unwrap();

    let attr = engine.getattr("a").unwrap();
    assert_eq!(attr.size, 0);
    assert_eq!(attr.mode & 0o777, 0o644);

    let mut names = engine.readdir();
    names.sort();
    assert_eq!(names, vec!["a".to_string()]);
}

#[test]
fn s2_write_read_round_trip() {
    let (_dir, engine) = open_fresh();
    engine.create("b", 0o644).unwrap();
    engine.write("b", b"Hello World!").unwrap();

    let out = engine.read("b", 0, 12).unwrap();
    assert_eq!(out, b"Hello World!");
    assert_eq!(engine.getattr("b").unwrap().size, 12);
}

#[test]
fn s3_large_write_chains_a_continuation_block() {
    let (_dir, engine) = open_fresh();
    engine.create("big", 0o644).unwrap();
    let payload = vec![b'A'; 5500];
    engine.write("big", &payload).unwrap();

    let out = engine.read("big", 0, 5500).unwrap();
    assert_eq!(out.len(), 5500);
    assert!(out.iter().all(|&b| b == b'A'));
    assert_eq!(engine.getattr("big").unwrap().size, 5500);

    let (total, free, _bsize) = engine.statfs();
    // superblock + head + continuation are the only occupied blocks.
    assert_eq!(total - free, 3);
}

#[test]
fn s4_unlink_frees_both_blocks_of_a_chained_file() {
    let (_dir, engine) = open_fresh();
    engine.create("big", 0o644).unwrap();
    engine.write("big", &vec![b'A'; 5500]).unwrap();

    let (_total, free_before, _) = engine.statfs();
    engine.unlink("big").unwrap();
    let (_total, free_after, _) = engine.statfs();

    assert_eq!(free_after, free_before + 2);
    assert!(matches!(
        engine.getattr("big").unwrap_err(),
        AofsError::NoSuchEntry
    ));
}

#[test]
fn s5_exhausting_every_data_block_reports_no_space() {
    let (_dir, engine) = open_fresh();
    // Block 0 is the superblock; 255 data blocks remain.
    for i in 0..255 {
        engine.create(&format!("f{i}"), 0o644).unwrap();
    }
    let err = engine.create("overflow", 0o644).unwrap_err();
    assert!(matches!(err, AofsError::NoSpace));
}

#[test]
fn s6_contents_survive_close_and_reopen_of_the_container() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("container.img");
    {
        let engine = Engine::open_container(&path).unwrap();
        engine.create("b", 0o644).unwrap();
        engine.write("b", b"Hello World!").unwrap();
    }
    let engine = Engine::open_container(&path).unwrap();
    assert_eq!(engine.read("b", 0, 12).unwrap(), b"Hello World!");
    let mut names = engine.readdir();
    names.sort();
    assert_eq!(names, vec!["b".to_string()]);
}

#[test]
fn open_for_write_is_denied_on_a_read_only_file() {
    let (_dir, engine) = open_fresh();
    engine.create("ro", 0o444).unwrap();
    let err = engine.open("ro", libc::O_WRONLY).unwrap_err();
    assert!(matches!(err, AofsError::AccessDenied));
    engine.open("ro", libc::O_RDONLY).unwrap();
}

#[test]
fn name_longer_than_twenty_three_bytes_is_rejected() {
    let (_dir, engine) = open_fresh();
    let long_name = "a".repeat(24);
    let err = engine.create(&long_name, 0o644).unwrap_err();
    assert!(matches!(err, AofsError::NameTooLong));
}

#[test]
fn reopening_a_container_that_fails_the_magic_check_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("container.img");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();
    let err = Engine::open_container(&path).unwrap_err();
    assert!(matches!(err, AofsError::BadMagic));
}
