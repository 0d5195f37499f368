//! Upcall adapter: translates `fuser::Filesystem` calls into
//! [`Engine`] calls and [`Engine`] errors into negative-errno replies.
//!
//! Every file (including the root) is addressed by `fuser` through an
//! inode number; the engine itself only knows names. `ino = block_index
//! + 1` for a live file, `ROOT_INO` (`1`) for the synthetic root
//! directory — block index 0 is the superblock and is never handed
//! back to `fuser` as a file inode, so the two namespaces never
//! collide.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{error, warn};

use crate::engine::{Attr, Engine};
use crate::param::MAX_NAME_LEN;

pub const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::from_secs(1);

pub struct AofsFilesystem {
    engine: Arc<Engine>,
}

impl AofsFilesystem {
    pub fn new(engine: Arc<Engine>) -> Self {
        AofsFilesystem { engine }
    }

    fn lookup_name(&self, ino: u64) -> Option<String> {
        if ino == ROOT_INO {
            Some(String::new())
        } else {
            self.engine.name_at_ino(ino)
        }
    }

    fn file_attr(ino: u64, attr: Attr) -> FileAttr {
        let kind = if attr.mode & crate::engine::S_IFDIR != 0 {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        FileAttr {
            ino,
            size: attr.size,
            blocks: 1,
            atime: secs_to_time(attr.time_accessed),
            mtime: secs_to_time(attr.time_updated),
            ctime: secs_to_time(attr.time_updated),
            crtime: secs_to_time(attr.time_created),
            kind,
            perm: (attr.mode & 0o7777) as u16,
            nlink: attr.nlink,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: crate::param::BLOCK_SIZE as u32,
            flags: 0,
        }
    }
}

fn secs_to_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

fn time_or_now_to_secs(t: Option<TimeOrNow>) -> Option<u64> {
    t.map(|t| match t {
        TimeOrNow::SpecificTime(t) => {
            t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
        }
        TimeOrNow::Now => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    })
}

impl Filesystem for AofsFilesystem {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.getattr(name) {
            Ok(attr) => {
                let ino = self.engine.ino_of(name).unwrap_or(ROOT_INO);
                reply.entry(&TTL, &Self::file_attr(ino, attr), 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(name) = self.lookup_name(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.getattr(&name) {
            Ok(attr) => reply.attr(&TTL, &Self::file_attr(ino, attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }
        let mut entries = vec![(ROOT_INO, FileType::Directory, ".".to_string())];
        entries.push((ROOT_INO, FileType::Directory, "..".to_string()));
        for name in self.engine.readdir() {
            let ino = self.engine.ino_of(&name).unwrap_or(ROOT_INO);
            entries.push((ino, FileType::RegularFile, name));
        }
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(name) = self.lookup_name(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.open(&name, flags) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENAMETOOLONG);
            return;
        };
        if name.len() > MAX_NAME_LEN {
            reply.error(libc::ENAMETOOLONG);
            return;
        }
        match self.engine.create(name, mode) {
            Ok(attr) => {
                let ino = self.engine.ino_of(name).unwrap_or(ROOT_INO);
                reply.created(&TTL, &Self::file_attr(ino, attr), 0, 0, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(name) = self.lookup_name(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.read(&name, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(name) = self.lookup_name(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.write(&name, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.unlink(name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(name) = self.lookup_name(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if size.is_some() {
            if let Err(e) = self.engine.truncate(&name) {
                reply.error(e.to_errno());
                return;
            }
        }

        let atime = time_or_now_to_secs(atime);
        let mtime = time_or_now_to_secs(mtime);
        match self.engine.utimens(&name, atime, mtime) {
            Ok(attr) => reply.attr(&TTL, &Self::file_attr(ino, attr)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    /// Trivial by design: accepted unconditionally, no block allocated.
    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        _name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        if let Err(e) = self.engine.mknod() {
            reply.error(e.to_errno());
            return;
        }
        let placeholder = Attr {
            mode: mode | crate::engine::S_IFREG,
            nlink: 1,
            size: 0,
            time_accessed: 0,
            time_updated: 0,
            time_created: 0,
        };
        reply.entry(&TTL, &Self::file_attr(parent, placeholder), 0);
    }

    /// Trivial by design: accepted, no side effects.
    fn access(&mut self, _req: &Request, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        let _ = self.engine.access();
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        let (blocks, free_blocks, bsize) = self.engine.statfs();
        reply.statfs(
            blocks,
            free_blocks,
            free_blocks,
            0,
            0,
            bsize,
            MAX_NAME_LEN as u32,
            bsize,
        );
    }

    fn destroy(&mut self) {
        warn!("unmounting");
    }
}

/// Mount-time error surfaced from [`fuser::mount2`], kept distinct from
/// [`crate::error::AofsError`] because it never reaches a FUSE reply.
pub fn log_mount_error(err: &std::io::Error) {
    error!("mount failed: {err}");
}
