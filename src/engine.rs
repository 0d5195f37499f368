//! Filesystem engine: the operations consumed by the upcall adapter.
//! Every method takes the already-stripped, single-component name the
//! adapter derived from a path (`""` denotes the root).
//!
//! All state lives behind one [`Mutex`]: every public method locks at
//! entry and is done with the container by the time it returns. No
//! method suspends while holding a reference into another.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use arrayvec::ArrayString;
use log::debug;

use crate::bitmap::Bitmap;
use crate::container::Container;
use crate::error::AofsError;
use crate::flags::OpenFlags;
use crate::index::MetadataIndex;
use crate::layout::BlockMeta;
use crate::param::{BLOCKS, BLOCK_SIZE, MAX_FILE_SIZE, MAX_NAME_LEN, PAYLOAD};

/// Regular-file type bit, as stored in `mode` (`S_IFREG`).
pub const S_IFREG: u32 = libc::S_IFREG as u32;
/// Directory type bit, for the synthetic root.
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;

/// What `getattr`/`create`/`utimens` hand back to the upcall adapter.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub time_accessed: u64,
    pub time_updated: u64,
    pub time_created: u64,
}

impl Attr {
    pub fn root() -> Self {
        Attr {
            mode: S_IFDIR | 0o755,
            nlink: 2,
            size: 0,
            time_accessed: 0,
            time_updated: 0,
            time_created: 0,
        }
    }

    fn from_slot(slot: &BlockMeta) -> Self {
        Attr {
            mode: slot.mode,
            nlink: 1,
            size: slot.file_size as u64,
            time_accessed: slot.time_accessed,
            time_updated: slot.time_updated,
            time_created: slot.time_created,
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs()
}

struct EngineState {
    container: Container,
    bitmap: Bitmap,
    index: MetadataIndex,
}

pub struct Engine {
    state: Mutex<EngineState>,
}

impl Engine {
    pub fn open_container(path: &Path) -> Result<Self, AofsError> {
        let (container, bitmap, index) = Container::open(path)?;
        Ok(Engine {
            state: Mutex::new(EngineState {
                container,
                bitmap,
                index,
            }),
        })
    }

    fn validate_name(name: &str) -> Result<(), AofsError> {
        if name.len() > MAX_NAME_LEN {
            return Err(AofsError::NameTooLong);
        }
        Ok(())
    }

    pub fn getattr(&self, name: &str) -> Result<Attr, AofsError> {
        if name.is_empty() {
            return Ok(Attr::root());
        }
        let state = self.state.lock().unwrap();
        let k = state.index.lookup(name).ok_or(AofsError::NoSuchEntry)?;
        Ok(Attr::from_slot(state.index.get(k)))
    }

    /// File names in the single root directory, head blocks only.
    pub fn readdir(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .index
            .iter_files()
            .map(|(_, slot)| slot.file_name.to_string())
            .collect()
    }

    pub fn open(&self, name: &str, flags: i32) -> Result<(), AofsError> {
        let mut state = self.state.lock().unwrap();
        let k = state.index.lookup(name).ok_or(AofsError::NoSuchEntry)?;
        let mut record = state.index.get(k).clone();

        if OpenFlags::access_mode(flags).wants_write() && record.mode & 0o200 == 0 {
            return Err(AofsError::AccessDenied);
        }

        record.time_accessed = now();
        state.container.write_meta_region(k, &record)?;
        state.index.slot_update(k, record);
        Ok(())
    }

    pub fn create(&self, name: &str, mode: u32) -> Result<Attr, AofsError> {
        Self::validate_name(name)?;
        let mut state = self.state.lock().unwrap();
        if state.index.lookup(name).is_some() {
            return Err(AofsError::AlreadyExists);
        }
        let k = state.bitmap.find_free().ok_or(AofsError::NoSpace)?;

        let created_at = now();
        let record = BlockMeta {
            file_name: ArrayString::<MAX_NAME_LEN>::from(name)
                .expect("validate_name already bounded this"),
            file_size: 0,
            block_index: k as u32,
            next_block: 0,
            mode: mode | S_IFREG,
            time_created: created_at,
            time_updated: 0,
            time_accessed: created_at,
        };

        state.container.write_meta_region(k, &record)?;
        state.bitmap.mark_used(k);
        state.container.persist_bitmap(&state.bitmap)?;
        state.index.slot_update(k, record.clone());

        debug!("create: {name:?} at block {k}");
        Ok(Attr::from_slot(&record))
    }

    /// Replace the file's entire contents with `buf`. Offset is
    /// ignored; a write always replaces the file wholesale.
    pub fn write(&self, name: &str, buf: &[u8]) -> Result<u32, AofsError> {
        if buf.len() > MAX_FILE_SIZE {
            return Err(AofsError::NoSpace);
        }
        let mut state = self.state.lock().unwrap();
        let k = state.index.lookup(name).ok_or(AofsError::NoSuchEntry)?;
        let mut record = state.index.get(k).clone();
        let previous_continuation = record.next_block;

        let mut bitmap_dirty = false;

        if buf.len() <= PAYLOAD {
            state.container.write_payload(k, buf)?;
            record.file_size = buf.len() as u32;
            record.next_block = 0;
        } else {
            let (first, rest) = buf.split_at(PAYLOAD);
            // Reuse the existing continuation block if the previous
            // write already chained one, else allocate a fresh one.
            let k2 = if previous_continuation != 0 {
                previous_continuation as usize
            } else {
                state.bitmap.find_free().ok_or(AofsError::NoSpace)?
            };
            state.container.write_payload(k, first)?;
            state.container.write_payload(k2, rest)?;
            state.container.zero_meta_region(k2)?;
            if previous_continuation == 0 {
                state.bitmap.mark_used(k2);
                bitmap_dirty = true;
            }
            record.file_size = buf.len() as u32;
            record.next_block = k2 as u32;
        }

        if previous_continuation != 0 && record.next_block == 0 {
            // Overwritten with a short buffer: release the stale tail.
            let stale = previous_continuation as usize;
            state.container.zero_meta_region(stale)?;
            state.container.zero_payload_prefix(stale, PAYLOAD)?;
            state.bitmap.mark_free(stale);
            bitmap_dirty = true;
        }

        // Flush order: payload writes, then the head block's own
        // metadata-region write, then the bitmap write.
        record.time_updated = now();
        record.time_accessed = now();
        state.container.write_meta_region(k, &record)?;
        state.index.slot_update(k, record);

        if bitmap_dirty {
            state.container.persist_bitmap(&state.bitmap)?;
        }

        Ok(buf.len() as u32)
    }

    pub fn read(&self, name: &str, offset: i64, size: u32) -> Result<Vec<u8>, AofsError> {
        let mut state = self.state.lock().unwrap();
        let k = state.index.lookup(name).ok_or(AofsError::NoSuchEntry)?;
        let mut record = state.index.get(k).clone();
        let file_size = record.file_size as usize;
        let offset = offset.max(0) as usize;

        if offset >= file_size {
            return Ok(Vec::new());
        }
        let want = (size as usize).min(file_size - offset);

        let mut out = Vec::with_capacity(want);
        if record.next_block == 0 {
            let chunk = state.container.read_payload(k, file_size)?;
            out.extend_from_slice(&chunk[offset..offset + want]);
        } else {
            let head = state.container.read_payload(k, PAYLOAD)?;
            let tail_len = file_size - PAYLOAD;
            let tail = state.container.read_payload(record.next_block as usize, tail_len)?;
            let whole: Vec<u8> = head.into_iter().chain(tail).collect();
            out.extend_from_slice(&whole[offset..offset + want]);
        }

        record.time_accessed = now();
        state.container.write_meta_region(k, &record)?;
        state.index.slot_update(k, record);
        Ok(out)
    }

    pub fn unlink(&self, name: &str) -> Result<(), AofsError> {
        let mut state = self.state.lock().unwrap();
        let k = state.index.lookup(name).ok_or(AofsError::NoSuchEntry)?;
        let record = state.index.get(k).clone();

        if record.next_block != 0 {
            let k2 = record.next_block as usize;
            state.container.zero_meta_region(k)?;
            state.container.zero_payload_prefix(k, PAYLOAD)?;
            state.container.zero_meta_region(k2)?;
            state.container.zero_payload_prefix(k2, PAYLOAD)?;
            state.bitmap.mark_free(k);
            state.bitmap.mark_free(k2);
            state.index.slot_clear(k);
        } else {
            state.container.zero_meta_region(k)?;
            state
                .container
                .zero_payload_prefix(k, record.file_size as usize)?;
            state.bitmap.mark_free(k);
            state.index.slot_clear(k);
        }
        state.container.persist_bitmap(&state.bitmap)?;
        Ok(())
    }

    /// Update the in-memory head slot's timestamps and rewrite its
    /// metadata region.
    pub fn utimens(
        &self,
        name: &str,
        atime: Option<u64>,
        mtime: Option<u64>,
    ) -> Result<Attr, AofsError> {
        let mut state = self.state.lock().unwrap();
        let k = state.index.lookup(name).ok_or(AofsError::NoSuchEntry)?;
        let mut record = state.index.get(k).clone();
        if let Some(a) = atime {
            record.time_accessed = a;
        }
        if let Some(m) = mtime {
            record.time_updated = m;
        }
        state.container.write_meta_region(k, &record)?;
        state.index.slot_update(k, record.clone());
        Ok(Attr::from_slot(&record))
    }

    /// Trivial by design: accepted, no side effects.
    pub fn truncate(&self, name: &str) -> Result<Attr, AofsError> {
        self.getattr(name)
    }

    /// Trivial by design: accepted, no side effects.
    pub fn mknod(&self) -> Result<(), AofsError> {
        Ok(())
    }

    /// Trivial by design: accepted, no side effects.
    pub fn access(&self) -> Result<(), AofsError> {
        Ok(())
    }

    pub fn statfs(&self) -> (u64, u64, u32) {
        let state = self.state.lock().unwrap();
        let free_blocks = BLOCKS as u64 - state.bitmap.used_count() as u64;
        (BLOCKS as u64, free_blocks, BLOCK_SIZE as u32)
    }

    /// Resolve a synthetic inode number (`block_index + 1`) back to the
    /// file name occupying that head block, for the upcall adapter's
    /// ino-keyed calls. `None` for an ino that isn't a live head block.
    pub fn name_at_ino(&self, ino: u64) -> Option<String> {
        let k = ino.checked_sub(1)? as usize;
        if k == 0 || k >= BLOCKS {
            return None;
        }
        let state = self.state.lock().unwrap();
        let slot = state.index.get(k);
        if !slot.is_empty() && slot.block_index as usize == k {
            Some(slot.file_name.to_string())
        } else {
            None
        }
    }

    /// Inverse of [`Engine::name_at_ino`].
    pub fn ino_of(&self, name: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.index.lookup(name).map(|k| k as u64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");
        let engine = Engine::open_container(&path).unwrap();
        (dir, engine)
    }

    #[test]
    fn s1_create_getattr_readdir() {
        let (_dir, engine) = engine();
        engine.create("a", 0o644).unwrap();
        let attr = engine.getattr("a").unwrap();
        assert_eq!(attr.size, 0);
        assert_eq!(attr.mode & 0o777, 0o644);
        assert_eq!(attr.mode & S_IFREG, S_IFREG);
        let mut names = engine.readdir();
        names.sort();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn s2_write_then_read_round_trips() {
        let (_dir, engine) = engine();
        engine.create("b", 0o644).unwrap();
        let n = engine.write("b", b"Hello World!").unwrap();
        assert_eq!(n, 12);
        let out = engine.read("b", 0, 12).unwrap();
        assert_eq!(out, b"Hello World!");
        assert_eq!(engine.getattr("b").unwrap().size, 12);
    }

    #[test]
    fn s3_and_s4_large_file_chains_and_unlink_frees_both_blocks() {
        let (_dir, engine) = engine();
        engine.create("big", 0o644).unwrap();
        let data = vec![b'A'; 5500];
        engine.write("big", &data).unwrap();
        let out = engine.read("big", 0, 5500).unwrap();
        assert_eq!(out, data);

        let free_before = engine.statfs().1;
        engine.unlink("big").unwrap();
        let free_after = engine.statfs().1;
        assert_eq!(free_after, free_before + 2);
        assert!(matches!(
            engine.getattr("big").unwrap_err(),
            AofsError::NoSuchEntry
        ));
    }

    #[test]
    fn s5_container_exhaustion_returns_no_space() {
        let (_dir, engine) = engine();
        for i in 0..(BLOCKS - 1) {
            engine.create(&format!("f{i}"), 0o644).unwrap();
        }
        let err = engine.create("overflow", 0o644).unwrap_err();
        assert!(matches!(err, AofsError::NoSpace));
    }

    #[test]
    fn idempotent_unlink_second_call_is_no_such_entry() {
        let (_dir, engine) = engine();
        engine.create("c", 0o644).unwrap();
        engine.unlink("c").unwrap();
        let err = engine.unlink("c").unwrap_err();
        assert!(matches!(err, AofsError::NoSuchEntry));
    }

    #[test]
    fn first_fit_reuses_freed_index() {
        let (_dir, engine) = engine();
        engine.create("x", 0o644).unwrap();
        let k_before = engine.ino_of("x").unwrap();
        engine.unlink("x").unwrap();
        engine.create("y", 0o644).unwrap();
        let k_after = engine.ino_of("y").unwrap();
        assert_eq!(k_before, k_after);
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let (_dir, engine) = engine();
        engine.create("dup", 0o644).unwrap();
        let err = engine.create("dup", 0o644).unwrap_err();
        assert!(matches!(err, AofsError::AlreadyExists));
    }

    #[test]
    fn s6_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.img");
        {
            let engine = Engine::open_container(&path).unwrap();
            engine.create("b", 0o644).unwrap();
            engine.write("b", b"Hello World!").unwrap();
        }
        let engine = Engine::open_container(&path).unwrap();
        let out = engine.read("b", 0, 12).unwrap();
        assert_eq!(out, b"Hello World!");
    }

    #[test]
    fn write_overwriting_large_with_small_frees_the_continuation_block() {
        let (_dir, engine) = engine();
        engine.create("shrink", 0o644).unwrap();
        engine.write("shrink", &vec![b'A'; 5000]).unwrap();
        let free_mid = engine.statfs().1;
        engine.write("shrink", b"tiny").unwrap();
        let free_end = engine.statfs().1;
        assert_eq!(free_end, free_mid + 1);
        assert_eq!(engine.read("shrink", 0, 4).unwrap(), b"tiny");
    }
}
