//! Container file lifecycle and byte-range I/O.
//!
//! Everything here is synchronous, unbuffered `std::fs::File` access
//! guarded by the engine's mutex — no internal locking.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::error::AofsError;
use crate::index::MetadataIndex;
use crate::layout::{self, BlockMeta};
use crate::param::{BITMAP_OFFSET, BLOCKS, BLOCK_SIZE, MAGIC, META, PAYLOAD, TOTAL};

pub struct Container {
    file: File,
}

impl Container {
    /// Open the container at `path`, initializing it if it doesn't
    /// exist yet, or scanning it if it does.
    pub fn open(path: &Path) -> Result<(Self, Bitmap, MetadataIndex), AofsError> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => {
                info!("{}: container does not exist, initializing", path.display());
                Self::init(file, path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                info!("{}: loading existing container", path.display());
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                Self::load(file)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Initialize a brand-new container. If any step fails partway, the
    /// freshly-created file is removed rather than left behind as a
    /// zero-length or partially-initialized file that a later mount
    /// would trip over with `BadMagic`.
    fn init(mut file: File, path: &Path) -> Result<(Self, Bitmap, MetadataIndex), AofsError> {
        let cleanup = scopeguard::guard(path.to_path_buf(), |path| {
            warn!("{}: initialization failed, removing partial container", path.display());
            let _ = std::fs::remove_file(&path);
        });

        file.set_len(TOTAL)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(MAGIC)?;

        let bitmap = Bitmap::new();
        let mut container = Container { file };
        container.persist_bitmap(&bitmap)?;

        info!(
            "initialized container: {BLOCKS} blocks x {BLOCK_SIZE} bytes = {TOTAL} bytes total"
        );
        scopeguard::ScopeGuard::into_inner(cleanup);
        Ok((container, bitmap, MetadataIndex::new()))
    }

    fn load(mut file: File) -> Result<(Self, Bitmap, MetadataIndex), AofsError> {
        file.seek(SeekFrom::Start(0))?;
        let mut magic = vec![0u8; MAGIC.len()];
        file.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(AofsError::BadMagic);
        }

        let mut bitmap = Bitmap::new();
        let mut index = MetadataIndex::new();
        let mut container = Container { file };

        for k in 1..BLOCKS {
            let bytes = container.read_meta_region_raw(k)?;
            let record = layout::deserialize_meta(&bytes)?;
            if !record.is_empty() {
                bitmap.mark_used(k);
                index.slot_update(k, record);
            }
        }
        // A continuation block carries an empty name but its bit must
        // still be set; recover it from whichever head references it.
        for (_, head) in index.iter_files() {
            if head.next_block != 0 {
                bitmap.mark_used(head.next_block as usize);
            }
        }

        info!(
            "loaded container: {} blocks in use",
            bitmap.used_count()
        );
        Ok((container, bitmap, index))
    }

    fn read_at(&mut self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn read_meta_region_raw(&mut self, k: usize) -> std::io::Result<Vec<u8>> {
        let (start, end) = layout::meta_region(k);
        self.read_at(start, (end - start) as usize)
    }

    /// Rewrite block `k`'s metadata region, zero-padded to `META` bytes.
    pub fn write_meta_region(&mut self, k: usize, record: &BlockMeta) -> std::io::Result<()> {
        let mut bytes = layout::serialize_meta(record);
        debug!("block {k}: writing metadata ({} bytes)", bytes.len());
        bytes.resize(META, 0);
        let (start, _) = layout::meta_region(k);
        self.write_at(start, &bytes)
    }

    pub fn zero_meta_region(&mut self, k: usize) -> std::io::Result<()> {
        let (start, _) = layout::meta_region(k);
        self.write_at(start, &vec![0u8; META])
    }

    /// Write `data` (at most `PAYLOAD` bytes) at the start of block
    /// `k`'s payload region; the remainder of the region is untouched.
    pub fn write_payload(&mut self, k: usize, data: &[u8]) -> std::io::Result<()> {
        debug_assert!(data.len() <= PAYLOAD);
        let (start, _) = layout::payload_region(k);
        self.write_at(start, data)
    }

    pub fn read_payload(&mut self, k: usize, len: usize) -> std::io::Result<Vec<u8>> {
        debug_assert!(len <= PAYLOAD);
        let (start, _) = layout::payload_region(k);
        self.read_at(start, len)
    }

    /// Zero the first `len` bytes of block `k`'s payload region.
    pub fn zero_payload_prefix(&mut self, k: usize, len: usize) -> std::io::Result<()> {
        debug_assert!(len <= PAYLOAD);
        let (start, _) = layout::payload_region(k);
        self.write_at(start, &vec![0u8; len])
    }

    /// Rewrite the serialized bitmap into the superblock and flush.
    pub fn persist_bitmap(&mut self, bitmap: &Bitmap) -> std::io::Result<()> {
        let text = bitmap.serialize();
        self.write_at(BITMAP_OFFSET as u64, text.as_bytes())?;
        if let Err(e) = self.file.sync_data() {
            warn!("container: sync_data failed (best-effort): {e}");
        }
        Ok(())
    }
}
