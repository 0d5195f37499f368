//! Block addressing and per-block metadata record codec.
//!
//! Pure functions and a pure struct: nothing here touches the container
//! file. [`crate::container::Container`] is the only caller.

use std::collections::HashMap;

use arrayvec::ArrayString;

use crate::error::AofsError;
use crate::param::{BLOCK_SIZE, MAX_NAME_LEN, META};

/// A block's metadata record, mirrored between disk and memory.
///
/// An empty record (`file_name` empty) means the block holds no file;
/// this is also true of a continuation block, which is written with an
/// empty name so only the head block participates in name lookup and
/// `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockMeta {
    pub file_name: ArrayString<MAX_NAME_LEN>,
    pub file_size: u32,
    pub block_index: u32,
    pub next_block: u32,
    pub mode: u32,
    pub time_created: u64,
    pub time_updated: u64,
    pub time_accessed: u64,
}

impl BlockMeta {
    pub fn is_empty(&self) -> bool {
        self.file_name.is_empty()
    }
}

/// Byte offset of `block_index`'s start within the container.
pub const fn offset_of(block_index: usize, intra_block_offset: usize) -> u64 {
    (block_index * BLOCK_SIZE + intra_block_offset) as u64
}

/// `[start, end)` of `block_index`'s metadata region.
pub const fn meta_region(block_index: usize) -> (u64, u64) {
    let start = offset_of(block_index, 0);
    (start, start + META as u64)
}

/// `[start, end)` of `block_index`'s payload region.
pub const fn payload_region(block_index: usize) -> (u64, u64) {
    let start = offset_of(block_index, META);
    (start, offset_of(block_index + 1, 0))
}

/// Render a metadata record as a `META`-byte (at most) ASCII line. The
/// caller zero-pads the remainder of the metadata region.
pub fn serialize_meta(record: &BlockMeta) -> Vec<u8> {
    let line = format!(
        "FILE NAME = {}, FILE SIZE = {}, BLOCK INDEX = {}, MODE = {}, \
         TIME CREATED = {}, TIME UPDATED = {}, TIME ACCESSED = {}, NEXT BLOCK = {}",
        record.file_name,
        record.file_size,
        record.block_index,
        record.mode,
        record.time_created,
        record.time_updated,
        record.time_accessed,
        record.next_block,
    );
    debug_assert!(line.len() <= META, "serialized metadata overflows META");
    line.into_bytes()
}

/// Parse a metadata region. An all-zero region parses as an empty
/// record; anything else that doesn't match the `serialize_meta`
/// format fails with [`AofsError::CorruptMetadata`].
pub fn deserialize_meta(bytes: &[u8]) -> Result<BlockMeta, AofsError> {
    if bytes.iter().all(|&b| b == 0) {
        return Ok(BlockMeta::default());
    }

    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let line = std::str::from_utf8(&bytes[..end])
        .map_err(|_| AofsError::CorruptMetadata("metadata region is not valid UTF-8".into()))?;

    if line.is_empty() {
        return Ok(BlockMeta::default());
    }

    let mut fields: HashMap<&str, &str> = HashMap::new();
    for part in line.split(", ") {
        let (key, value) = part
            .split_once(" = ")
            .ok_or_else(|| AofsError::CorruptMetadata(format!("malformed field: {part:?}")))?;
        fields.insert(key, value);
    }

    let get = |key: &str| -> Result<&str, AofsError> {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| AofsError::CorruptMetadata(format!("missing field: {key}")))
    };
    let parse_u32 = |key: &str| -> Result<u32, AofsError> {
        get(key)?
            .parse()
            .map_err(|_| AofsError::CorruptMetadata(format!("bad integer field: {key}")))
    };
    let parse_u64 = |key: &str| -> Result<u64, AofsError> {
        get(key)?
            .parse()
            .map_err(|_| AofsError::CorruptMetadata(format!("bad integer field: {key}")))
    };

    let file_name = ArrayString::<MAX_NAME_LEN>::from(get("FILE NAME")?)
        .map_err(|_| AofsError::CorruptMetadata("file name too long".into()))?;

    Ok(BlockMeta {
        file_name,
        file_size: parse_u32("FILE SIZE")?,
        block_index: parse_u32("BLOCK INDEX")?,
        mode: parse_u32("MODE")?,
        time_created: parse_u64("TIME CREATED")?,
        time_updated: parse_u64("TIME UPDATED")?,
        time_accessed: parse_u64("TIME ACCESSED")?,
        next_block: parse_u32("NEXT BLOCK")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_contiguous_within_a_block() {
        let (meta_start, meta_end) = meta_region(5);
        let (payload_start, payload_end) = payload_region(5);
        assert_eq!(meta_end, payload_start);
        assert_eq!(meta_start, offset_of(5, 0));
        assert_eq!(payload_end, offset_of(6, 0));
    }

    #[test]
    fn empty_region_round_trips() {
        let zeros = vec![0u8; META];
        let record = deserialize_meta(&zeros).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn record_round_trips_through_serialize_and_deserialize() {
        let record = BlockMeta {
            file_name: ArrayString::from("hello").unwrap(),
            file_size: 12,
            block_index: 3,
            next_block: 0,
            mode: 0o100644,
            time_created: 1_700_000_000,
            time_updated: 1_700_000_001,
            time_accessed: 1_700_000_002,
        };
        let mut bytes = serialize_meta(&record);
        bytes.resize(META, 0);
        let parsed = deserialize_meta(&bytes).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn garbage_region_is_corrupt() {
        let mut bytes = vec![b'!'; META];
        bytes[100] = 0;
        let err = deserialize_meta(&bytes).unwrap_err();
        assert!(matches!(err, AofsError::CorruptMetadata(_)));
    }
}
