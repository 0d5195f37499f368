//! Container layout constants.
//!
//! These are compile-time, not configuration: the on-disk arrays (the
//! bitmap, the per-block metadata table) are sized from them, so
//! changing one without rebuilding produces a container a rebuilt
//! binary can't read.

use static_assertions::const_assert;

/// Bytes in one block, including its metadata region.
pub const BLOCK_SIZE: usize = 4096;

/// Number of blocks in the container. Block 0 is the superblock.
pub const BLOCKS: usize = 256;

/// Bytes of a block reserved for the metadata record.
pub const META: usize = 1096;

/// Bytes of a block available for file content.
pub const PAYLOAD: usize = BLOCK_SIZE - META;

/// Total container size in bytes.
pub const TOTAL: u64 = (BLOCKS * BLOCK_SIZE) as u64;

/// Magic string written at offset 0 of the container.
pub const MAGIC: &[u8] = b"0xfa19283e ";

/// Offset of the serialized bitmap, immediately after the magic.
pub const BITMAP_OFFSET: usize = MAGIC.len();

/// Number of 32-bit words backing the allocator's bitmap.
pub const BITMAP_WORDS: usize = 8;

/// Bits per bitmap word.
pub const BITMAP_WORD_BITS: usize = 32;

/// Length of the serialized bitmap: 8 groups of 32 `'0'`/`'1'` characters,
/// each group followed by a single space.
pub const BITMAP_SERIALIZED_LEN: usize = BITMAP_WORDS * (BITMAP_WORD_BITS + 1);

/// Maximum bytes in a file name, not counting the NUL terminator.
pub const MAX_NAME_LEN: usize = 23;

/// Maximum logical file size: two payload regions, head plus one continuation.
pub const MAX_FILE_SIZE: usize = 2 * PAYLOAD;

/// Block index of the superblock. Never allocated to a file.
pub const SUPERBLOCK_INDEX: usize = 0;

const_assert!(BITMAP_WORDS * BITMAP_WORD_BITS == BLOCKS);
const_assert!(META < BLOCK_SIZE);
const_assert!(BITMAP_OFFSET + BITMAP_SERIALIZED_LEN <= BLOCK_SIZE);
