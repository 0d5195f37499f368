//! In-memory shadow of the on-disk metadata records.

use crate::layout::BlockMeta;
use crate::param::BLOCKS;

pub struct MetadataIndex {
    slots: Vec<BlockMeta>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        MetadataIndex {
            slots: vec![BlockMeta::default(); BLOCKS],
        }
    }

    pub fn get(&self, k: usize) -> &BlockMeta {
        &self.slots[k]
    }

    pub fn slot_update(&mut self, k: usize, record: BlockMeta) {
        self.slots[k] = record;
    }

    pub fn slot_clear(&mut self, k: usize) {
        self.slots[k] = BlockMeta::default();
    }

    /// Linear scan over occupied, head-of-file blocks matching `name`.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| !slot.is_empty() && slot.file_name.as_str() == name)
    }

    /// Head-of-file blocks in ascending index order: `(block_index, &BlockMeta)`.
    pub fn iter_files(&self) -> impl Iterator<Item = (usize, &BlockMeta)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(k, slot)| !slot.is_empty() && slot.block_index as usize == *k)
    }
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrayvec::ArrayString;

    fn file(name: &str, block_index: u32) -> BlockMeta {
        BlockMeta {
            file_name: ArrayString::from(name).unwrap(),
            block_index,
            ..Default::default()
        }
    }

    #[test]
    fn lookup_finds_by_name() {
        let mut index = MetadataIndex::new();
        index.slot_update(7, file("a", 7));
        assert_eq!(index.lookup("a"), Some(7));
        assert_eq!(index.lookup("b"), None);
    }

    #[test]
    fn continuation_blocks_are_excluded_from_iter_files() {
        let mut index = MetadataIndex::new();
        index.slot_update(7, file("a", 7));
        // Continuation block: bit would be set externally, but its slot
        // carries an empty name so it never surfaces in iter_files/lookup.
        index.slot_update(8, BlockMeta {
            block_index: 8,
            ..Default::default()
        });
        let names: Vec<_> = index.iter_files().map(|(_, m)| m.file_name.to_string()).collect();
        assert_eq!(names, vec!["a".to_string()]);
    }
}
