//! Compiled-block cache keyed by [`BlockKey`].

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::block::{BlockKey, CodeBlock};
use crate::mem::CpuBus;

/// Bounded map from block keys to compiled blocks.
///
/// Eviction is first-in first-out. Lookups revalidate the block's code-page
/// versions against the bus and drop stale entries.
#[derive(Debug)]
pub struct BlockCache {
    blocks: FxHashMap<BlockKey, Arc<CodeBlock>>,
    order: VecDeque<BlockKey>,
    capacity: usize,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: FxHashMap::default(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.blocks.contains_key(key)
    }

    /// The cached block for `key`, if present and still current.
    pub fn get<B: CpuBus>(&mut self, key: &BlockKey, bus: &B) -> Option<Arc<CodeBlock>> {
        let block = self.blocks.get(key)?;
        if block.block().is_current(bus) {
            tracing::trace!(eip = key.eip, "block cache hit");
            return Some(Arc::clone(block));
        }
        tracing::debug!(eip = key.eip, cs_base = key.cs_base, "stale block dropped");
        self.remove(key);
        None
    }

    /// Insert `block`, evicting the oldest entries beyond capacity.
    pub fn insert(&mut self, block: CodeBlock) -> Arc<CodeBlock> {
        let key = block.block().key();
        let block = Arc::new(block);
        if self.blocks.insert(key, Arc::clone(&block)).is_none() {
            self.order.push_back(key);
        }
        while self.blocks.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.blocks.remove(&oldest);
        }
        block
    }

    pub fn remove(&mut self, key: &BlockKey) -> Option<Arc<CodeBlock>> {
        let block = self.blocks.remove(key)?;
        self.order.retain(|k| k != key);
        Some(block)
    }

    /// Drop every block decoded from a page intersecting `[addr, addr + len)`.
    /// Returns the number of blocks removed.
    pub fn invalidate_range(&mut self, addr: u32, len: u32) -> usize {
        let before = self.blocks.len();
        self.blocks
            .retain(|_, block| !block.block().overlaps(addr, len));
        let removed = before - self.blocks.len();
        if removed > 0 {
            let blocks = &self.blocks;
            self.order.retain(|k| blocks.contains_key(k));
            tracing::debug!(addr, len, removed, "invalidated cached blocks");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockAssembler;
    use crate::mem::PhysicalMemory;
    use crate::state::CpuMode;

    fn key(eip: u32) -> BlockKey {
        BlockKey {
            cs_base: 0,
            eip,
            mode: CpuMode::Real,
            default_32: false,
        }
    }

    fn compiled(mem: &mut PhysicalMemory, eip: u32) -> CodeBlock {
        CodeBlock::new(BlockAssembler::default().assemble(mem, key(eip)).unwrap())
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut mem = PhysicalMemory::new(0x10000);
        mem.load(0, &[0xC3; 0x10]).unwrap();
        let mut cache = BlockCache::new(2);
        for eip in 0..3 {
            let block = compiled(&mut mem, eip);
            cache.insert(block);
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
    }

    #[test]
    fn write_to_code_page_makes_block_stale() {
        let mut mem = PhysicalMemory::new(0x10000);
        mem.load(0x100, &[0x40, 0xC3]).unwrap();
        let mut cache = BlockCache::new(8);
        let block = compiled(&mut mem, 0x100);
        cache.insert(block);
        assert!(cache.get(&key(0x100), &mem).is_some());

        mem.load(0x100, &[0x48]).unwrap();
        assert!(cache.get(&key(0x100), &mem).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_range_hits_only_overlapping_pages() {
        let mut mem = PhysicalMemory::new(0x10000);
        mem.load(0x100, &[0xC3]).unwrap();
        mem.load(0x5000, &[0xC3]).unwrap();
        let mut cache = BlockCache::new(8);
        let a = compiled(&mut mem, 0x100);
        let b = compiled(&mut mem, 0x5000);
        cache.insert(a);
        cache.insert(b);
        assert_eq!(cache.invalidate_range(0x5FFF, 1), 1);
        assert!(cache.contains(&key(0x100)));
        assert!(!cache.contains(&key(0x5000)));
    }
}
