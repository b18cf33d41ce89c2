//! C5 — bounded LRU cache from block index to [`BlockDescriptor`].
//!
//! The on-disk formats say nothing about how many descriptors to keep
//! in memory; this is purely an implementation-side bound so that
//! sequentially reading a huge sparse disk doesn't grow unbounded
//! state. There is no negative caching: a failed resolution is never
//! stored, and is retried on the next access.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::block_descriptor::BlockDescriptor;

/// Default capacity used by [`crate::image::Image::open`]. Arbitrary
/// but generous enough that a typical sequential scan rarely evicts
/// the descriptor it's about to reuse.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct BlockDescriptorCache {
    entries: LruCache<u64, BlockDescriptor>,
}

impl BlockDescriptorCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        BlockDescriptorCache {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, block_index: u64) -> Option<&BlockDescriptor> {
        self.entries.get(&block_index)
    }

    pub fn insert(&mut self, block_index: u64, descriptor: BlockDescriptor) {
        self.entries.put(block_index, descriptor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
