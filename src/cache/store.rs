//! Block Store
//!
//! Owns every slot buffer. Buffers are allocated lazily up to the configured
//! capacity and then recycled across evictions; the index and the eviction
//! policy only hold [`SlotId`]s into this pool.

use super::entry::{Block, BlockKey, SlotId};
use crate::error::{Error, Result};

/// Fixed-capacity pool of block buffers
#[derive(Debug)]
pub struct BlockStore {
    /// Allocated slots (resident or free)
    slots: Vec<Block>,
    /// Allocated slots that currently hold no block
    free: Vec<SlotId>,
    /// Maximum number of slots
    capacity: usize,
    #[cfg(test)]
    fail_allocations: bool,
}

impl BlockStore {
    /// Create an empty store; no buffer is allocated up front
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
            #[cfg(test)]
            fail_allocations: false,
        }
    }

    /// Maximum number of resident blocks
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers allocated so far
    #[inline]
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a block
    #[inline]
    pub fn resident(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Check if every slot is allocated and resident
    #[inline]
    pub fn is_full(&self) -> bool {
        self.resident() >= self.capacity
    }

    /// Get a slot ready to receive a new block.
    ///
    /// Reuses a free slot first, then allocates a new buffer while below
    /// capacity. Returns `Ok(None)` when the pool is at capacity and the
    /// caller must evict. Allocation failure is reported, never fatal.
    pub fn acquire(&mut self) -> Result<Option<SlotId>> {
        if let Some(slot) = self.free.pop() {
            return Ok(Some(slot));
        }
        if self.slots.len() >= self.capacity {
            return Ok(None);
        }

        #[cfg(test)]
        if self.fail_allocations {
            return Err(Error::AllocationFailure {
                size: super::BLOCK_SIZE,
                reason: "simulated allocation failure".into(),
            });
        }

        let block = Block::allocate()?;
        self.slots.push(block);
        Ok(Some(SlotId(self.slots.len() - 1)))
    }

    /// Get a slot
    #[inline]
    pub fn get(&self, slot: SlotId) -> Option<&Block> {
        self.slots.get(slot.0)
    }

    /// Get a slot mutably
    #[inline]
    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Block> {
        self.slots.get_mut(slot.0)
    }

    /// Get a slot that must exist
    pub fn block(&self, slot: SlotId) -> Result<&Block> {
        self.get(slot)
            .ok_or_else(|| Error::Internal(format!("dangling slot {}", slot.0)))
    }

    /// Get a slot that must exist, mutably
    pub fn block_mut(&mut self, slot: SlotId) -> Result<&mut Block> {
        self.get_mut(slot)
            .ok_or_else(|| Error::Internal(format!("dangling slot {}", slot.0)))
    }

    /// Bind an acquired slot to a key
    pub fn bind(&mut self, slot: SlotId, key: BlockKey) -> Result<&mut Block> {
        let block = self.block_mut(slot)?;
        block.bind(key);
        Ok(block)
    }

    /// Return a slot to the free list, keeping its buffer
    pub fn release(&mut self, slot: SlotId) -> Result<Option<BlockKey>> {
        let key = self.block_mut(slot)?.unbind();
        self.free.push(slot);
        Ok(key)
    }

    /// Iterate over resident blocks
    pub fn iter_resident(&self) -> impl Iterator<Item = (SlotId, &Block)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_resident())
            .map(|(i, b)| (SlotId(i), b))
    }

    #[cfg(test)]
    pub(crate) fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SessionId;

    fn key(block: u64) -> BlockKey {
        BlockKey::new(SessionId::from_raw(1), block)
    }

    #[test]
    fn test_store_allocates_lazily() {
        let store = BlockStore::new(4);
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.allocated(), 0);
        assert_eq!(store.resident(), 0);
        assert!(!store.is_full());
    }

    #[test]
    fn test_store_acquire_until_full() {
        let mut store = BlockStore::new(2);

        let a = store.acquire().unwrap().unwrap();
        store.bind(a, key(0)).unwrap();
        let b = store.acquire().unwrap().unwrap();
        store.bind(b, key(1)).unwrap();

        assert_ne!(a, b);
        assert!(store.is_full());
        assert!(store.acquire().unwrap().is_none());
    }

    #[test]
    fn test_store_reuses_released_buffers() {
        let mut store = BlockStore::new(1);

        let slot = store.acquire().unwrap().unwrap();
        store.bind(slot, key(0)).unwrap().data_mut()[0] = 7;

        assert_eq!(store.release(slot).unwrap(), Some(key(0)));
        assert_eq!(store.resident(), 0);

        let again = store.acquire().unwrap().unwrap();
        assert_eq!(again, slot);
        assert_eq!(store.allocated(), 1);
    }

    #[test]
    fn test_store_iter_resident() {
        let mut store = BlockStore::new(3);
        for n in 0..3 {
            let slot = store.acquire().unwrap().unwrap();
            store.bind(slot, key(n)).unwrap();
        }
        store.release(SlotId(1)).unwrap();

        let keys: Vec<_> = store
            .iter_resident()
            .filter_map(|(_, b)| b.key())
            .map(|k| k.block)
            .collect();
        assert_eq!(keys, vec![0, 2]);
    }

    #[test]
    fn test_store_allocation_failure_is_reported() {
        let mut store = BlockStore::new(2);
        store.set_fail_allocations(true);

        let result = store.acquire();
        assert!(matches!(result, Err(Error::AllocationFailure { .. })));
        assert_eq!(store.allocated(), 0);
    }

    #[test]
    fn test_store_dangling_slot() {
        let store = BlockStore::new(2);
        assert!(matches!(store.block(SlotId(5)), Err(Error::Internal(_))));
    }
}
