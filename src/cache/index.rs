//! Block Index
//!
//! Maps `(session, block number)` to the slot holding that block. A missing
//! key is a cache miss, not an error.

use std::collections::{HashMap, HashSet};

use super::entry::{BlockKey, SessionId, SlotId};

/// Lookup index from block key to store slot
#[derive(Debug, Default)]
pub struct BlockIndex {
    /// key -> slot
    map: HashMap<BlockKey, SlotId>,
    /// session -> resident block numbers
    by_session: HashMap<SessionId, HashSet<u64>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the slot for a key
    #[inline]
    pub fn lookup(&self, key: &BlockKey) -> Option<SlotId> {
        self.map.get(key).copied()
    }

    /// Record a mapping, returning the slot previously mapped to the key
    pub fn insert(&mut self, key: BlockKey, slot: SlotId) -> Option<SlotId> {
        self.by_session
            .entry(key.session)
            .or_default()
            .insert(key.block);
        self.map.insert(key, slot)
    }

    /// Remove a mapping
    pub fn remove(&mut self, key: &BlockKey) -> Option<SlotId> {
        let removed = self.map.remove(key);
        if removed.is_some() {
            if let Some(blocks) = self.by_session.get_mut(&key.session) {
                blocks.remove(&key.block);
                if blocks.is_empty() {
                    self.by_session.remove(&key.session);
                }
            }
        }
        removed
    }

    /// Check if a key is resident
    #[inline]
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.map.contains_key(key)
    }

    /// Check if any block of the session is resident
    pub fn has_session(&self, session: SessionId) -> bool {
        self.by_session.contains_key(&session)
    }

    /// Resident blocks of a session, in ascending block order
    pub fn session_blocks(&self, session: SessionId) -> Vec<(BlockKey, SlotId)> {
        let mut blocks: Vec<u64> = self
            .by_session
            .get(&session)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        blocks.sort_unstable();

        blocks
            .into_iter()
            .filter_map(|block| {
                let key = BlockKey::new(session, block);
                self.lookup(&key).map(|slot| (key, slot))
            })
            .collect()
    }

    /// Number of resident blocks
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(session: u64, block: u64) -> BlockKey {
        BlockKey::new(SessionId::from_raw(session), block)
    }

    #[test]
    fn test_index_lookup_miss() {
        let index = BlockIndex::new();
        assert!(index.lookup(&key(1, 0)).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_index_insert_lookup_remove() {
        let mut index = BlockIndex::new();

        assert!(index.insert(key(1, 4), SlotId(0)).is_none());
        assert_eq!(index.lookup(&key(1, 4)), Some(SlotId(0)));
        assert!(index.contains(&key(1, 4)));
        assert!(index.has_session(SessionId::from_raw(1)));

        assert_eq!(index.remove(&key(1, 4)), Some(SlotId(0)));
        assert!(index.lookup(&key(1, 4)).is_none());
        assert!(!index.has_session(SessionId::from_raw(1)));

        // Remove nonexistent
        assert!(index.remove(&key(1, 4)).is_none());
    }

    #[test]
    fn test_index_session_blocks_sorted() {
        let mut index = BlockIndex::new();
        index.insert(key(1, 9), SlotId(0));
        index.insert(key(2, 0), SlotId(1));
        index.insert(key(1, 2), SlotId(2));
        index.insert(key(1, 5), SlotId(3));

        let blocks: Vec<u64> = index
            .session_blocks(SessionId::from_raw(1))
            .into_iter()
            .map(|(k, _)| k.block)
            .collect();
        assert_eq!(blocks, vec![2, 5, 9]);

        assert!(index.session_blocks(SessionId::from_raw(3)).is_empty());
        assert_eq!(index.len(), 4);
    }
}
