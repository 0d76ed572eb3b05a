//! Property-Based Tests for the Block Cache
//!
//! Drives random operation sequences through a small cache and checks every
//! observable result against a plain `Vec<u8>` model of the file.
//!
//! # Test Properties
//!
//! 1. **Coherence**: reads always return the latest written bytes
//! 2. **Durability**: after close, the backing store equals the model
//! 3. **Residency bound**: resident blocks never exceed capacity
//! 4. **Clean after sync**: fsync leaves no dirty block behind

#![cfg(test)]

use std::io::SeekFrom;

use proptest::prelude::*;

use super::{BackingStore, CacheManager, MemoryStore, SessionId, BLOCK_SIZE};

/// Span of file offsets exercised; a few blocks so small capacities evict
const SPAN: u64 = 5 * BLOCK_SIZE as u64;

#[derive(Debug, Clone)]
enum Op {
    Write { offset: u64, data: Vec<u8> },
    Read { offset: u64, len: usize },
    Append { data: Vec<u8> },
    Fsync,
    Reopen,
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Offsets biased toward block boundaries, where off-by-one bugs live.
fn offset_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        0..SPAN,
        (0u64..5, -3i64..=3).prop_map(|(block, delta)| {
            (block * BLOCK_SIZE as u64).saturating_add_signed(delta)
        }),
    ]
}

fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 1..64),
        prop::collection::vec(any::<u8>(), BLOCK_SIZE - 8..BLOCK_SIZE + 8),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (offset_strategy(), data_strategy()).prop_map(|(offset, data)| Op::Write { offset, data }),
        4 => (offset_strategy(), 0usize..2 * BLOCK_SIZE).prop_map(|(offset, len)| Op::Read { offset, len }),
        1 => data_strategy().prop_map(|data| Op::Append { data }),
        1 => Just(Op::Fsync),
        1 => Just(Op::Reopen),
    ]
}

// =============================================================================
// Model
// =============================================================================

fn model_write(model: &mut Vec<u8>, offset: u64, data: &[u8]) {
    let start = offset as usize;
    let end = start + data.len();
    if model.len() < end {
        model.resize(end, 0);
    }
    model[start..end].copy_from_slice(data);
}

fn model_read(model: &[u8], offset: u64, len: usize) -> Vec<u8> {
    let start = (offset as usize).min(model.len());
    let end = (start + len).min(model.len());
    model[start..end].to_vec()
}

fn reopen(cache: &CacheManager, session: SessionId, store: &MemoryStore) -> SessionId {
    cache.close(session).unwrap();
    cache.attach(Box::new(store.clone())).unwrap()
}

// =============================================================================
// Coherence Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: Every read matches the model, whatever evictions happened in between.
    #[test]
    fn prop_reads_match_model(
        capacity in 1usize..=3,
        ops in prop::collection::vec(op_strategy(), 1..40),
    ) {
        let store = MemoryStore::new();
        let cache = CacheManager::with_capacity(capacity)?;
        let mut session = cache.attach(Box::new(store.clone()))?;
        let mut model = Vec::new();

        for op in ops {
            match op {
                Op::Write { offset, data } => {
                    cache.lseek(session, SeekFrom::Start(offset))?;
                    prop_assert_eq!(cache.write(session, &data)?, data.len());
                    model_write(&mut model, offset, &data);
                }
                Op::Read { offset, len } => {
                    cache.lseek(session, SeekFrom::Start(offset))?;
                    let got = cache.read_to_vec(session, len)?;
                    prop_assert_eq!(got, model_read(&model, offset, len));
                }
                Op::Append { data } => {
                    let end = cache.lseek(session, SeekFrom::End(0))?;
                    prop_assert_eq!(end, model.len() as u64);
                    cache.write(session, &data)?;
                    model_write(&mut model, end, &data);
                }
                Op::Fsync => {
                    cache.fsync(session)?;
                    prop_assert_eq!(store.contents(), model.clone());
                }
                Op::Reopen => {
                    session = reopen(&cache, session, &store);
                }
            }

            prop_assert!(cache.resident_blocks() <= capacity);
            prop_assert_eq!(cache.session_len(session)?, model.len() as u64);
        }

        cache.close(session)?;
        prop_assert_eq!(store.contents(), model);
        prop_assert_eq!(cache.resident_blocks(), 0);
    }
}

// =============================================================================
// Sync Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: After fsync no resident block is dirty and a second fsync writes nothing.
    #[test]
    fn prop_fsync_leaves_everything_clean(
        writes in prop::collection::vec((offset_strategy(), data_strategy()), 1..12),
    ) {
        let store = MemoryStore::new();
        let cache = CacheManager::with_capacity(8)?;
        let session = cache.attach(Box::new(store.clone()))?;

        for (offset, data) in &writes {
            cache.lseek(session, SeekFrom::Start(*offset))?;
            cache.write(session, data)?;
        }

        cache.fsync(session)?;
        let blocks = cache.session_len(session)?.div_ceil(BLOCK_SIZE as u64);
        for block in 0..blocks {
            prop_assert!(!cache.is_dirty(session, block));
        }

        let writes_before = store.stats().writes;
        cache.fsync(session)?;
        prop_assert_eq!(store.stats().writes, writes_before);
    }
}
