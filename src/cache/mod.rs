//! Direct-I/O Block Cache
//!
//! Application-managed, fixed-capacity block cache sitting between callers and
//! files opened with the OS page cache bypassed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                    CacheManager (open/read/write/lseek/fsync/close)       │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  CursorTracker      │ BlockIndex          │ EvictionPolicy               │
//! │  (session → offset) │ ((session, block)   │ Recent ──hit──▶ Frequent     │
//! │                     │    → slot)          │ victim: Recent LRU first     │
//! │         │           │         │           │           │                  │
//! │         └───────────┴─────────┴───────────┴───────────┘                  │
//! │                              │                                           │
//! │                 BlockStore (aligned 16 KiB slot buffers)                 │
//! │                              │                                           │
//! │                 BackingStore (O_DIRECT / F_NOCACHE file)                 │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! All residency, ordering and dirty-flag state sits behind a single mutex.
//! Eviction can pick a victim owned by any session, so there is no sharding
//! boundary that would make two sessions' mutations independent.

mod backend;
mod buffer;
mod cursor;
mod entry;
mod file;
mod index;
mod manager;
mod metrics;
mod policy;
mod store;

#[cfg(test)]
mod proptest;

pub use backend::{BackendStats, BackingStore, BypassMode, FileStore, MemoryStore};
pub use buffer::AlignedBuf;
pub use cursor::{translate, CursorTracker};
pub use entry::{Block, BlockKey, SessionId, SlotId};
pub use file::CachedFile;
pub use index::BlockIndex;
pub use manager::{CacheConfig, CacheManager};
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use policy::{EvictionPolicy, Segment};
pub use store::BlockStore;

/// Size of one cached block in bytes
pub const BLOCK_SIZE: usize = 16384;

/// Default number of resident blocks (1 MiB working set)
pub const DEFAULT_CAPACITY_BLOCKS: usize = 64;

/// Buffer and offset alignment required by direct I/O
pub const IO_ALIGNMENT: usize = 4096;

/// Default creation mode for backing files (before umask)
pub const DEFAULT_FILE_MODE: u32 = 0o666;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_is_aligned() {
        assert!(BLOCK_SIZE.is_power_of_two());
        assert_eq!(BLOCK_SIZE % IO_ALIGNMENT, 0);
    }

    #[test]
    fn test_default_working_set() {
        // 64 blocks of 16 KiB
        assert_eq!(DEFAULT_CAPACITY_BLOCKS * BLOCK_SIZE, 1024 * 1024);
    }
}
