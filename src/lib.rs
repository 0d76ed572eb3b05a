//! direct-cache - Page-Cache Bypassing File I/O
//!
//! File I/O that skips the operating system's page cache (O_DIRECT on Linux,
//! F_NOCACHE on macOS) and puts an application-managed, fixed-capacity block
//! cache in its place, with explicit dirty tracking and write-back.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ CacheManager ──▶ BlockIndex ──hit──▶ BlockStore slot
//!                 │                │
//!                 │               miss ──▶ EvictionPolicy ──victim──▶ flush if dirty
//!                 │                              │
//!                 └────── BackingStore ◀─────────┘ load / write-back
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::io::SeekFrom;
//! use direct_cache::{CacheConfig, CacheManager};
//!
//! # fn main() -> direct_cache::Result<()> {
//! let cache = CacheManager::new(CacheConfig::default())?;
//! let session = cache.open("data.bin")?;
//! cache.write(session, b"hello")?;
//! cache.lseek(session, SeekFrom::Start(0))?;
//! let bytes = cache.read_to_vec(session, 5)?;
//! assert_eq!(bytes, b"hello");
//! cache.close(session)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Block cache, backing stores and the session API
//! - [`bench`] - Load generator mixing cache traffic with CPU-bound work
//! - [`error`] - Error types

pub mod bench;
pub mod cache;
pub mod error;

// Re-export commonly used types
pub use cache::{
    BackingStore, BypassMode, CacheConfig, CacheManager, CachedFile, FileStore, MemoryStore,
    MetricsSnapshot, SessionId, BLOCK_SIZE,
};
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
