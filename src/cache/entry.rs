//! Cache Entry Types
//!
//! Keys and slot contents shared by the store, index and eviction policy.

use std::fmt;

use super::buffer::AlignedBuf;
use super::BLOCK_SIZE;
use crate::error::Result;

/// Opaque identifier of one open-to-close session.
///
/// Allocated monotonically by the cache manager and never reused, so a closed
/// session's id can never alias a later open even when the OS hands out the
/// same descriptor number again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id. Only the cache manager hands out live ids.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id
    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Cache key - composite of session and block number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Owning session
    pub session: SessionId,
    /// Block number (byte offset / BLOCK_SIZE)
    pub block: u64,
}

impl BlockKey {
    /// Create a new block key
    pub const fn new(session: SessionId, block: u64) -> Self {
        Self { session, block }
    }

    /// Byte offset of the first byte of this block in the backing store
    #[inline]
    pub const fn byte_offset(&self) -> u64 {
        self.block * BLOCK_SIZE as u64
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/block-{}", self.session, self.block)
    }
}

/// Index of a slot in the block store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    #[inline]
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// One slot of the block store.
///
/// The buffer outlives residency: when a block is evicted the slot keeps its
/// allocation and is refilled by the next miss.
#[derive(Debug)]
pub struct Block {
    buf: AlignedBuf,
    key: Option<BlockKey>,
    dirty: bool,
}

impl Block {
    /// Allocate an empty (non-resident) slot
    pub fn allocate() -> Result<Self> {
        Ok(Self {
            buf: AlignedBuf::new(BLOCK_SIZE)?,
            key: None,
            dirty: false,
        })
    }

    /// Key of the resident block, `None` for a free slot
    #[inline]
    pub fn key(&self) -> Option<BlockKey> {
        self.key
    }

    #[inline]
    pub fn is_resident(&self) -> bool {
        self.key.is_some()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Block contents
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable block contents
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Mutable aligned buffer, for loading from the backing store
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut AlignedBuf {
        &mut self.buf
    }

    /// Bind this slot to a key. The slot starts clean.
    pub(crate) fn bind(&mut self, key: BlockKey) {
        self.key = Some(key);
        self.dirty = false;
    }

    /// Release the key; the buffer stays allocated for reuse.
    pub(crate) fn unbind(&mut self) -> Option<BlockKey> {
        self.dirty = false;
        self.key.take()
    }
}

// =============================================================================
// Tests
// =============================================================================
