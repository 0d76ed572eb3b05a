//! Cursor Tracker
//!
//! Per-session byte offsets with `lseek` semantics. `End` is resolved against
//! the session's logical length, which the cache keeps in step with the
//! backing store plus any extension that has not been flushed yet.

use std::collections::HashMap;
use std::io::SeekFrom;

use super::entry::SessionId;
use super::BLOCK_SIZE;
use crate::error::{Error, Result};

/// Split a byte offset into `(block_number, in_block_offset)`
#[inline]
pub const fn translate(offset: u64) -> (u64, usize) {
    (
        offset / BLOCK_SIZE as u64,
        (offset % BLOCK_SIZE as u64) as usize,
    )
}

/// Byte offset of every open session
#[derive(Debug, Default)]
pub struct CursorTracker {
    offsets: HashMap<SessionId, u64>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a session at offset 0
    pub fn register(&mut self, session: SessionId) {
        self.offsets.insert(session, 0);
    }

    /// Stop tracking a session, returning its last offset
    pub fn unregister(&mut self, session: SessionId) -> Option<u64> {
        self.offsets.remove(&session)
    }

    /// Current offset of a session
    pub fn position(&self, session: SessionId) -> Result<u64> {
        self.offsets
            .get(&session)
            .copied()
            .ok_or(Error::UnknownSession(session))
    }

    /// Reposition a session's cursor.
    ///
    /// `len` is the logical file length used for `SeekFrom::End`. A target
    /// before offset 0 is rejected and the cursor is left unchanged; targets
    /// past the end are allowed.
    pub fn seek(&mut self, session: SessionId, pos: SeekFrom, len: u64) -> Result<u64> {
        let current = self.position(session)?;

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
        }
        .ok_or_else(|| Error::InvalidSeek {
            session,
            reason: format!("{:?} from offset {} (length {}) is out of range", pos, current, len),
        })?;

        self.offsets.insert(session, target);
        Ok(target)
    }

    /// Move a session's cursor forward by `count` bytes.
    ///
    /// Fails without moving the cursor if the new offset would overflow.
    pub fn advance(&mut self, session: SessionId, count: usize) -> Result<u64> {
        let offset = self
            .offsets
            .get_mut(&session)
            .ok_or(Error::UnknownSession(session))?;
        *offset = offset
            .checked_add(count as u64)
            .ok_or(Error::OffsetOverflow {
                session,
                offset: *offset,
                len: count,
            })?;
        Ok(*offset)
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
