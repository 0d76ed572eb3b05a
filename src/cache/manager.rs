//! Cache Manager
//!
//! Session-oriented file API (`open`/`read`/`write`/`lseek`/`fsync`/`close`)
//! composed from the block store, index, eviction policy and cursor tracker.
//!
//! Every operation takes the single state lock for its whole duration,
//! including any backing-store I/O it triggers. Metrics are recorded outside
//! the lock.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::backend::{BackendStats, BackingStore, BypassMode, FileStore};
use super::cursor::{translate, CursorTracker};
use super::entry::{BlockKey, SessionId, SlotId};
use super::index::BlockIndex;
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::policy::{EvictionPolicy, Segment};
use super::store::BlockStore;
use super::{BLOCK_SIZE, DEFAULT_CAPACITY_BLOCKS, DEFAULT_FILE_MODE};
use crate::error::{Error, Result};

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of resident blocks
    pub capacity_blocks: usize,
    /// Page-cache bypass for files opened by path
    pub bypass: BypassMode,
    /// Creation mode for new backing files (before umask)
    pub file_mode: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_blocks: DEFAULT_CAPACITY_BLOCKS,
            bypass: BypassMode::Required,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}

impl CacheConfig {
    /// Default configuration with a different capacity
    pub fn with_capacity(capacity_blocks: usize) -> Self {
        Self {
            capacity_blocks,
            ..Self::default()
        }
    }

    /// Set the bypass mode
    pub fn bypass(mut self, bypass: BypassMode) -> Self {
        self.bypass = bypass;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity_blocks == 0 {
            return Err(Error::Config("capacity_blocks must be at least 1".into()));
        }
        if self.file_mode & !0o7777 != 0 {
            return Err(Error::Config(format!(
                "file_mode {:#o} has bits outside 0o7777",
                self.file_mode
            )));
        }
        Ok(())
    }

    /// Total bytes the cache may hold
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_blocks * BLOCK_SIZE
    }
}

/// One open-to-close session
struct Session {
    store: Box<dyn BackingStore>,
    /// Backing length plus any extension not yet flushed
    len: u64,
    label: String,
}

/// How a missing block is filled when it becomes resident
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    /// Read existing content from the backing store
    Load,
    /// Block lies past the logical end; nothing to read
    Zeroed,
    /// Caller is about to overwrite the whole block
    Overwrite,
}

/// Everything guarded by the cache lock
struct CacheState {
    store: BlockStore,
    index: BlockIndex,
    policy: EvictionPolicy,
    cursors: CursorTracker,
    sessions: HashMap<SessionId, Session>,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            store: BlockStore::new(capacity),
            index: BlockIndex::new(),
            policy: EvictionPolicy::new(capacity),
            cursors: CursorTracker::new(),
            sessions: HashMap::new(),
        }
    }

    fn session(&self, id: SessionId) -> Result<&Session> {
        self.sessions.get(&id).ok_or(Error::UnknownSession(id))
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(&id).ok_or(Error::UnknownSession(id))
    }

    /// Make `key` resident and return its slot
    fn fault_in(&mut self, key: BlockKey, fill: Fill, metrics: &CacheMetrics) -> Result<SlotId> {
        if let Some(slot) = self.index.lookup(&key) {
            metrics.record_hit();
            if self.policy.touch(slot) == Some(Segment::Recent) {
                metrics.record_promotion();
            }
            return Ok(slot);
        }

        metrics.record_miss();
        let slot = self.reserve_slot(metrics)?;

        let session = self.sessions.get(&key.session).ok_or(Error::UnknownSession(key.session));
        let filled = session.and_then(|session| {
            let block = self.store.block_mut(slot)?;
            match fill {
                Fill::Load => {
                    let tracker = LatencyTracker::start();
                    let buf = block.buffer_mut();
                    let n = session
                        .store
                        .read_at(key.byte_offset(), buf.as_mut_slice())
                        .map_err(|source| Error::LoadFailed {
                            session: key.session,
                            block: key.block,
                            source,
                        })?;
                    buf.zero_from(n);
                    metrics.record_load(tracker.elapsed());
                    debug!(%key, bytes = n, "loaded block");
                }
                Fill::Zeroed => block.buffer_mut().fill(0),
                Fill::Overwrite => {}
            }
            Ok(())
        });

        if let Err(err) = filled {
            self.store.release(slot)?;
            return Err(err);
        }

        self.store.bind(slot, key)?;
        self.index.insert(key, slot);
        self.policy.admit(slot);
        Ok(slot)
    }

    /// Get a slot for a new block, evicting when the pool is full.
    ///
    /// A failed buffer allocation below capacity falls back to recycling an
    /// existing slot; it is only reported when nothing is resident.
    fn reserve_slot(&mut self, metrics: &CacheMetrics) -> Result<SlotId> {
        loop {
            match self.store.acquire() {
                Ok(Some(slot)) => return Ok(slot),
                Ok(None) => {}
                Err(err @ Error::AllocationFailure { .. }) => {
                    if self.policy.is_empty() {
                        return Err(err);
                    }
                    warn!(
                        error = %err,
                        resident = self.store.resident(),
                        "block allocation failed, recycling an existing slot"
                    );
                    metrics.record_allocation_fallback();
                }
                Err(err) => return Err(err),
            }
            self.evict_one(metrics)?;
        }
    }

    /// Evict the policy's victim, flushing it first if dirty.
    ///
    /// A failed flush leaves the victim resident and dirty.
    fn evict_one(&mut self, metrics: &CacheMetrics) -> Result<()> {
        let slot = self
            .policy
            .victim()
            .ok_or_else(|| Error::Internal("cache is full but nothing is evictable".into()))?;

        let dirty = self.flush_slot(slot, metrics)?;
        let key = self.store.release(slot)?;
        if let Some(key) = key {
            self.index.remove(&key);
            debug!(%key, dirty, "evicted block");
        }
        self.policy.remove(slot);
        metrics.record_eviction(dirty);
        Ok(())
    }

    /// Write a slot back if dirty. Returns whether a write happened.
    fn flush_slot(&mut self, slot: SlotId, metrics: &CacheMetrics) -> Result<bool> {
        let block = self.store.block_mut(slot)?;
        if !block.is_dirty() {
            return Ok(false);
        }
        let key = block
            .key()
            .ok_or_else(|| Error::Internal(format!("dirty slot {} has no key", slot.index())))?;
        let session = self
            .sessions
            .get(&key.session)
            .ok_or(Error::UnknownSession(key.session))?;

        let tracker = LatencyTracker::start();
        write_block(session, key, block.data()).map_err(|source| Error::FlushFailed {
            session: key.session,
            block: key.block,
            source,
        })?;
        block.mark_clean();
        metrics.record_flush(tracker.elapsed());
        debug!(%key, "flushed block");
        Ok(true)
    }

    /// Flush every dirty block of a session in ascending block order.
    ///
    /// Stops at the first failure; blocks after it stay dirty.
    fn flush_session(&mut self, session: SessionId, metrics: &CacheMetrics) -> Result<usize> {
        let mut flushed = 0;
        for (_, slot) in self.index.session_blocks(session) {
            if self.flush_slot(slot, metrics)? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drop every block of a session from the cache without flushing
    fn drain_session(&mut self, session: SessionId) -> Result<usize> {
        let blocks = self.index.session_blocks(session);
        for (key, slot) in &blocks {
            self.index.remove(key);
            self.policy.remove(*slot);
            self.store.release(*slot)?;
        }
        Ok(blocks.len())
    }

    /// Flush, drain and forget a session
    fn close_session(&mut self, id: SessionId, metrics: &CacheMetrics) -> Result<()> {
        self.session(id)?;

        let flushed = self.flush_session(id, metrics);
        let drained = self.drain_session(id);
        self.cursors.unregister(id);
        let session = self.sessions.remove(&id);
        metrics.record_session_closed();

        if let Some(session) = session {
            info!(session = %id, store = %session.label, len = session.len, "session closed");
        }

        flushed?;
        drained?;
        Ok(())
    }
}

/// Write a whole block, then trim any padding past the logical length.
///
/// The trim never cuts below the store's size before the write, so bytes
/// another session flushed past this session's length survive.
fn write_block(session: &Session, key: BlockKey, data: &[u8]) -> std::io::Result<()> {
    let offset = key.byte_offset();
    let end = offset.checked_add(data.len() as u64).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("block {} ends past the largest file offset", key.block),
        )
    })?;
    if end <= session.len {
        return session.store.write_at(offset, data);
    }

    let existing = session.store.size()?;
    session.store.write_at(offset, data)?;
    let keep = session.len.max(existing);
    if end > keep {
        session.store.set_len(keep)?;
    }
    Ok(())
}

/// Application-managed block cache over page-cache-bypassing files
pub struct CacheManager {
    state: Mutex<CacheState>,
    /// Next session id; ids start at 1 and are never reused
    next_session: AtomicU64,
    config: CacheConfig,
    metrics: Arc<CacheMetrics>,
}

impl CacheManager {
    /// Create a cache manager
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        info!(
            capacity_blocks = config.capacity_blocks,
            block_size = BLOCK_SIZE,
            bypass = ?config.bypass,
            "block cache created"
        );

        Ok(Self {
            state: Mutex::new(CacheState::new(config.capacity_blocks)),
            next_session: AtomicU64::new(1),
            config,
            metrics: Arc::new(CacheMetrics::new()),
        })
    }

    /// Create a cache manager with the default configuration and `capacity_blocks` slots
    pub fn with_capacity(capacity_blocks: usize) -> Result<Self> {
        Self::new(CacheConfig::with_capacity(capacity_blocks))
    }

    /// Open or create a file with the page cache bypassed per the configuration
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn open(&self, path: impl AsRef<Path>) -> Result<SessionId> {
        let path = path.as_ref();
        let store = FileStore::open(path, self.config.bypass, self.config.file_mode)?;
        self.register(Box::new(store), path.display().to_string())
    }

    /// Open a session over a caller-provided backing store
    pub fn attach(&self, store: Box<dyn BackingStore>) -> Result<SessionId> {
        let label = store.describe();
        self.register(store, label)
    }

    fn register(&self, store: Box<dyn BackingStore>, label: String) -> Result<SessionId> {
        let len = store.size().map_err(|e| Error::BackingStoreUnavailable {
            path: label.clone(),
            reason: format!("cannot read file size: {}", e),
        })?;
        let id = SessionId::from_raw(self.next_session.fetch_add(1, Ordering::Relaxed));

        let mut state = self.state.lock();
        if state.sessions.contains_key(&id) || state.index.has_session(id) {
            return Err(Error::SessionIdentifierReuse(id));
        }
        state.cursors.register(id);
        state.sessions.insert(id, Session { store, len, label: label.clone() });
        drop(state);

        self.metrics.record_session_opened();
        info!(session = %id, store = %label, len, "session opened");
        Ok(id)
    }

    /// Read from the session's cursor into `buf`.
    ///
    /// Returns fewer bytes than requested only at end of file. A failed block
    /// load is returned as an error even when earlier blocks were already
    /// copied; the cursor stays after the last block that was copied.
    pub fn read(&self, session: SessionId, buf: &mut [u8]) -> Result<usize> {
        let tracker = LatencyTracker::start();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let len = state.session(session)?.len;
        let mut pos = state.cursors.position(session)?;
        let mut done = 0;

        while done < buf.len() && pos < len {
            let (block, in_block) = translate(pos);
            let count = (buf.len() - done)
                .min(BLOCK_SIZE - in_block)
                .min(usize::try_from(len - pos).unwrap_or(usize::MAX));

            let slot = state.fault_in(BlockKey::new(session, block), Fill::Load, &self.metrics)?;

            let data = state.store.block(slot)?.data();
            buf[done..done + count].copy_from_slice(&data[in_block..in_block + count]);
            done += count;
            pos = state.cursors.advance(session, count)?;
        }
        drop(guard);

        self.metrics.record_read(done, tracker.elapsed());
        Ok(done)
    }

    /// Read up to `count` bytes into a new vector
    pub fn read_to_vec(&self, session: SessionId, count: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        let n = self.read(session, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write `data` at the session's cursor, extending the logical length.
    ///
    /// Bytes of a partially written block outside `data` are preserved. A
    /// failed load or eviction flush is returned as an error; blocks written
    /// before the failure stay dirty in the cache and the cursor stays after
    /// them. A write whose end would pass `u64::MAX` is rejected before any
    /// block is touched.
    pub fn write(&self, session: SessionId, data: &[u8]) -> Result<usize> {
        let tracker = LatencyTracker::start();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let len = state.session(session)?.len;
        let mut pos = state.cursors.position(session)?;
        if pos.checked_add(data.len() as u64).is_none() {
            return Err(Error::OffsetOverflow {
                session,
                offset: pos,
                len: data.len(),
            });
        }
        let mut done = 0;

        while done < data.len() {
            let (block, in_block) = translate(pos);
            let count = (data.len() - done).min(BLOCK_SIZE - in_block);
            let key = BlockKey::new(session, block);

            let fill = if count == BLOCK_SIZE {
                Fill::Overwrite
            } else if key.byte_offset() >= len {
                Fill::Zeroed
            } else {
                Fill::Load
            };

            let slot = state.fault_in(key, fill, &self.metrics)?;

            let block = state.store.block_mut(slot)?;
            block.data_mut()[in_block..in_block + count].copy_from_slice(&data[done..done + count]);
            block.mark_dirty();

            done += count;
            pos = state.cursors.advance(session, count)?;
            let entry = state.session_mut(session)?;
            entry.len = entry.len.max(pos);
        }
        drop(guard);

        self.metrics.record_write(done, tracker.elapsed());
        Ok(done)
    }

    /// Reposition the session's cursor. `End` is relative to the logical length.
    pub fn lseek(&self, session: SessionId, pos: SeekFrom) -> Result<u64> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let len = state.session(session)?.len;
        state.cursors.seek(session, pos, len)
    }

    /// Current cursor of a session
    pub fn position(&self, session: SessionId) -> Result<u64> {
        self.state.lock().cursors.position(session)
    }

    /// Flush every dirty block of the session and sync the backing store
    #[instrument(skip(self))]
    pub fn fsync(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        state.session(session)?;

        let flushed = state.flush_session(session, &self.metrics)?;
        state.session(session)?.store.sync()?;
        debug!(flushed, "session synced");
        Ok(())
    }

    /// Flush the session's dirty blocks, drop its blocks and release it.
    ///
    /// The session is released even when the flush fails; the failure is
    /// still returned.
    #[instrument(skip(self))]
    pub fn close(&self, session: SessionId) -> Result<()> {
        self.state.lock().close_session(session, &self.metrics)
    }

    /// Close every open session, returning the first failure
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = close_all(&mut state, &self.metrics);
        info!(resident = state.store.resident(), "block cache shut down");
        result
    }

    // -- Introspection --

    /// Check if a block of the session is resident
    pub fn is_resident(&self, session: SessionId, block: u64) -> bool {
        self.state.lock().index.contains(&BlockKey::new(session, block))
    }

    /// Check if a resident block has unflushed changes
    pub fn is_dirty(&self, session: SessionId, block: u64) -> bool {
        let state = self.state.lock();
        state
            .index
            .lookup(&BlockKey::new(session, block))
            .and_then(|slot| state.store.get(slot))
            .map(|b| b.is_dirty())
            .unwrap_or(false)
    }

    /// Eviction segment of a resident block
    pub fn segment_of(&self, session: SessionId, block: u64) -> Option<Segment> {
        let state = self.state.lock();
        let slot = state.index.lookup(&BlockKey::new(session, block))?;
        state.policy.segment_of(slot)
    }

    /// Number of resident blocks across all sessions
    pub fn resident_blocks(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Logical length of a session's file
    pub fn session_len(&self, session: SessionId) -> Result<u64> {
        Ok(self.state.lock().session(session)?.len)
    }

    /// Number of open sessions
    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Transfer statistics of a session's backing store
    pub fn backend_stats(&self, session: SessionId) -> Result<BackendStats> {
        Ok(self.state.lock().session(session)?.store.stats())
    }

    /// Get the configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get current metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

}

fn close_all(state: &mut CacheState, metrics: &CacheMetrics) -> Result<()> {
    let mut ids: Vec<SessionId> = state.sessions.keys().copied().collect();
    ids.sort_unstable();

    let mut first_error = None;
    for id in ids {
        if let Err(err) = state.close_session(id, metrics) {
            warn!(session = %id, error = %err, "failed to close session cleanly");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.sessions.is_empty() {
            return;
        }
        warn!(
            sessions = state.sessions.len(),
            "block cache dropped with open sessions, flushing"
        );
        // Failures are already logged per session
        let _ = close_all(state, &self.metrics);
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("next_session", &self.next_session.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
