//! Backing Stores
//!
//! Pluggable storage underneath the block cache. The cache only ever issues
//! whole-block, block-aligned transfers, so a store opened with the page
//! cache bypassed sees I/O that satisfies direct-I/O alignment rules.
//!
//! - [`FileStore`]: a file opened with `O_DIRECT` (Linux) or `F_NOCACHE` (macOS)
//! - [`MemoryStore`]: shared in-memory bytes, for tests and demos

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};

/// Backing store trait
///
/// All transfers are positional; the cache keeps its own cursor per session.
pub trait BackingStore: Send {
    /// Read into `buf` starting at `offset`. Returns the number of bytes read,
    /// which is less than `buf.len()` only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `buf` at `offset`, extending the store if needed
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Current length in bytes
    fn size(&self) -> io::Result<u64>;

    /// Truncate or extend to `len` bytes
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Persist written data to stable storage
    fn sync(&self) -> io::Result<()>;

    /// Transfer statistics
    fn stats(&self) -> BackendStats;

    /// Human-readable name for logs
    fn describe(&self) -> String {
        "backing store".to_string()
    }
}

/// Backing store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    /// Read calls
    pub reads: u64,
    /// Write calls
    pub writes: u64,
    /// Sync calls
    pub syncs: u64,
    /// Bytes read
    pub bytes_read: u64,
    /// Bytes written
    pub bytes_written: u64,
}

/// Whether files are opened with the OS page cache bypassed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BypassMode {
    /// Request bypass; a rejected request fails the open
    #[default]
    Required,
    /// Go through the OS page cache (e.g. tmpfs, which rejects O_DIRECT)
    Disabled,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    syncs: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Counters {
    fn record_read(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BackendStats {
        BackendStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// File Store
// =============================================================================

/// File opened read-write with the page cache bypassed
#[derive(Debug)]
pub struct FileStore {
    file: File,
    path: PathBuf,
    bypass: BypassMode,
    counters: Counters,
}

impl FileStore {
    /// Open or create `path` with the given creation mode.
    ///
    /// # Errors
    ///
    /// `Error::BackingStoreUnavailable` when the file cannot be opened or the
    /// platform rejects the bypass request under `BypassMode::Required`.
    pub fn open(path: impl AsRef<Path>, bypass: BypassMode, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |reason: String| Error::BackingStoreUnavailable {
            path: path.display().to_string(),
            reason,
        };

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
            #[cfg(target_os = "linux")]
            if bypass == BypassMode::Required {
                options.custom_flags(libc::O_DIRECT);
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(&path).map_err(|e| {
            if bypass == BypassMode::Required && e.kind() == io::ErrorKind::InvalidInput {
                unavailable(format!("page-cache bypass rejected by filesystem: {}", e))
            } else {
                unavailable(e.to_string())
            }
        })?;

        if bypass == BypassMode::Required {
            request_nocache(&file).map_err(|e| {
                unavailable(format!("page-cache bypass rejected: {}", e))
            })?;
        }

        Ok(Self {
            file,
            path,
            bypass,
            counters: Counters::default(),
        })
    }

    /// Path this store was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bypass mode the file was opened with
    pub fn bypass(&self) -> BypassMode {
        self.bypass
    }
}

/// O_DIRECT is applied at open time on Linux; nothing left to do.
#[cfg(target_os = "linux")]
fn request_nocache(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "macos")]
fn request_nocache(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and open for the whole call
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn request_nocache(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "page-cache bypass is not supported on this platform",
    ))
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn pwrite_all(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    std::os::unix::fs::FileExt::write_all_at(file, buf, offset)
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn pwrite_all(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl BackingStore for FileStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        // A single positional read: with O_DIRECT a follow-up read at an
        // unaligned remainder would fail, and regular files only come up
        // short at end of file.
        let n = loop {
            match pread(&self.file, buf, offset) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.counters.record_read(n);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        pwrite_all(&self.file, buf, offset)?;
        self.counters.record_write(buf.len());
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.file.sync_all()?;
        self.counters.record_sync();
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.counters.snapshot()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    data: Mutex<Vec<u8>>,
    counters: Counters,
    fail_writes: AtomicBool,
}

/// In-memory backing store for testing
///
/// Clones share the same bytes, so closing a session and attaching a clone
/// behaves like reopening the same file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `data`
    pub fn with_data(data: Vec<u8>) -> Self {
        let store = Self::new();
        *store.inner.data.lock() = data;
        store
    }

    /// Copy of the current contents
    pub fn contents(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }

    /// Make subsequent writes fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl BackingStore for MemoryStore {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.inner.data.lock();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflows usize"))?;

        let n = if start >= data.len() {
            0
        } else {
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
            n
        };
        self.inner.counters.record_read(n);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if self.inner.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::other("simulated write failure"));
        }

        let mut data = self.inner.data.lock();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflows usize"))?;
        let end = start.checked_add(buf.len()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "write end overflows usize")
        })?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.inner.counters.record_write(buf.len());
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.inner.data.lock().len() as u64)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflows usize"))?;
        self.inner.data.lock().resize(len, 0);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.inner.counters.record_sync();
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        self.inner.counters.snapshot()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_read_write() {
        let store = MemoryStore::new();
        store.write_at(4, b"data").unwrap();
        assert_eq!(store.size().unwrap(), 8);
        assert_eq!(store.contents(), b"\0\0\0\0data");

        let mut buf = [0u8; 16];
        assert_eq!(store.read_at(2, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"\0\0data");

        // Reading at or past the end is a zero-length read
        assert_eq!(store.read_at(8, &mut buf).unwrap(), 0);
        assert_eq!(store.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_store_clones_share_bytes() {
        let store = MemoryStore::with_data(b"hello".to_vec());
        let other = store.clone();
        other.write_at(0, b"J").unwrap();
        assert_eq!(store.contents(), b"Jello");
    }

    #[test]
    fn test_memory_store_set_len() {
        let store = MemoryStore::with_data(vec![1; 10]);
        store.set_len(4).unwrap();
        assert_eq!(store.contents(), vec![1; 4]);
        store.set_len(6).unwrap();
        assert_eq!(store.contents(), vec![1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_memory_store_stats() {
        let store = MemoryStore::new();
        store.write_at(0, &[0u8; 100]).unwrap();
        let mut buf = [0u8; 10];
        store.read_at(0, &mut buf).unwrap();
        store.sync().unwrap();

        let stats = store.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.bytes_written, 100);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.bytes_read, 10);
        assert_eq!(stats.syncs, 1);
    }

    #[test]
    fn test_memory_store_rejects_overflowing_write() {
        let store = MemoryStore::with_data(b"keep".to_vec());
        let err = store.write_at(u64::MAX - 1, b"abcd").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(store.contents(), b"keep");
        assert_eq!(store.stats().writes, 0);
    }

    #[test]
    fn test_memory_store_simulated_failure() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.write_at(0, b"x").is_err());
        assert_eq!(store.stats().writes, 0);

        store.set_fail_writes(false);
        assert!(store.write_at(0, b"x").is_ok());
    }

    #[test]
    fn test_file_store_open_without_bypass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.dat");

        let store = FileStore::open(&path, BypassMode::Disabled, 0o644).unwrap();
        assert_eq!(store.bypass(), BypassMode::Disabled);
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.size().unwrap(), 0);

        store.write_at(0, b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(store.read_at(0, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_file_store_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("file.dat");

        let result = FileStore::open(&path, BypassMode::Disabled, 0o644);
        assert!(matches!(result, Err(Error::BackingStoreUnavailable { .. })));
    }
}
