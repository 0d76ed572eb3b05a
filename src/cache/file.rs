//! `std::io` adapter over a cache session

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use super::backend::BackingStore;
use super::entry::SessionId;
use super::manager::CacheManager;
use crate::error::Result;

/// An open file whose I/O goes through a shared [`CacheManager`].
///
/// Closes its session on drop; use [`CachedFile::close`] to observe flush
/// errors instead of having them logged.
#[derive(Debug)]
pub struct CachedFile {
    cache: Arc<CacheManager>,
    session: Option<SessionId>,
}

impl CachedFile {
    /// Open or create a file through the cache
    pub fn open(cache: Arc<CacheManager>, path: impl AsRef<Path>) -> Result<Self> {
        let session = cache.open(path)?;
        Ok(Self {
            cache,
            session: Some(session),
        })
    }

    /// Wrap a caller-provided backing store
    pub fn attach(cache: Arc<CacheManager>, store: Box<dyn BackingStore>) -> Result<Self> {
        let session = cache.attach(store)?;
        Ok(Self {
            cache,
            session: Some(session),
        })
    }

    /// Session backing this file
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Logical length of the file
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.cache.session_len(self.live()?)?)
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush dirty blocks and sync the backing store
    pub fn sync_all(&self) -> io::Result<()> {
        Ok(self.cache.fsync(self.live()?)?)
    }

    /// Close the session, reporting any flush failure
    pub fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => self.cache.close(session),
            None => Ok(()),
        }
    }

    fn live(&self) -> io::Result<SessionId> {
        self.session
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "file already closed"))
    }
}

impl Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.cache.read(self.live()?, buf)?)
    }
}

impl Write for CachedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.cache.write(self.live()?, buf)?)
    }

    /// Writes stay in the cache until `sync_all` or close
    fn flush(&mut self) -> io::Result<()> {
        self.live().map(|_| ())
    }
}

impl Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.cache.lseek(self.live()?, pos)?)
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.cache.close(session) {
                warn!(%session, error = %e, "failed to close cached file");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, BLOCK_SIZE};

    fn cache() -> Arc<CacheManager> {
        Arc::new(CacheManager::with_capacity(4).unwrap())
    }

    #[test]
    fn test_cached_file_io_traits() {
        let store = MemoryStore::new();
        let mut file = CachedFile::attach(cache(), Box::new(store.clone())).unwrap();

        file.write_all(b"hello, cache").unwrap();
        file.seek(SeekFrom::Start(7)).unwrap();

        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "cache");
        assert_eq!(file.len().unwrap(), 12);

        file.close().unwrap();
        assert_eq!(store.contents(), b"hello, cache");
    }

    #[test]
    fn test_cached_file_drop_closes_session() {
        let cache = cache();
        let store = MemoryStore::new();
        {
            let mut file = CachedFile::attach(Arc::clone(&cache), Box::new(store.clone())).unwrap();
            file.write_all(&vec![9u8; BLOCK_SIZE + 1]).unwrap();
        }
        assert_eq!(cache.open_sessions(), 0);
        assert_eq!(store.contents().len(), BLOCK_SIZE + 1);
    }

    #[test]
    fn test_cached_file_errors_map_to_io() {
        let mut file = CachedFile::attach(cache(), Box::new(MemoryStore::new())).unwrap();
        let err = file.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_cached_file_sync_all() {
        let store = MemoryStore::new();
        let mut file = CachedFile::attach(cache(), Box::new(store.clone())).unwrap();
        file.write_all(b"synced").unwrap();
        file.flush().unwrap();
        assert!(store.contents().is_empty());

        file.sync_all().unwrap();
        assert_eq!(store.contents(), b"synced");
        assert!(!file.is_empty().unwrap());
    }
}
