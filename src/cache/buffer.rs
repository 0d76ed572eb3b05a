//! Aligned block buffers
//!
//! Direct I/O requires the user buffer, the file offset and the transfer
//! length to be multiples of the device's logical block size. Slot buffers
//! are therefore allocated with an explicit [`IO_ALIGNMENT`] layout instead of
//! going through `Vec<u8>`.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

use super::IO_ALIGNMENT;
use crate::error::{Error, Result};

/// One slot's worth of memory, starting on an [`IO_ALIGNMENT`] boundary.
///
/// The bytes are zeroed when allocated, so every slice handed out covers
/// initialized memory. The allocation is released in `Drop` with the layout
/// recorded at allocation time.
#[derive(Debug)]
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    size: usize,
    layout: Layout,
}

// SAFETY: the allocation is owned by exactly one AlignedBuf and is only
// reachable through its slice accessors, which follow `&`/`&mut` rules.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// Allocate `size` zeroed bytes for a block slot.
    ///
    /// Allocator failure comes back as `Error::AllocationFailure` so the cache
    /// can recycle a resident slot instead.
    pub fn new(size: usize) -> Result<Self> {
        let failed = |reason: String| Error::AllocationFailure { size, reason };

        if size == 0 {
            return Err(failed("a slot buffer cannot be empty".into()));
        }
        let layout = Layout::from_size_align(size, IO_ALIGNMENT)
            .map_err(|e| failed(format!("no {}-aligned layout: {}", IO_ALIGNMENT, e)))?;

        // SAFETY: `size` is non-zero, which is all `alloc_zeroed` requires of
        // the layout
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| failed("out of memory".into()))?;
        Ok(Self { ptr, size, layout })
    }

    /// Slot size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Whether the start address sits on an `IO_ALIGNMENT` boundary
    #[inline]
    pub fn is_aligned(&self) -> bool {
        (self.ptr.as_ptr() as usize) % IO_ALIGNMENT == 0
    }

    /// Set every byte to `value`
    pub fn fill(&mut self, value: u8) {
        self.as_mut_slice().fill(value);
    }

    /// Clear the tail after a short load
    pub fn zero_from(&mut self, from: usize) {
        if from < self.size {
            self.as_mut_slice()[from..].fill(0);
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `size` zeroed bytes live at `ptr` until drop
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as in `as_slice`; `&mut self` rules out any other slice
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: `layout` is the one `ptr` came from, and drop runs once
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl AsRef<[u8]> for AlignedBuf {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for AlignedBuf {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}
