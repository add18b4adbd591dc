//! Off-heap bit set backing [`BloomFilter`](crate::BloomFilter).
//!
//! The words live in a single zero-initialized allocation made directly
//! through the global allocator rather than inside a `Vec`, so the exact
//! footprint is known up front and reported by `off_heap_size`. Handles share
//! the allocation through an atomic reference count; the memory is returned
//! to the allocator when the last handle is closed or dropped.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{FilterError, Result};

/// One raw allocation of `words` 64-bit words.
pub(crate) struct Region {
    ptr: NonNull<AtomicU64>,
    words: usize,
    layout: Layout,
}

// SAFETY: the allocation is only ever reached through `&[AtomicU64]`, and
// `AtomicU64` is `Sync`. The pointer is owned and freed by exactly one `Drop`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    fn zeroed(words: usize) -> Result<Self> {
        if words == 0 {
            return Err(FilterError::InvalidParameters(
                "bit set must hold at least one word".into(),
            ));
        }
        let layout = Layout::array::<AtomicU64>(words).map_err(|_| {
            FilterError::InvalidParameters(format!("bit set of {} words overflows", words))
        })?;
        // SAFETY: `layout` has a non-zero size because `words > 0`.
        let raw = unsafe { alloc::alloc_zeroed(layout) } as *mut AtomicU64;
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Ok(Self { ptr, words, layout })
    }

    fn words(&self) -> &[AtomicU64] {
        // SAFETY: `ptr` points to `words` zero-initialized `AtomicU64`s that
        // stay allocated for as long as `self` is alive.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.words) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this exact layout; `Drop` runs once.
        unsafe { alloc::dealloc(self.ptr.as_ptr() as *mut u8, self.layout) }
    }
}

/// A handle onto a shared off-heap bit set.
///
/// `close` releases this handle's reference and is safe to call repeatedly.
/// Any other method called after `close` panics.
pub(crate) struct OffHeapBitSet {
    region: Option<Arc<Region>>,
}

impl OffHeapBitSet {
    /// Allocates a zeroed bit set holding `words * 64` bits.
    pub fn with_words(words: usize) -> Result<Self> {
        Ok(Self {
            region: Some(Arc::new(Region::zeroed(words)?)),
        })
    }

    fn region(&self) -> &Arc<Region> {
        match &self.region {
            Some(region) => region,
            None => panic!("off-heap bit set used after close"),
        }
    }

    /// Number of addressable bits.
    pub fn capacity(&self) -> u64 {
        self.word_count() as u64 * 64
    }

    pub fn word_count(&self) -> usize {
        self.region().words
    }

    #[inline]
    pub fn set(&self, index: u64) {
        let word = &self.region().words()[(index >> 6) as usize];
        word.fetch_or(1u64 << (index & 63), Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, index: u64) -> bool {
        let word = self.region().words()[(index >> 6) as usize].load(Ordering::Relaxed);
        word & (1u64 << (index & 63)) != 0
    }

    pub fn word(&self, i: usize) -> u64 {
        self.region().words()[i].load(Ordering::Relaxed)
    }

    pub fn store_word(&self, i: usize, value: u64) {
        self.region().words()[i].store(value, Ordering::Relaxed);
    }

    /// Zeroes every word. The caller must hold the only reference.
    pub fn clear(&mut self) {
        let region = self.region();
        assert!(
            Arc::strong_count(region) == 1,
            "cannot clear a bit set shared by {} handles",
            Arc::strong_count(region)
        );
        for word in region.words() {
            word.store(0, Ordering::Relaxed);
        }
    }

    pub fn shared_copy(&self) -> Self {
        Self {
            region: Some(Arc::clone(self.region())),
        }
    }

    pub fn close(&mut self) {
        self.region.take();
    }

    pub fn is_closed(&self) -> bool {
        self.region.is_none()
    }

    /// Live handles on the region, `0` once this handle is closed.
    pub fn ref_count(&self) -> usize {
        self.region.as_ref().map_or(0, Arc::strong_count)
    }

    pub fn off_heap_size(&self) -> u64 {
        self.region().layout.size() as u64
    }

    #[cfg(test)]
    pub(crate) fn watch(&self) -> std::sync::Weak<Region> {
        Arc::downgrade(self.region())
    }
}
