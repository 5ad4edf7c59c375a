//! In-process shared memory regions.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

struct RegionInner {
    id: u64,
    /// Backing store. u64 words keep every 8-byte offset aligned for atomics.
    words: Box<[AtomicU64]>,
    len: usize,
    /// Wait queue for event flag words living in this region.
    waiters: Mutex<()>,
    wakeup: Condvar,
}

/// A reference-counted memory region shared between a producer and a consumer.
///
/// Stands in for the file descriptor of a memory grant: cloning a region
/// hands out another reference to the same bytes, never a copy.
#[derive(Clone)]
pub struct SharedRegion {
    inner: Arc<RegionInner>,
}

impl SharedRegion {
    /// Allocate a zeroed region of `len` bytes.
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(8))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            inner: Arc::new(RegionInner {
                id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
                words,
                len,
                waiters: Mutex::new(()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Process-unique id of this region.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// True if both values refer to the same memory.
    pub fn same_region(&self, other: &SharedRegion) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn in_bounds(&self, offset: usize, len: usize) -> bool {
        offset
            .checked_add(len)
            .map(|end| end <= self.inner.len)
            .unwrap_or(false)
    }

    fn base(&self) -> *mut u8 {
        // AtomicU64 is UnsafeCell-backed, so writes through a shared
        // reference are permitted.
        self.inner.words.as_ptr() as *mut u8
    }

    /// Atomic view of the u64 at `offset`, if aligned and in bounds.
    pub fn atomic_u64(&self, offset: usize) -> Option<&AtomicU64> {
        if offset % 8 != 0 || !self.in_bounds(offset, 8) {
            return None;
        }
        self.inner.words.get(offset / 8)
    }

    /// Atomic view of the u32 at `offset`, if aligned and in bounds.
    pub fn atomic_u32(&self, offset: usize) -> Option<&AtomicU32> {
        if offset % 4 != 0 || !self.in_bounds(offset, 4) {
            return None;
        }
        // SAFETY: in bounds, 4-byte aligned (the base is 8-byte aligned) and
        // AtomicU32 has the layout of u32. The reference borrows `self`, which
        // keeps the backing store alive.
        unsafe { Some(&*(self.base().add(offset) as *const AtomicU32)) }
    }

    /// Copy `data` into the region at `offset`.
    ///
    /// Callers coordinate ownership of the byte range through the queue
    /// indices; the copy itself is not atomic.
    pub(crate) fn write_bytes(&self, offset: usize, data: &[u8]) {
        assert!(self.in_bounds(offset, data.len()), "region write out of bounds");
        // SAFETY: bounds checked above; source is a distinct Rust slice.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len());
        }
    }

    /// Copy bytes at `offset` into `dest`.
    pub(crate) fn read_bytes(&self, offset: usize, dest: &mut [u8]) {
        assert!(self.in_bounds(offset, dest.len()), "region read out of bounds");
        // SAFETY: bounds checked above; destination is a distinct Rust slice.
        unsafe {
            ptr::copy_nonoverlapping(self.base().add(offset), dest.as_mut_ptr(), dest.len());
        }
    }

    /// Wake every thread waiting on a word of this region.
    pub(crate) fn wake_all(&self) {
        let _guard = self.inner.waiters.lock();
        self.inner.wakeup.notify_all();
    }

    /// Block until `ready` returns `Some` or `timeout` elapses.
    ///
    /// `ready` is evaluated under the region's wait lock, so a waker that
    /// updates memory before calling [`wake_all`](Self::wake_all) is never
    /// missed.
    pub(crate) fn wait_until<T>(
        &self,
        timeout: Duration,
        mut ready: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.inner.waiters.lock();
        loop {
            if let Some(value) = ready() {
                return Some(value);
            }
            if self.inner.wakeup.wait_until(&mut guard, deadline).timed_out() {
                return ready();
            }
        }
    }
}

impl PartialEq for SharedRegion {
    fn eq(&self, other: &Self) -> bool {
        self.same_region(other)
    }
}

impl Eq for SharedRegion {}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("id", &self.inner.id)
            .field("len", &self.inner.len)
            .finish()
    }
}

/// File descriptors and integers attached to a queue descriptor.
///
/// Each fd slot holds a shared region; grantors refer to slots by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeHandle {
    pub fds: Vec<SharedRegion>,
    pub ints: Vec<i32>,
}

impl NativeHandle {
    pub fn new(fds: Vec<SharedRegion>, ints: Vec<i32>) -> Self {
        Self { fds, ints }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_ids_are_unique() {
        let a = SharedRegion::new(16);
        let b = SharedRegion::new(16);
        assert_ne!(a.id(), b.id());
        assert!(!a.same_region(&b));
        assert!(a.same_region(&a.clone()));
    }

    #[test]
    fn test_atomic_views_check_alignment() {
        let region = SharedRegion::new(20);
        assert!(region.atomic_u64(0).is_some());
        assert!(region.atomic_u64(4).is_none());
        assert!(region.atomic_u64(16).is_none()); // 16+8 > 20
        assert!(region.atomic_u32(16).is_some());
        assert!(region.atomic_u32(18).is_none());
    }

    #[test]
    fn test_atomic_u32_aliases_bytes() {
        let region = SharedRegion::new(8);
        region.atomic_u32(4).unwrap().store(0xA1B2_C3D4, Ordering::SeqCst);
        let mut out = [0u8; 4];
        region.read_bytes(4, &mut out);
        assert_eq!(u32::from_ne_bytes(out), 0xA1B2_C3D4);
    }

    #[test]
    fn test_byte_copy() {
        let region = SharedRegion::new(10);
        region.write_bytes(3, &[1, 2, 3, 4]);
        let mut out = [0u8; 6];
        region.read_bytes(2, &mut out);
        assert_eq!(out, [0, 1, 2, 3, 4, 0]);
    }

    #[test]
    fn test_wait_until_times_out() {
        let region = SharedRegion::new(8);
        let result: Option<()> = region.wait_until(Duration::from_millis(10), || None);
        assert!(result.is_none());
    }
}
