//! Shared-memory-shaped buffer substrate: a circular byte buffer and an
//! indexed buffer array, both sized for zero-copy producer/consumer handoff.
//!
//! The Python original (`getm/concurrent/buffers.py`) backs these with POSIX
//! shared memory so worker *processes* can address the same bytes as the
//! parent. Rust has no GIL forcing worker processes, so range workers here
//! are `smol` tasks within a single process (see DESIGN.md's concurrency-model
//! decision) and the backing storage is a plain heap allocation behind an
//! `Arc`. The coordinate protocol — a single producer advancing `stop`, a
//! single consumer advancing `start`, both via atomic word-aligned stores —
//! is unchanged.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Sentinel written to `start` by a consumer to tell the producer to stop.
pub const CLOSE_SENTINEL: i64 = -1;

struct Storage(UnsafeCell<Box<[u8]>>);

// Safety: all mutation of `Storage` goes through `CircularBuffer::write_slice`,
// which is only ever called by the single producer, and all reads go through
// `read_slice`, only ever called by the single consumer, each on disjoint
// physical ranges guaranteed by the `start`/`stop` coordinate protocol.
unsafe impl Sync for Storage {}

struct Inner {
    storage: Storage,
    capacity: usize,
    start: AtomicI64,
    stop: AtomicI64,
}

/// A circular byte buffer addressed by two monotonically increasing logical
/// coordinates, `start` and `stop`, each taken modulo `capacity` for physical
/// access. `stop - start` never exceeds `capacity`.
#[derive(Clone)]
pub struct CircularBuffer(Arc<Inner>);

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        let inner = Inner {
            storage: Storage(UnsafeCell::new(vec![0u8; capacity].into_boxed_slice())),
            capacity,
            start: AtomicI64::new(0),
            stop: AtomicI64::new(0),
        };
        CircularBuffer(Arc::new(inner))
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    pub fn start(&self) -> i64 {
        self.0.start.load(Ordering::Acquire)
    }

    pub fn stop(&self) -> i64 {
        self.0.stop.load(Ordering::Acquire)
    }

    pub fn set_start(&self, val: i64) {
        self.0.start.store(val, Ordering::Release)
    }

    pub fn set_stop(&self, val: i64) {
        self.0.stop.store(val, Ordering::Release)
    }

    /// Consumer-side shutdown signal: the producer must stop as soon as it
    /// observes this.
    pub fn close_producer(&self) {
        self.set_start(CLOSE_SENTINEL);
    }

    fn circular_coords(&self, start: i64, stop: i64) -> (usize, usize, bool) {
        let capacity = self.0.capacity as i64;
        assert!(stop - start <= capacity, "slice larger than buffer capacity");
        let physical_start = start.rem_euclid(capacity) as usize;
        let physical_stop = stop.rem_euclid(capacity) as usize;
        let wraps = physical_stop <= physical_start || (start != stop && physical_start == physical_stop);
        (physical_start, physical_stop, wraps)
    }

    /// Read-only physical slice for the logical range `[start, stop)`. When
    /// the range wraps past the end of the backing storage, only the prefix
    /// `[physical_start, capacity)` is returned; callers must issue a second
    /// call to retrieve the wrap tail.
    fn read_slice(&self, start: i64, stop: i64) -> (*const u8, usize) {
        assert_ne!(start, stop, "zero length slice not allowed");
        let (ps, pstop, wraps) = self.circular_coords(start, stop);
        let data = unsafe { &*self.0.storage.0.get() };
        if wraps {
            (data[ps..].as_ptr(), data.len() - ps)
        } else {
            (data[ps..pstop].as_ptr(), pstop - ps)
        }
    }

    /// Borrow the logical range `[start, stop)` as a [`BufView`]. See
    /// [`read_slice`](Self::read_slice) for wrap behavior. `start == stop`
    /// yields an empty view without touching the backing storage.
    pub fn view(&self, start: i64, stop: i64) -> BufView {
        let (ptr, len) = if start == stop {
            (std::ptr::NonNull::<u8>::dangling().as_ptr() as *const u8, 0)
        } else {
            self.read_slice(start, stop)
        };
        BufView {
            _buf: self.clone(),
            ptr,
            len,
            released: AtomicBool::new(false),
            release_hook: None,
        }
    }

    /// Write `data` into the logical range `[start, start + data.len())`,
    /// splitting the write at the wrap boundary when necessary. Only the
    /// producer may call this.
    pub fn write_slice(&self, start: i64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let stop = start + data.len() as i64;
        let (ps, _pstop, wraps) = self.circular_coords(start, stop);
        let storage = unsafe { &mut *self.0.storage.0.get() };
        if wraps {
            let wrap_length = self.0.capacity - ps;
            storage[ps..ps + wrap_length].copy_from_slice(&data[..wrap_length]);
            storage[..data.len() - wrap_length].copy_from_slice(&data[wrap_length..]);
        } else {
            storage[ps..ps + data.len()].copy_from_slice(data);
        }
    }
}

/// A borrowed, read-only view into a [`CircularBuffer`]. Must be released
/// with [`release`](BufView::release) before its backing region can be
/// reused by the producer.
pub struct BufView {
    _buf: CircularBuffer,
    ptr: *const u8,
    len: usize,
    released: AtomicBool,
    release_hook: Option<(Arc<ReleaseTracker>, Arc<AtomicBool>)>,
}

// Safety: `ptr` refers into the `CircularBuffer`'s backing allocation, kept
// alive by `_buf`, and this range is only ever written by the producer after
// the consumer has released it (see `ReleaseTracker`).
unsafe impl Send for BufView {}

impl Deref for BufView {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl BufView {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mark this view released. Idempotent; double-release is a debug-only
    /// assertion rather than a panic in release builds, matching the "affine
    /// types in spirit" guidance for languages without move-only borrows.
    /// When this view came from a [`ReleaseTracker`], also reports back to
    /// it so the buffer's `start` coordinate can advance.
    pub fn mark_released(&self) -> bool {
        let first = !self.released.swap(true, Ordering::AcqRel);
        if first {
            if let Some((tracker, flag)) = &self.release_hook {
                tracker.release(flag);
            }
        }
        first
    }
}

#[cfg(debug_assertions)]
impl Drop for BufView {
    fn drop(&mut self) {
        debug_assert!(
            self.released.load(Ordering::Acquire),
            "BufView dropped without release()"
        );
    }
}

/// Tracks in-order release of views handed out from a `CircularBuffer` so
/// that the shared `start` coordinate only advances past a view once it
/// (and every view issued before it) has been released — even when a caller
/// releases a later view before an earlier one it is still holding.
pub struct ReleaseTracker {
    buf: CircularBuffer,
    next: AtomicI64,
    pending: Mutex<VecDeque<(i64, Arc<AtomicBool>)>>,
}

impl ReleaseTracker {
    pub fn new(buf: CircularBuffer) -> Self {
        let next = AtomicI64::new(buf.start());
        ReleaseTracker {
            buf,
            next,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn buffer(&self) -> &CircularBuffer {
        &self.buf
    }

    /// The logical coordinate the next reservation will begin at — i.e. how
    /// far the consumer has reserved (not necessarily released) up to.
    pub fn position(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }

    /// Record that `len` bytes were handed out to the consumer in issue
    /// order. Returns the logical start coordinate of the reservation and a
    /// flag the consumer flips via [`release`](Self::release).
    pub fn reserve(&self, len: i64) -> (i64, Arc<AtomicBool>) {
        let start = self.next.fetch_add(len, Ordering::SeqCst);
        let flag = Arc::new(AtomicBool::new(false));
        self.pending.lock().unwrap().push_back((len, flag.clone()));
        (start, flag)
    }

    /// Reserve and immediately borrow `len` bytes as a [`BufView`] wired to
    /// report back to this tracker when released.
    pub fn take(self: &Arc<Self>, len: i64) -> BufView {
        if len == 0 {
            return self.buf.view(0, 0);
        }
        let (start, flag) = self.reserve(len);
        let mut view = self.buf.view(start, start + len);
        view.release_hook = Some((self.clone(), flag));
        view
    }

    /// Release a previously reserved range. Advances the buffer's `start`
    /// coordinate by the total length of every contiguous prefix of
    /// reservations that has now been released, in issue order.
    pub fn release(&self, flag: &Arc<AtomicBool>) {
        flag.store(true, Ordering::Release);
        let mut pending = self.pending.lock().unwrap();
        let mut advanced = 0i64;
        while let Some((len, front_flag)) = pending.front() {
            if front_flag.load(Ordering::Acquire) {
                advanced += len;
                pending.pop_front();
            } else {
                break;
            }
        }
        if advanced > 0 {
            self.buf.set_start(self.buf.start() + advanced);
        }
    }
}

/// A fixed-stride array of same-size chunks, each independently addressable
/// by index. Used by the unordered multi-range reader so completed parts can
/// be handed back in any order.
#[derive(Clone)]
pub struct BufferArray {
    data: Arc<UnsafeCell<Box<[u8]>>>,
    chunk_size: usize,
    num_chunks: usize,
}

// Safety: each index `i` addresses a disjoint `[i*chunk_size, (i+1)*chunk_size)`
// region; callers only write a slot after it has been vacated by the reader
// of the previous occupant (see `reader::unordered`).
unsafe impl Sync for BufferArray {}
unsafe impl Send for BufferArray {}

impl BufferArray {
    pub fn new(chunk_size: usize, num_chunks: usize) -> Self {
        BufferArray {
            data: Arc::new(UnsafeCell::new(
                vec![0u8; chunk_size * num_chunks].into_boxed_slice(),
            )),
            chunk_size,
            num_chunks,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    fn slot_mut(&self, i: usize) -> &mut [u8] {
        assert!(i < self.num_chunks, "buffer array index out of range");
        let data = unsafe { &mut *self.data.get() };
        &mut data[i * self.chunk_size..(i + 1) * self.chunk_size]
    }

    /// Write `data` into slot `i`. `data.len()` must not exceed `chunk_size`.
    pub fn write(&self, i: usize, data: &[u8]) {
        let slot = self.slot_mut(i);
        slot[..data.len()].copy_from_slice(data);
    }

    /// Borrow the first `len` bytes of slot `i`.
    pub fn slot(&self, i: usize, len: usize) -> &[u8] {
        assert!(i < self.num_chunks, "buffer array index out of range");
        let data = unsafe { &*self.data.get() };
        &data[i * self.chunk_size..i * self.chunk_size + len]
    }
}
