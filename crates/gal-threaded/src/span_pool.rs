//! Circular arena for variable-length command payloads.
//!
//! Command slots are fixed-size, so data uploads and descriptor arrays are
//! copied into this pool and the command carries a [`SpanRef`] instead. The
//! producer allocates at the head and the consumer releases at the tail, both
//! in command order, so the pool behaves like a byte-granular ring:
//!
//! - Positions are absolute (monotonic `u64`); the storage offset is the
//!   position modulo the capacity.
//! - A span never wraps. If it does not fit before the end of the storage the
//!   remaining tail is skipped and the span starts at offset 0.
//! - Every span is rounded up to 8 bytes and starts 8-byte aligned, so it can
//!   be viewed as a slice of any `Pod` type with alignment <= 8.
//! - When the pool is full the producer waits for the consumer to release.
//! - A payload larger than the whole pool is copied to the heap and passed
//!   through an overflow FIFO instead.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};

use crate::config::SPAN_ALIGNMENT;
use crate::stats::GalStats;
use crate::sync::{lock, Backoff};

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);
    match value.checked_add(alignment - 1) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

const WORD: u64 = SPAN_ALIGNMENT as u64;

/// Reference to a payload in the span pool.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SpanRef {
    pub position: u64,
    pub len: u32,
    pub flags: u32,
}

impl SpanRef {
    /// Payload lives in the heap overflow FIFO rather than the arena.
    pub const OVERFLOW: u32 = 1;

    pub fn is_overflow(&self) -> bool {
        self.flags & Self::OVERFLOW != 0
    }

    fn footprint(&self) -> u64 {
        align_up(self.len as u64, WORD)
    }
}

struct SpanPool {
    storage: Box<[UnsafeCell<u64>]>,
    capacity: u64,
    released: AtomicU64,
    overflow: Mutex<VecDeque<Box<[u64]>>>,
}

// SAFETY: the producer only writes bytes in `[released, end)` that it has just
// allocated and not yet published; the consumer only reads spans published to
// it and gives them back by advancing `released` with Release ordering.
unsafe impl Send for SpanPool {}
unsafe impl Sync for SpanPool {}

impl SpanPool {
    fn byte_ptr(&self, position: u64) -> *mut u8 {
        let offset = position % self.capacity;
        debug_assert_eq!(offset % WORD, 0);
        let word = (offset / WORD) as usize;
        UnsafeCell::raw_get(self.storage[word..].as_ptr()).cast::<u8>()
    }
}

/// Create a span pool of `capacity_bytes`, a non-zero multiple of 8.
pub fn span_pool(capacity_bytes: usize, stats: Arc<GalStats>) -> (SpanProducer, SpanConsumer) {
    assert!(
        capacity_bytes > 0 && capacity_bytes % SPAN_ALIGNMENT == 0,
        "span pool size must be a non-zero multiple of {SPAN_ALIGNMENT}"
    );
    let words = capacity_bytes / SPAN_ALIGNMENT;
    let pool = Arc::new(SpanPool {
        storage: (0..words).map(|_| UnsafeCell::new(0)).collect(),
        capacity: capacity_bytes as u64,
        released: AtomicU64::new(0),
        overflow: Mutex::new(VecDeque::new()),
    });
    (
        SpanProducer {
            pool: Arc::clone(&pool),
            end: 0,
            stats,
        },
        SpanConsumer { pool, released: 0 },
    )
}

pub struct SpanProducer {
    pool: Arc<SpanPool>,
    end: u64,
    stats: Arc<GalStats>,
}

impl SpanProducer {
    pub fn capacity(&self) -> usize {
        self.pool.capacity as usize
    }

    /// Bytes currently allocated and not yet released, including skipped tails.
    pub fn in_use(&self) -> u64 {
        self.end - self.pool.released.load(Ordering::Acquire)
    }

    pub fn insert_slice<T: Pod>(&mut self, data: &[T]) -> SpanRef {
        self.insert(bytemuck::cast_slice(data))
    }

    /// Copy `data` into the pool, waiting for space if necessary.
    pub fn insert(&mut self, data: &[u8]) -> SpanRef {
        self.insert_with(data, || {})
    }

    /// Like [`SpanProducer::insert`], but calls `while_full` on every round of
    /// the wait for space. The engine uses it to bail out (by panicking) once
    /// the consumer can no longer release anything.
    pub fn insert_with(&mut self, data: &[u8], mut while_full: impl FnMut()) -> SpanRef {
        let len = u32::try_from(data.len()).expect("span payload exceeds u32::MAX bytes");
        let size = align_up(len as u64, WORD);
        let capacity = self.pool.capacity;
        self.stats.add_span_bytes(len as u64);

        if size > capacity {
            self.stats.inc_span_overflows();
            tracing::debug!(len, capacity, "span payload exceeds pool, using heap overflow");
            let mut words = vec![0u64; (size / WORD) as usize].into_boxed_slice();
            bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..data.len()].copy_from_slice(data);
            lock(&self.pool.overflow).push_back(words);
            return SpanRef {
                position: 0,
                len,
                flags: SpanRef::OVERFLOW,
            };
        }

        let offset = self.end % capacity;
        let start = if offset + size > capacity {
            self.end + (capacity - offset)
        } else {
            self.end
        };
        let end = start + size;

        if end - self.pool.released.load(Ordering::Acquire) > capacity {
            self.stats.inc_span_pool_stalls();
            let mut backoff = Backoff::new();
            while end - self.pool.released.load(Ordering::Acquire) > capacity {
                while_full();
                backoff.snooze();
            }
        }

        if !data.is_empty() {
            // SAFETY: `[start, end)` is inside the storage (no wrap) and is
            // neither published nor being read, since the consumer has
            // released everything before `end - capacity`.
            unsafe {
                core::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    self.pool.byte_ptr(start),
                    data.len(),
                );
            }
        }
        self.end = end;

        SpanRef {
            position: start,
            len,
            flags: 0,
        }
    }
}

pub struct SpanConsumer {
    pool: Arc<SpanPool>,
    released: u64,
}

impl SpanConsumer {
    /// Borrow the payload of `span`. The space is released when the guard is
    /// dropped. Spans must be taken in the order they were inserted.
    pub fn take(&mut self, span: SpanRef) -> SpanGuard<'_> {
        if span.is_overflow() {
            let words = lock(&self.pool.overflow)
                .pop_front()
                .expect("overflow span taken but overflow queue is empty");
            return SpanGuard {
                consumer: self,
                data: SpanData::Heap(words),
                span,
            };
        }

        assert!(
            span.position >= self.released,
            "span at {} taken after release point {}",
            span.position,
            self.released
        );
        assert!(
            span.position % self.pool.capacity + span.footprint() <= self.pool.capacity,
            "span {span:?} crosses the end of the pool"
        );
        let ptr = self.pool.byte_ptr(span.position);
        SpanGuard {
            consumer: self,
            data: SpanData::Arena(ptr),
            span,
        }
    }

    fn release(&mut self, span: SpanRef) {
        self.released = span.position + span.footprint();
        self.pool.released.store(self.released, Ordering::Release);
    }
}

enum SpanData {
    Arena(*mut u8),
    Heap(Box<[u64]>),
}

/// Mutable view of one span. Commands may rewrite their payload in place, e.g.
/// to translate handles before handing descriptors to the backend.
pub struct SpanGuard<'a> {
    consumer: &'a mut SpanConsumer,
    data: SpanData,
    span: SpanRef,
}

impl SpanGuard<'_> {
    /// View the payload as a slice of `T`.
    ///
    /// Panics if the payload length is not a multiple of `size_of::<T>()`.
    pub fn cast_mut<T: Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut **self)
    }
}

impl Deref for SpanGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let len = self.span.len as usize;
        match &self.data {
            // SAFETY: the span was published to this consumer and is not
            // released until the guard is dropped.
            SpanData::Arena(ptr) => unsafe { core::slice::from_raw_parts(*ptr, len) },
            SpanData::Heap(words) => &bytemuck::cast_slice::<u64, u8>(words)[..len],
        }
    }
}

impl DerefMut for SpanGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.span.len as usize;
        match &mut self.data {
            // SAFETY: as for `deref`; `&mut self` makes the access exclusive.
            SpanData::Arena(ptr) => unsafe { core::slice::from_raw_parts_mut(*ptr, len) },
            SpanData::Heap(words) => &mut bytemuck::cast_slice_mut::<u64, u8>(words)[..len],
        }
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        if !self.span.is_overflow() {
            self.consumer.release(self.span);
        }
    }
}
