//! Bounded single-producer / single-consumer ring of fixed-size command slots.
//!
//! Design:
//! - Slot count is a power of two so positions wrap with a mask.
//! - One slot is always left empty: the ring is full when advancing the
//!   producer cursor would land on the consumer cursor, so at most
//!   `capacity - 1` commands are outstanding.
//! - The producer cursor is private to [`RingProducer`]. The consumer cursor
//!   is published with `Release` when a slot has been fully executed, which
//!   is what makes the slot reusable.
//! - A separate `pending` counter is the publication point for new commands:
//!   the producer bumps it with `Release` after the slot bytes are written and
//!   the consumer only reads a slot after observing `pending > 0` with
//!   `Acquire`. The 0 -> 1 transition tells the producer to wake the consumer.

use core::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;

use crate::sync::Backoff;

struct CommandRing {
    storage: Box<[UnsafeCell<u8>]>,
    slot_size: usize,
    mask: usize,
    consumer: AtomicUsize,
    pending: AtomicUsize,
    // Occupancy instrumentation: a slot may only be written and published
    // while free, and only released while published.
    #[cfg(debug_assertions)]
    in_use: Box<[AtomicBool]>,
}

// SAFETY: slot bytes are only written by the producer while the slot is free
// and only read by the consumer while it is published. The cursors and the
// `pending` counter hand ownership of each slot across with Release/Acquire.
unsafe impl Send for CommandRing {}
unsafe impl Sync for CommandRing {}

impl CommandRing {
    fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index <= self.mask);
        // `UnsafeCell<u8>` has the layout of `u8`, so the storage is one
        // contiguous byte array.
        UnsafeCell::raw_get(self.storage[index * self.slot_size..].as_ptr())
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Create a ring of `capacity` slots of `slot_size` bytes each.
///
/// Panics if `capacity` is not a power of two of at least 2 or `slot_size` is
/// zero; both come from a validated configuration.
pub fn command_ring(capacity: usize, slot_size: usize) -> (RingProducer, RingConsumer) {
    assert!(
        capacity >= 2 && capacity.is_power_of_two(),
        "ring capacity must be a power of two >= 2"
    );
    assert!(slot_size > 0, "ring slot size must be non-zero");
    let bytes = capacity
        .checked_mul(slot_size)
        .expect("ring storage size overflows usize");

    let ring = Arc::new(CommandRing {
        storage: (0..bytes).map(|_| UnsafeCell::new(0)).collect(),
        slot_size,
        mask: capacity - 1,
        consumer: AtomicUsize::new(0),
        pending: AtomicUsize::new(0),
        #[cfg(debug_assertions)]
        in_use: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
    });

    (
        RingProducer {
            ring: Arc::clone(&ring),
            next: 0,
        },
        RingConsumer { ring, next: 0 },
    )
}

pub struct RingProducer {
    ring: Arc<CommandRing>,
    next: usize,
}

impl RingProducer {
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn slot_size(&self) -> usize {
        self.ring.slot_size
    }

    /// Commands published but not yet fully executed.
    pub fn pending(&self) -> usize {
        self.ring.pending.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        ((self.next + 1) & self.ring.mask) == self.ring.consumer.load(Ordering::Acquire)
    }

    pub fn try_allocate(&mut self) -> Option<SlotMut<'_>> {
        if self.is_full() {
            return None;
        }
        Some(SlotMut { producer: self })
    }

    /// Claim the next slot, waiting for the consumer to free one if the ring
    /// is full.
    pub fn allocate(&mut self) -> SlotMut<'_> {
        let mut backoff = Backoff::new();
        while self.is_full() {
            backoff.snooze();
        }
        SlotMut { producer: self }
    }
}

/// A claimed, not yet published slot. Dropping it without publishing leaves
/// the slot free.
pub struct SlotMut<'a> {
    producer: &'a mut RingProducer,
}

impl SlotMut<'_> {
    pub fn index(&self) -> usize {
        self.producer.next
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let ring = &self.producer.ring;
        #[cfg(debug_assertions)]
        assert!(
            !ring.in_use[self.producer.next].load(Ordering::Relaxed),
            "command slot {} written while still in use",
            self.producer.next
        );
        // SAFETY: the slot is not full, so the consumer is not reading it, and
        // `&mut self` excludes any other producer-side access.
        unsafe { core::slice::from_raw_parts_mut(ring.slot_ptr(self.producer.next), ring.slot_size) }
    }

    /// Hand the slot to the consumer. Returns `true` if the ring had no pending
    /// commands before this one, i.e. the consumer may be asleep.
    pub fn publish(self) -> bool {
        let producer = self.producer;
        let ring = &producer.ring;

        #[cfg(debug_assertions)]
        assert!(
            !ring.in_use[producer.next].swap(true, Ordering::Relaxed),
            "command slot {} published while still in use",
            producer.next
        );

        producer.next = (producer.next + 1) & ring.mask;
        ring.pending.fetch_add(1, Ordering::Release) == 0
    }
}

pub struct RingConsumer {
    ring: Arc<CommandRing>,
    next: usize,
}

impl RingConsumer {
    pub fn pending(&self) -> usize {
        self.ring.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// The oldest published command: its slot index and bytes.
    pub fn front(&self) -> Option<(usize, &[u8])> {
        if self.ring.pending.load(Ordering::Acquire) == 0 {
            return None;
        }
        // SAFETY: `pending > 0` (Acquire) means the slot at the consumer
        // cursor was fully written before it was published, and the producer
        // will not touch it again until `advance` moves the cursor past it.
        let bytes = unsafe {
            core::slice::from_raw_parts(self.ring.slot_ptr(self.next), self.ring.slot_size)
        };
        Some((self.next, bytes))
    }

    /// Release the front slot back to the producer. Must only be called once
    /// the command in it has finished executing.
    pub fn advance(&mut self) {
        let ring = &self.ring;
        assert!(
            ring.pending.load(Ordering::Acquire) > 0,
            "advance on an empty command ring"
        );

        #[cfg(debug_assertions)]
        assert!(
            ring.in_use[self.next].swap(false, Ordering::Relaxed),
            "command slot {} released without being published",
            self.next
        );

        self.next = (self.next + 1) & ring.mask;
        ring.consumer.store(self.next, Ordering::Release);
        ring.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Release every published slot without executing it. Returns how many
    /// were dropped.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while !self.is_empty() {
            self.advance();
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(producer: &mut RingProducer, byte: u8) -> bool {
        let mut slot = producer.allocate();
        slot.bytes_mut().fill(byte);
        slot.publish()
    }

    #[test]
    fn holds_capacity_minus_one_commands() {
        let (mut producer, mut consumer) = command_ring(4, 8);
        for i in 0..3 {
            assert!(producer.try_allocate().is_some());
            push(&mut producer, i);
        }
        assert!(producer.is_full());
        assert!(producer.try_allocate().is_none());
        assert_eq!(producer.pending(), 3);

        consumer.advance();
        assert!(!producer.is_full());
        assert_eq!(producer.pending(), 2);
    }

    #[test]
    fn publish_reports_the_empty_to_non_empty_transition() {
        let (mut producer, mut consumer) = command_ring(8, 4);
        assert!(push(&mut producer, 1));
        assert!(!push(&mut producer, 2));
        consumer.advance();
        consumer.advance();
        assert!(push(&mut producer, 3));
    }

    #[test]
    fn front_sees_slots_in_publication_order_across_wrap() {
        let (mut producer, mut consumer) = command_ring(4, 2);
        assert!(consumer.front().is_none());
        for round in 0..10u8 {
            push(&mut producer, round);
            push(&mut producer, round.wrapping_add(100));

            let (index, bytes) = consumer.front().unwrap();
            assert_eq!(index, (round as usize * 2) % 4);
            assert_eq!(bytes, &[round, round]);
            consumer.advance();

            let (_, bytes) = consumer.front().unwrap();
            assert_eq!(bytes[0], round.wrapping_add(100));
            consumer.advance();
        }
        assert!(consumer.front().is_none());
    }

    #[test]
    fn unpublished_slot_is_invisible_and_reusable() {
        let (mut producer, consumer) = command_ring(4, 4);
        {
            let mut slot = producer.allocate();
            slot.bytes_mut().fill(0xAA);
            assert_eq!(slot.index(), 0);
        }
        assert!(consumer.front().is_none());
        assert_eq!(producer.allocate().index(), 0);
    }

    #[test]
    fn clear_drops_everything_pending() {
        let (mut producer, mut consumer) = command_ring(8, 1);
        for i in 0..5 {
            push(&mut producer, i);
        }
        assert_eq!(consumer.clear(), 5);
        assert!(consumer.is_empty());
        assert_eq!(producer.pending(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn slot_is_occupied_from_publish_until_advance() {
        let (mut producer, mut consumer) = command_ring(4, 4);
        push(&mut producer, 1);
        push(&mut producer, 2);

        let (index, _) = consumer.front().unwrap();
        assert!(consumer.ring.in_use[index].load(Ordering::Relaxed));
        consumer.advance();
        assert!(!consumer.ring.in_use[index].load(Ordering::Relaxed));
        assert!(consumer.ring.in_use[(index + 1) & 3].load(Ordering::Relaxed));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn write_into_an_occupied_slot_is_caught_before_it_lands() {
        let (mut producer, consumer) = command_ring(4, 4);
        // Simulate a consumer that still owns the producer's next slot.
        consumer.ring.in_use[0].store(true, Ordering::Relaxed);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            producer.allocate().bytes_mut().fill(0xFF);
        }));
        let message = outcome.unwrap_err().downcast::<String>().unwrap();
        assert!(message.contains("written while still in use"), "{message}");

        // SAFETY: no other access to the ring is live.
        let bytes = unsafe { core::slice::from_raw_parts(consumer.ring.slot_ptr(0), 4) };
        assert_eq!(bytes, &[0; 4]);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_capacity() {
        let _ = command_ring(6, 8);
    }
}
