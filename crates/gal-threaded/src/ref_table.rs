//! Side table for command arguments that cannot be plain bytes.
//!
//! Owned objects (textures, result boxes, closures) travel out of band: the
//! producer parks them in the table and embeds a [`TableRef`] in the command,
//! the consumer takes them back out while executing it. Entries are used
//! strictly in production order, which the consumer checks on every pop.

use std::any::{type_name, Any};
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};

use crate::sync::lock;

/// Position of a parked object, plus the push sequence number it was stored
/// under so a stale or reordered reference is caught instead of silently
/// returning the wrong object.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TableRef {
    pub index: u32,
    pub sequence: u32,
}

type Entry = Mutex<Option<Box<dyn Any + Send>>>;

struct RefTable {
    entries: Box<[Entry]>,
}

/// Create a table with `capacity` entries.
///
/// The capacity must cover every reference that can be outstanding at once,
/// i.e. `max_refs_per_command * queue_capacity`. Pushing onto an entry that is
/// still occupied panics.
pub fn reference_table(capacity: usize) -> (RefProducer, RefConsumer) {
    assert!(capacity > 0, "reference table capacity must be non-zero");
    assert!(
        capacity <= u32::MAX as usize,
        "reference table capacity must fit in u32"
    );
    let table = Arc::new(RefTable {
        entries: (0..capacity).map(|_| Mutex::new(None)).collect(),
    });
    (
        RefProducer {
            table: Arc::clone(&table),
            next: 0,
            sequence: 0,
        },
        RefConsumer {
            table,
            next: 0,
            sequence: 0,
        },
    )
}

pub struct RefProducer {
    table: Arc<RefTable>,
    next: usize,
    sequence: u32,
}

impl RefProducer {
    pub fn push<T: Any + Send>(&mut self, value: T) -> TableRef {
        let index = self.next;
        {
            let mut entry = lock(&self.table.entries[index]);
            assert!(
                entry.is_none(),
                "reference table overflow: entry {index} is still occupied"
            );
            *entry = Some(Box::new(value));
        }

        let reference = TableRef {
            index: index as u32,
            sequence: self.sequence,
        };
        self.next = (index + 1) % self.table.entries.len();
        self.sequence = self.sequence.wrapping_add(1);
        reference
    }

    pub fn capacity(&self) -> usize {
        self.table.entries.len()
    }
}

pub struct RefConsumer {
    table: Arc<RefTable>,
    next: usize,
    sequence: u32,
}

impl RefConsumer {
    /// Take the object behind `reference`.
    ///
    /// Panics if `reference` is not the oldest outstanding entry or if the
    /// stored object is not a `T`. Either means the command stream is corrupt.
    pub fn pop<T: Any + Send>(&mut self, reference: TableRef) -> T {
        assert!(
            reference.index as usize == self.next && reference.sequence == self.sequence,
            "reference popped out of order: got {reference:?}, expected index {} sequence {}",
            self.next,
            self.sequence
        );

        let value = lock(&self.table.entries[self.next])
            .take()
            .unwrap_or_else(|| panic!("reference table entry {} is empty", self.next));

        self.next = (self.next + 1) % self.table.entries.len();
        self.sequence = self.sequence.wrapping_add(1);

        match value.downcast::<T>() {
            Ok(value) => *value,
            Err(_) => panic!(
                "reference table entry {} does not hold a {}",
                reference.index,
                type_name::<T>()
            ),
        }
    }

    /// Drop every parked object. Used when queued commands are discarded
    /// without being executed.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        loop {
            let taken = lock(&self.table.entries[self.next]).take();
            if taken.is_none() {
                return dropped;
            }
            dropped += 1;
            self.next = (self.next + 1) % self.table.entries.len();
            self.sequence = self.sequence.wrapping_add(1);
        }
    }
}
