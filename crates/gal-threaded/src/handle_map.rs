//! Virtual handles that resolve asynchronously.
//!
//! The producer mints an id immediately and keeps using it in later commands;
//! the backend thread resolves it when the creation command executes. Threads
//! outside the command stream can block until that happens.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use gal::{BufferHandle, BufferRange, VertexBufferDescriptor};

use crate::sync::lock;

#[derive(Debug)]
struct State<R> {
    in_flight: HashSet<u64>,
    resolved: HashMap<u64, R>,
    // Ids that were still in flight when the backend stopped.
    cancelled: HashSet<u64>,
}

/// Generic id -> value map with in-flight tracking.
///
/// An id is in flight from `mint`/`begin` until `resolve`/`complete` (or
/// cancellation), and resolved until `unassign`. Every state change
/// broadcasts, so any number of concurrent `lookup_blocking` callers wake and
/// recheck.
#[derive(Debug)]
pub struct ResolutionMap<R> {
    state: Mutex<State<R>>,
    changed: Condvar,
    // Highest id handed out or begun so far; 0 is reserved as the null id.
    highest_id: AtomicU64,
}

impl<R: Copy> Default for ResolutionMap<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Copy> ResolutionMap<R> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                in_flight: HashSet::new(),
                resolved: HashMap::new(),
                cancelled: HashSet::new(),
            }),
            changed: Condvar::new(),
            highest_id: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<R>> {
        lock(&self.state)
    }

    fn assert_minted(&self, id: u64) {
        assert!(
            id != 0 && id <= self.highest_id.load(Ordering::Acquire),
            "handle {id} was never minted"
        );
    }

    /// Allocate a fresh id and mark it in flight.
    pub fn mint(&self) -> u64 {
        let id = self.highest_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.state().in_flight.insert(id);
        id
    }

    /// Mark a caller-chosen id in flight. Ids below it count as minted.
    pub fn begin(&self, id: u64) {
        assert!(id != 0, "id 0 is reserved");
        self.highest_id.fetch_max(id, Ordering::AcqRel);
        let mut state = self.state();
        state.cancelled.remove(&id);
        state.in_flight.insert(id);
    }

    pub fn resolve(&self, id: u64, value: R) {
        {
            let mut state = self.state();
            state.in_flight.remove(&id);
            state.resolved.insert(id, value);
        }
        self.changed.notify_all();
    }

    /// Take `id` out of flight without keeping a value for it.
    pub fn complete(&self, id: u64) {
        self.state().in_flight.remove(&id);
        self.changed.notify_all();
    }

    /// Cancel everything still in flight. Returns how many ids were cancelled.
    pub fn cancel_in_flight(&self) -> usize {
        let cancelled = {
            let mut state = self.state();
            let State {
                in_flight,
                cancelled,
                ..
            } = &mut *state;
            let count = in_flight.len();
            cancelled.extend(in_flight.drain());
            count
        };
        if cancelled > 0 {
            self.changed.notify_all();
        }
        cancelled
    }

    pub fn is_in_flight(&self, id: u64) -> bool {
        self.state().in_flight.contains(&id)
    }

    /// Non-blocking lookup. `None` while in flight or after removal.
    ///
    /// Panics if `id` was never minted.
    pub fn lookup(&self, id: u64) -> Option<R> {
        self.assert_minted(id);
        self.state().resolved.get(&id).copied()
    }

    /// Wait until `id` leaves the in-flight set, then look it up.
    ///
    /// Panics if `id` was never minted.
    pub fn lookup_blocking(&self, id: u64) -> Option<R> {
        self.assert_minted(id);
        let mut state = self.state();
        loop {
            if let Some(value) = state.resolved.get(&id) {
                return Some(*value);
            }
            if !state.in_flight.contains(&id) {
                return None;
            }
            state = match self.changed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Wait until `id` leaves the in-flight set. Returns `false` if it was
    /// cancelled rather than completed.
    ///
    /// Panics if `id` was never minted.
    pub fn wait_settled(&self, id: u64) -> bool {
        self.assert_minted(id);
        let mut state = self.state();
        while state.in_flight.contains(&id) {
            state = match self.changed.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        !state.cancelled.contains(&id)
    }

    /// Minted, neither in flight nor cancelled.
    ///
    /// Panics if `id` was never minted.
    pub fn is_settled(&self, id: u64) -> bool {
        self.assert_minted(id);
        let state = self.state();
        !state.in_flight.contains(&id) && !state.cancelled.contains(&id)
    }

    pub fn unassign(&self, id: u64) -> Option<R> {
        self.state().resolved.remove(&id)
    }

    pub fn resolved_len(&self) -> usize {
        self.state().resolved.len()
    }
}

/// Virtual buffer handles. `BufferHandle::NULL` maps to itself.
#[derive(Debug, Default)]
pub struct BufferMap {
    map: ResolutionMap<BufferHandle>,
}

impl BufferMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_handle(&self) -> BufferHandle {
        BufferHandle(self.map.mint())
    }

    pub fn assign(&self, virtual_handle: BufferHandle, real: BufferHandle) {
        self.map.resolve(virtual_handle.0, real);
    }

    /// Real handle for `virtual_handle`, or `NULL` if it is still in flight or
    /// has been deleted.
    pub fn map(&self, virtual_handle: BufferHandle) -> BufferHandle {
        if virtual_handle.is_null() {
            return BufferHandle::NULL;
        }
        self.map
            .lookup(virtual_handle.0)
            .unwrap_or(BufferHandle::NULL)
    }

    /// Like [`BufferMap::map`] but waits for an in-flight handle to resolve.
    pub fn map_blocking(&self, virtual_handle: BufferHandle) -> BufferHandle {
        if virtual_handle.is_null() {
            return BufferHandle::NULL;
        }
        self.map
            .lookup_blocking(virtual_handle.0)
            .unwrap_or(BufferHandle::NULL)
    }

    pub fn map_range(&self, range: BufferRange) -> BufferRange {
        range.with_handle(self.map(range.handle))
    }

    pub fn map_vertex_buffers(&self, descriptors: &mut [VertexBufferDescriptor]) {
        for descriptor in descriptors {
            descriptor.buffer = self.map_range(descriptor.buffer);
        }
    }

    /// Forget the mapping for a deleted buffer. Returns the real handle it
    /// mapped to, if any.
    pub fn unassign(&self, virtual_handle: BufferHandle) -> BufferHandle {
        self.map
            .unassign(virtual_handle.0)
            .unwrap_or(BufferHandle::NULL)
    }

    pub fn is_in_flight(&self, virtual_handle: BufferHandle) -> bool {
        self.map.is_in_flight(virtual_handle.0)
    }

    pub fn cancel_in_flight(&self) -> usize {
        self.map.cancel_in_flight()
    }

    pub fn live_buffers(&self) -> usize {
        self.map.resolved_len()
    }
}

/// Sync fence ids. The id is chosen by the caller; only the in-flight state
/// is tracked, so completed fences cost nothing.
#[derive(Debug, Default)]
pub struct SyncMap {
    map: ResolutionMap<()>,
}

impl SyncMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_sync_handle(&self, id: u64) {
        self.map.begin(id);
    }

    pub fn assign(&self, id: u64) {
        self.map.complete(id);
    }

    /// Block until the backend has created fence `id`. Returns `false` if it
    /// never will (cancelled at shutdown).
    pub fn wait_available(&self, id: u64) -> bool {
        self.map.wait_settled(id)
    }

    pub fn is_available(&self, id: u64) -> bool {
        self.map.is_settled(id)
    }

    pub fn is_in_flight(&self, id: u64) -> bool {
        self.map.is_in_flight(id)
    }

    pub fn cancel_in_flight(&self) -> usize {
        self.map.cancel_in_flight()
    }

    /// Fences currently tracked: in flight, or cancelled at shutdown.
    pub fn tracked(&self) -> usize {
        let state = self.map.state();
        state.in_flight.len() + state.cancelled.len() + state.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn minted_handles_are_in_flight_until_resolved() {
        let buffers = BufferMap::new();
        let a = buffers.create_handle();
        let b = buffers.create_handle();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert!(buffers.is_in_flight(a));
        assert_eq!(buffers.map(a), BufferHandle::NULL);

        buffers.assign(a, BufferHandle(0x1000));
        assert!(!buffers.is_in_flight(a));
        assert_eq!(buffers.map(a), BufferHandle(0x1000));
        assert_eq!(buffers.map_blocking(a), BufferHandle(0x1000));
    }

    #[test]
    fn deleted_handle_maps_to_null() {
        let buffers = BufferMap::new();
        let a = buffers.create_handle();
        buffers.assign(a, BufferHandle(7));
        assert_eq!(buffers.unassign(a), BufferHandle(7));
        assert_eq!(buffers.map(a), BufferHandle::NULL);
        assert_eq!(buffers.map_blocking(a), BufferHandle::NULL);
        assert_eq!(buffers.live_buffers(), 0);
    }

    #[test]
    #[should_panic(expected = "never minted")]
    fn lookup_of_unminted_handle_panics() {
        let buffers = BufferMap::new();
        buffers.map(BufferHandle(42));
    }

    #[test]
    fn null_maps_to_null_without_minting() {
        let buffers = BufferMap::new();
        assert_eq!(buffers.map(BufferHandle::NULL), BufferHandle::NULL);
        let range = BufferRange::new(BufferHandle::NULL, 4, 8);
        assert_eq!(buffers.map_range(range), range);
    }

    #[test]
    fn vertex_buffers_are_rewritten_in_place() {
        let buffers = BufferMap::new();
        let a = buffers.create_handle();
        let b = buffers.create_handle();
        buffers.assign(a, BufferHandle(0x1000));
        let mut descriptors = [
            VertexBufferDescriptor {
                buffer: BufferRange::new(a, 16, 64),
                stride: 12,
                divisor: 0,
            },
            VertexBufferDescriptor {
                buffer: BufferRange::new(b, 0, 32),
                stride: 4,
                divisor: 1,
            },
        ];
        buffers.map_vertex_buffers(&mut descriptors);
        assert_eq!(descriptors[0].buffer, BufferRange::new(BufferHandle(0x1000), 16, 64));
        assert_eq!(descriptors[1].buffer.handle, BufferHandle::NULL);
        assert_eq!(descriptors[1].stride, 4);
    }

    #[test]
    fn every_blocking_waiter_wakes_on_resolve() {
        let buffers = Arc::new(BufferMap::new());
        let handle = buffers.create_handle();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let buffers = Arc::clone(&buffers);
                thread::spawn(move || buffers.map_blocking(handle))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        buffers.assign(handle, BufferHandle(0xBEEF));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), BufferHandle(0xBEEF));
        }
    }

    #[test]
    fn cancel_releases_waiters_with_null() {
        let buffers = Arc::new(BufferMap::new());
        let handle = buffers.create_handle();
        let waiter = {
            let buffers = Arc::clone(&buffers);
            thread::spawn(move || buffers.map_blocking(handle))
        };
        thread::sleep(Duration::from_millis(10));
        assert_eq!(buffers.cancel_in_flight(), 1);
        assert_eq!(waiter.join().unwrap(), BufferHandle::NULL);
    }

    #[test]
    fn sync_ids_are_caller_chosen() {
        let sync = SyncMap::new();
        sync.create_sync_handle(10);
        assert!(!sync.is_available(10));
        // Ids below the highest begun id count as minted.
        assert!(!sync.is_in_flight(3));
        sync.assign(10);
        assert!(sync.wait_available(10));
    }

    #[test]
    fn completed_fences_are_not_retained() {
        let sync = SyncMap::new();
        for id in 1..=10_000 {
            sync.create_sync_handle(id);
            sync.assign(id);
        }
        assert_eq!(sync.tracked(), 0);
        assert!(sync.is_available(10_000));

        sync.create_sync_handle(10_001);
        assert_eq!(sync.tracked(), 1);
        assert_eq!(sync.cancel_in_flight(), 1);
        assert!(!sync.wait_available(10_001));
        assert_eq!(sync.tracked(), 1);
    }

    #[test]
    fn highest_fence_id_is_usable() {
        let sync = SyncMap::new();
        sync.create_sync_handle(u64::MAX);
        assert!(sync.is_in_flight(u64::MAX));
        assert!(!sync.is_available(u64::MAX));
        sync.assign(u64::MAX);
        assert!(sync.wait_available(u64::MAX));

        // Lower ids stay valid after the maximum has been begun.
        sync.create_sync_handle(5);
        assert!(sync.is_in_flight(5));
        sync.assign(5);
        assert!(sync.is_available(5));
    }

    #[test]
    fn mint_continues_above_begun_ids() {
        let map = ResolutionMap::<u32>::new();
        assert_eq!(map.mint(), 1);
        map.begin(40);
        assert_eq!(map.mint(), 41);
        assert_eq!(map.lookup(41), None);
    }
}
