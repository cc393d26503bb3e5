//! Producer-side API and the state shared with the backend thread.
//!
//! Every `Renderer` operation becomes a fixed-size command in the ring:
//! - fire-and-forget operations publish and return immediately;
//! - operations with a result are *invokes*: the producer blocks until the
//!   backend thread has executed that exact slot, so the call still runs in
//!   stream order;
//! - *interrupts* run a closure on the backend thread out of band, between
//!   two commands, and may come from any thread.
//!
//! Buffer handles returned by [`ThreadedRenderer::create_buffer`] are virtual:
//! they are usable in later commands right away and resolve to backend
//! handles when the creation command executes.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use bytemuck::Pod;
use gal::{
    BackendError, BufferHandle, BufferRange, Capabilities, IndexType, Renderer, TextureCreateInfo,
    VertexBufferDescriptor,
};
use tracing::{debug, info, trace, warn};

use crate::commands::{
    Action, Barrier, BoxedAction, BufferDispose, BufferGetData, BufferSetData, ClearBuffer,
    CopyBuffer, CreateBuffer, CreateSync, CreateTexture, Draw, DrawIndexed, GetCapabilities,
    PreFrame, SetIndexBuffer, SetVertexBuffers, TextureCopyTo, TextureGetData, TextureRelease,
    TextureSetData, WindowPresent,
};
use crate::config::{GalConfig, ShutdownPolicy};
use crate::dispatch::{encode, CommandTable, GalCommand};
use crate::error::{GalError, Result};
use crate::handle_map::{BufferMap, SyncMap};
use crate::ref_table::{reference_table, RefProducer, TableRef};
use crate::result_box::ResultBox;
use crate::ring::{command_ring, RingProducer};
use crate::span_pool::{span_pool, SpanProducer, SpanRef};
use crate::stats::{GalStats, GalStatsSnapshot};
use crate::sync::{lock, Backoff, Event};
use crate::texture::ThreadedTexture;
use crate::worker::{on_consumer_thread, with_consumer_renderer, BackendWorker};

/// Engine lifecycle. Only ever moves forward.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EngineState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl EngineState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

const NO_INVOKE: usize = usize::MAX;

/// The single out-of-band action slot.
pub(crate) struct InterruptState {
    serial: Mutex<()>,
    action: Mutex<Option<BoxedAction>>,
    pending: AtomicBool,
    ran: AtomicBool,
    done: Event,
}

/// Signals the waiting interrupter when dropped, including on unwind.
struct Completion<'a> {
    state: &'a InterruptState,
    ran: bool,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.state.ran.store(self.ran, Ordering::SeqCst);
        self.state.done.set();
    }
}

impl InterruptState {
    fn new() -> Self {
        Self {
            serial: Mutex::new(()),
            action: Mutex::new(None),
            pending: AtomicBool::new(false),
            ran: AtomicBool::new(false),
            done: Event::new(false),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Run the pending action, if any. Backend thread only.
    pub(crate) fn service(&self, renderer: &dyn Renderer) -> bool {
        if !self.pending.load(Ordering::SeqCst) {
            return false;
        }
        let Some(action) = lock(&self.action).take() else {
            return false;
        };
        self.pending.store(false, Ordering::SeqCst);

        let mut completion = Completion {
            state: self,
            ran: false,
        };
        action(renderer);
        completion.ran = true;
        true
    }

    /// Drop a pending action without running it and release its caller.
    fn abandon(&self) {
        if lock(&self.action).take().is_some() {
            self.pending.store(false, Ordering::SeqCst);
            drop(Completion {
                state: self,
                ran: false,
            });
        }
    }
}

/// State reachable from both sides of the engine.
pub(crate) struct Shared {
    pub(crate) buffers: Arc<BufferMap>,
    pub(crate) sync: Arc<SyncMap>,
    pub(crate) work_available: Event,
    pub(crate) invoke_done: Event,
    pub(crate) frame_gate: Event,
    pub(crate) stopped: Event,
    pub(crate) interrupt: InterruptState,
    pub(crate) shutdown_policy: ShutdownPolicy,
    pub(crate) stats: Arc<GalStats>,
    invoke_slot: AtomicUsize,
    state: AtomicU8,
    panicked: AtomicBool,
}

impl Shared {
    fn new(shutdown_policy: ShutdownPolicy, stats: Arc<GalStats>) -> Self {
        Self {
            buffers: Arc::new(BufferMap::new()),
            sync: Arc::new(SyncMap::new()),
            work_available: Event::new(false),
            invoke_done: Event::new(false),
            frame_gate: Event::new(true),
            stopped: Event::new(false),
            interrupt: InterruptState::new(),
            shutdown_policy,
            stats,
            invoke_slot: AtomicUsize::new(NO_INVOKE),
            state: AtomicU8::new(EngineState::Created as u8),
            panicked: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_raw(self.state.load(Ordering::SeqCst))
    }

    /// Move the lifecycle forward to `to` (never backward). Returns the
    /// previous state.
    pub(crate) fn advance(&self, to: EngineState) -> EngineState {
        EngineState::from_raw(self.state.fetch_max(to as u8, Ordering::SeqCst))
    }

    /// Called after slot `index` has executed.
    pub(crate) fn complete_invoke(&self, index: usize) {
        if self
            .invoke_slot
            .compare_exchange(index, NO_INVOKE, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.invoke_done.set();
        }
    }

    /// Wake everything that could be waiting on a backend thread that will
    /// never run again.
    pub(crate) fn release_waiters(&self) {
        let buffers = self.buffers.cancel_in_flight();
        let fences = self.sync.cancel_in_flight();
        if buffers + fences > 0 {
            debug!(buffers, fences, "cancelled unresolved handles");
        }
        self.invoke_done.set();
        self.frame_gate.set();
        self.stopped.set();
    }

    /// The backend thread is unwinding.
    pub(crate) fn abandon(&self) {
        warn!("backend worker panicked, stopping threaded engine");
        self.panicked.store(true, Ordering::SeqCst);
        self.advance(EngineState::Stopped);
        self.interrupt.abandon();
        self.release_waiters();
    }
}

/// Sends out-of-band work to the backend thread. Cheap to clone and usable
/// from any thread.
#[derive(Clone)]
pub struct InterruptHandle {
    shared: Arc<Shared>,
}

impl InterruptHandle {
    /// Run `action` on the backend thread before its next command and wait
    /// for it to finish.
    ///
    /// Runs inline when called from the backend thread itself. Returns
    /// [`GalError::Stopped`] if the engine has stopped (or stops before the
    /// action got to run). Blocks until a consumer services it, so an engine
    /// whose worker never runs never answers.
    pub fn interrupt<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&dyn Renderer) + Send + 'static,
    {
        let shared = &*self.shared;
        if on_consumer_thread(shared) {
            with_consumer_renderer(shared, action);
            shared.stats.inc_interrupts();
            return Ok(());
        }

        let interrupt = &shared.interrupt;
        let _serial = lock(&interrupt.serial);
        if shared.state() == EngineState::Stopped {
            return Err(GalError::Stopped);
        }

        *lock(&interrupt.action) = Some(Box::new(action));
        interrupt.pending.store(true, Ordering::SeqCst);
        // The backend thread services interrupts once more after it stops.
        // If it got past that point the action is still ours to take back.
        if shared.state() == EngineState::Stopped && lock(&interrupt.action).take().is_some() {
            interrupt.pending.store(false, Ordering::SeqCst);
            return Err(GalError::Stopped);
        }

        shared.work_available.set();
        interrupt.done.wait();
        if interrupt.ran.swap(false, Ordering::SeqCst) {
            shared.stats.inc_interrupts();
            Ok(())
        } else {
            Err(GalError::Stopped)
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }
}

/// Producer-side access to the side tables while a command is being built.
struct Payloads<'a> {
    shared: &'a Shared,
    refs: &'a mut RefProducer,
    spans: &'a mut SpanProducer,
}

impl Payloads<'_> {
    fn push<T: Any + Send>(&mut self, value: T) -> TableRef {
        self.refs.push(value)
    }

    fn span(&mut self, data: &[u8]) -> SpanRef {
        let shared = self.shared;
        self.spans.insert_with(data, || {
            assert!(
                shared.state() != EngineState::Stopped,
                "threaded engine stopped while the span pool was full"
            );
        })
    }

    fn span_of<T: Pod>(&mut self, data: &[T]) -> SpanRef {
        self.span(bytemuck::cast_slice(data))
    }
}

/// A [`Renderer`] front end that defers every call to a backend thread.
///
/// The producer API takes `&mut self`: there is exactly one producer.
/// Foreign threads get an [`InterruptHandle`] or the handle maps instead.
pub struct ThreadedRenderer {
    shared: Arc<Shared>,
    ring: RingProducer,
    refs: RefProducer,
    spans: SpanProducer,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl ThreadedRenderer {
    /// Build an engine without starting a backend thread.
    ///
    /// Commands can be queued right away; they execute once the returned
    /// worker runs (on any thread) or is stepped manually.
    pub fn new<B: Renderer + 'static>(
        config: GalConfig,
        backend: B,
    ) -> Result<(Self, BackendWorker<B>)> {
        config.validate()?;

        let table = CommandTable::standard();
        let stats = Arc::new(GalStats::new());
        let (ring, ring_consumer) = command_ring(config.queue_capacity, table.slot_size());
        let (refs, refs_consumer) = reference_table(config.reference_table_capacity());
        let (spans, spans_consumer) = span_pool(config.span_pool_bytes, Arc::clone(&stats));
        let shared = Arc::new(Shared::new(config.shutdown_policy, stats));

        debug!(
            queue_capacity = config.queue_capacity,
            slot_size = table.slot_size(),
            span_pool_bytes = config.span_pool_bytes,
            reference_table = config.reference_table_capacity(),
            "threaded engine created"
        );

        let worker = BackendWorker::new(
            backend,
            ring_consumer,
            refs_consumer,
            spans_consumer,
            table,
            Arc::clone(&shared),
        );
        let renderer = Self {
            shared,
            ring,
            refs,
            spans,
            worker: None,
            closed: false,
        };
        Ok((renderer, worker))
    }

    /// Build an engine and start its backend thread.
    pub fn spawn<B: Renderer + 'static>(config: GalConfig, backend: B) -> Result<Self> {
        let name = config.worker_thread_name.clone();
        let (mut renderer, worker) = Self::new(config, backend)?;
        renderer.shared.advance(EngineState::Running);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(GalError::Spawn)?;
        renderer.worker = Some(handle);
        Ok(renderer)
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The buffer handle map, for blocking lookups from other threads.
    pub fn buffers(&self) -> Arc<BufferMap> {
        Arc::clone(&self.shared.buffers)
    }

    pub fn sync_map(&self) -> Arc<SyncMap> {
        Arc::clone(&self.shared.sync)
    }

    pub fn stats(&self) -> GalStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Commands submitted and not yet executed.
    pub fn pending_commands(&self) -> usize {
        self.ring.pending()
    }

    fn submit<C: GalCommand>(&mut self, invoke: bool, build: impl FnOnce(&mut Payloads<'_>) -> C) {
        let shared = &*self.shared;
        assert!(
            shared.state() != EngineState::Stopped,
            "{:?} submitted to a stopped threaded engine",
            C::COMMAND_TYPE
        );
        if invoke {
            assert!(
                !on_consumer_thread(shared),
                "{:?} invoked from the backend thread",
                C::COMMAND_TYPE
            );
        }

        if self.ring.is_full() {
            shared.stats.inc_queue_stalls();
            trace!(pending = self.ring.pending(), "command ring full, waiting for backend");
            let mut backoff = Backoff::new();
            while self.ring.is_full() {
                assert!(
                    shared.state() != EngineState::Stopped,
                    "threaded engine stopped while the command ring was full"
                );
                backoff.snooze();
            }
        }

        // References and spans are only taken once the slot is secured, which
        // is what bounds the reference table.
        let mut slot = self.ring.allocate();
        let command = build(&mut Payloads {
            shared,
            refs: &mut self.refs,
            spans: &mut self.spans,
        });
        encode(slot.bytes_mut(), &command);
        if invoke {
            shared.invoke_slot.store(slot.index(), Ordering::SeqCst);
        }
        shared.stats.inc_commands_submitted();
        if slot.publish() {
            shared.work_available.set();
        }

        if invoke {
            shared.invoke_done.wait();
        }
    }

    fn invoke<T, C>(&mut self, build: impl FnOnce(&mut Payloads<'_>, Arc<ResultBox<T>>) -> C) -> T
    where
        T: Send + 'static,
        C: GalCommand,
    {
        let result = Arc::new(ResultBox::new());
        let parked = Arc::clone(&result);
        self.submit(true, move |payloads| build(payloads, parked));
        self.shared.stats.inc_invokes();
        result.take().unwrap_or_else(|| {
            panic!(
                "threaded engine stopped before {:?} completed",
                C::COMMAND_TYPE
            )
        })
    }

    /// Queue an arbitrary closure to run against the backend, in order.
    pub fn run_action(&mut self, action: impl FnOnce(&dyn Renderer) + Send + 'static) {
        let action: BoxedAction = Box::new(action);
        self.submit(false, |payloads| Action {
            action: payloads.push(action),
        });
    }

    pub fn create_buffer(&mut self, size: u64) -> BufferHandle {
        let buffer = self.shared.buffers.create_handle();
        self.submit(false, |_| CreateBuffer { buffer, size });
        buffer
    }

    pub fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.submit(false, |_| BufferDispose { buffer });
    }

    pub fn set_buffer_data(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.submit(false, |payloads| BufferSetData {
            buffer,
            offset,
            data: payloads.span(data),
        });
    }

    pub fn get_buffer_data(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> std::result::Result<Vec<u8>, BackendError> {
        self.invoke(|payloads, result| BufferGetData {
            buffer,
            offset,
            size,
            result: payloads.push(result),
        })
    }

    pub fn copy_buffer(
        &mut self,
        source: BufferHandle,
        destination: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) {
        self.submit(false, |_| CopyBuffer {
            source,
            destination,
            src_offset,
            dst_offset,
            size,
        });
    }

    pub fn clear_buffer(&mut self, destination: BufferHandle, offset: u64, size: u64, value: u32) {
        self.submit(false, |_| ClearBuffer {
            destination,
            offset,
            size,
            value,
            _reserved: 0,
        });
    }

    pub fn create_texture(&mut self, info: TextureCreateInfo) -> Arc<ThreadedTexture> {
        let texture = Arc::new(ThreadedTexture::new(info));
        let parked = Arc::clone(&texture);
        self.submit(false, |payloads| CreateTexture {
            texture: payloads.push(parked),
        });
        texture
    }

    pub fn texture_set_data(&mut self, texture: &Arc<ThreadedTexture>, data: &[u8]) {
        let texture = Arc::clone(texture);
        self.submit(false, |payloads| TextureSetData {
            texture: payloads.push(texture),
            data: payloads.span(data),
        });
    }

    pub fn texture_get_data(
        &mut self,
        texture: &Arc<ThreadedTexture>,
    ) -> std::result::Result<Vec<u8>, BackendError> {
        let texture = Arc::clone(texture);
        self.invoke(|payloads, result| TextureGetData {
            texture: payloads.push(texture),
            result: payloads.push(result),
        })
    }

    pub fn texture_copy_to(
        &mut self,
        source: &Arc<ThreadedTexture>,
        destination: &Arc<ThreadedTexture>,
    ) {
        let (source, destination) = (Arc::clone(source), Arc::clone(destination));
        self.submit(false, |payloads| TextureCopyTo {
            source: payloads.push(source),
            destination: payloads.push(destination),
        });
    }

    pub fn texture_release(&mut self, texture: &Arc<ThreadedTexture>) {
        let texture = Arc::clone(texture);
        self.submit(false, |payloads| TextureRelease {
            texture: payloads.push(texture),
        });
    }

    /// Create fence `id` on the backend. The id becomes waitable from any
    /// thread immediately.
    pub fn create_sync(&mut self, id: u64, strict: bool) {
        self.shared.sync.create_sync_handle(id);
        self.submit(false, |_| CreateSync {
            id,
            strict: strict as u32,
            _reserved: 0,
        });
    }

    /// Wait until fence `id` exists on the backend, then wait on it there.
    pub fn wait_sync(&self, id: u64) -> Result<()> {
        if !self.shared.sync.wait_available(id) {
            return Err(GalError::Stopped);
        }
        self.interrupt_handle()
            .interrupt(move |renderer| renderer.wait_sync(id))
    }

    pub fn capabilities(&mut self) -> Capabilities {
        self.invoke(|payloads, result| GetCapabilities {
            result: payloads.push(result),
        })
    }

    pub fn pre_frame(&mut self) {
        self.submit(false, |_| PreFrame);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.submit(false, |_| Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_vertex: i32,
        first_instance: u32,
    ) {
        self.submit(false, |_| DrawIndexed {
            index_count,
            instance_count,
            first_index,
            first_vertex,
            first_instance,
        });
    }

    pub fn set_vertex_buffers(&mut self, buffers: &[VertexBufferDescriptor]) {
        self.submit(false, |payloads| SetVertexBuffers {
            buffers: payloads.span_of(buffers),
        });
    }

    pub fn set_index_buffer(&mut self, buffer: BufferRange, index_type: IndexType) {
        self.submit(false, |_| SetIndexBuffer {
            buffer,
            index_type: index_type.as_raw(),
            _reserved: 0,
        });
    }

    pub fn barrier(&mut self) {
        self.submit(false, |_| Barrier);
    }

    /// Present a frame. Blocks while the previous present has not reached the
    /// backend yet, so the producer runs at most one frame ahead.
    pub fn present(&mut self, texture: Option<&Arc<ThreadedTexture>>) {
        self.shared.frame_gate.wait();
        let texture = texture.cloned();
        self.submit(false, |payloads| WindowPresent {
            texture: payloads.push(texture),
        });
    }

    /// Wait until every submitted command has executed.
    pub fn flush(&self) -> Result<()> {
        let mut backoff = Backoff::new();
        while self.ring.pending() > 0 {
            if self.shared.state() == EngineState::Stopped {
                return Err(GalError::Stopped);
            }
            backoff.snooze();
        }
        Ok(())
    }

    /// Stop the engine: the backend thread handles what is still queued per
    /// the shutdown policy, disposes the backend and exits.
    pub fn shutdown(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let previous = self.shared.advance(EngineState::ShuttingDown);
        debug!(?previous, pending = self.ring.pending(), "shutting down threaded engine");
        self.shared.work_available.set();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(GalError::WorkerPanicked);
            }
        } else if previous == EngineState::Running {
            self.shared.stopped.wait();
        }

        if self.shared.panicked.load(Ordering::SeqCst) {
            return Err(GalError::WorkerPanicked);
        }
        Ok(())
    }
}

impl Drop for ThreadedRenderer {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "threaded engine did not shut down cleanly");
        }
    }
}

/// Run `gpu_loop` as the producer on a new thread while the calling thread
/// becomes the backend thread.
///
/// Returns once `gpu_loop` has finished (dropping or shutting down its
/// renderer) and the backend thread has handled the remaining commands. A
/// panic in `gpu_loop` is resumed on the calling thread.
pub fn run_loop<B, F>(config: GalConfig, backend: B, gpu_loop: F) -> Result<()>
where
    B: Renderer + 'static,
    F: FnOnce(ThreadedRenderer) + Send + 'static,
{
    let (renderer, worker) = ThreadedRenderer::new(config, backend)?;
    let producer = thread::Builder::new()
        .name("gal-producer".to_owned())
        .spawn(move || gpu_loop(renderer))
        .map_err(GalError::Spawn)?;

    info!("running backend on the calling thread");
    worker.run();

    match producer.join() {
        Ok(()) => Ok(()),
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
