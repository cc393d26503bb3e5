//! The consumer half of the engine: owns the backend and drains the ring.

use std::cell::Cell;
use std::ptr;
use std::sync::Arc;

use gal::Renderer;
use tracing::{debug, info, trace};

use crate::config::ShutdownPolicy;
use crate::dispatch::{CommandTable, ExecContext};
use crate::engine::{EngineState, Shared};
use crate::ref_table::RefConsumer;
use crate::ring::RingConsumer;
use crate::span_pool::SpanConsumer;

#[derive(Clone, Copy)]
struct ActiveConsumer {
    engine: *const Shared,
    renderer: *const (dyn Renderer + 'static),
}

thread_local! {
    static ACTIVE: Cell<Option<ActiveConsumer>> = const { Cell::new(None) };
}

/// Marks the current thread as the consumer of one engine while alive.
struct ConsumerScope {
    previous: Option<ActiveConsumer>,
}

impl ConsumerScope {
    fn enter(engine: &Shared, renderer: &(dyn Renderer + 'static)) -> Self {
        let active = ActiveConsumer {
            engine,
            renderer,
        };
        let previous = ACTIVE.with(|cell| cell.replace(Some(active)));
        Self { previous }
    }
}

impl Drop for ConsumerScope {
    fn drop(&mut self) {
        ACTIVE.with(|cell| cell.set(self.previous));
    }
}

/// Whether the calling thread is currently executing `engine`'s commands.
pub(crate) fn on_consumer_thread(engine: &Shared) -> bool {
    ACTIVE.with(|cell| {
        cell.get()
            .is_some_and(|active| ptr::eq(active.engine, engine))
    })
}

/// Run `f` against `engine`'s backend if the calling thread is its consumer.
pub(crate) fn with_consumer_renderer<R>(
    engine: &Shared,
    f: impl FnOnce(&dyn Renderer) -> R,
) -> Option<R> {
    let active = ACTIVE.with(Cell::get).filter(|active| ptr::eq(active.engine, engine))?;
    // SAFETY: the pointer was installed by a `ConsumerScope` on this thread
    // that borrows the backend and is still alive (it resets the slot on
    // drop), and `Renderer` methods only need shared access.
    Some(f(unsafe { &*active.renderer }))
}

/// Borrowed view of the consumer state for one drain.
struct Queue<'a> {
    renderer: &'a (dyn Renderer + 'static),
    ring: &'a mut RingConsumer,
    refs: &'a mut RefConsumer,
    spans: &'a mut SpanConsumer,
    table: &'a CommandTable,
    shared: &'a Shared,
}

impl Queue<'_> {
    fn service_interrupt(&self) -> bool {
        self.shared.interrupt.service(self.renderer)
    }

    fn execute_front(&mut self) -> bool {
        let Some((index, slot)) = self.ring.front() else {
            return false;
        };
        let mut ctx = ExecContext {
            renderer: self.renderer,
            refs: &mut *self.refs,
            spans: &mut *self.spans,
            buffers: &self.shared.buffers,
            sync: &self.shared.sync,
            frame_gate: &self.shared.frame_gate,
            stats: &self.shared.stats,
        };
        self.table.dispatch(slot, &mut ctx);
        self.shared.stats.inc_commands_executed();
        self.ring.advance();
        self.shared.complete_invoke(index);
        true
    }

    /// Execute everything queued, servicing interrupts between commands.
    fn drain(&mut self) -> usize {
        let mut executed = 0;
        loop {
            self.service_interrupt();
            if !self.execute_front() {
                break;
            }
            executed += 1;
        }
        if executed > 0 {
            trace!(executed, "drained command batch");
        }
        executed
    }

    fn discard(&mut self) -> usize {
        let dropped = self.ring.clear();
        self.refs.clear();
        dropped
    }
}

/// Owns the backend and the consumer ends of the ring, reference table and
/// span pool.
///
/// Obtained from `ThreadedRenderer::new`. Either hand it to a thread with
/// [`BackendWorker::run`] or pump it by hand with [`BackendWorker::step`].
/// Dropping it without running ends the engine as `run` would.
pub struct BackendWorker<B: Renderer + 'static> {
    backend: B,
    ring: RingConsumer,
    refs: RefConsumer,
    spans: SpanConsumer,
    table: CommandTable,
    shared: Arc<Shared>,
    finished: bool,
}

impl<B: Renderer + 'static> BackendWorker<B> {
    pub(crate) fn new(
        backend: B,
        ring: RingConsumer,
        refs: RefConsumer,
        spans: SpanConsumer,
        table: CommandTable,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            backend,
            ring,
            refs,
            spans,
            table,
            shared,
            finished: false,
        }
    }

    fn with_queue<R>(&mut self, f: impl FnOnce(&mut Queue<'_>) -> R) -> R {
        let Self {
            backend,
            ring,
            refs,
            spans,
            table,
            shared,
            ..
        } = self;
        let renderer: &(dyn Renderer + 'static) = &*backend;
        let _scope = ConsumerScope::enter(shared, renderer);
        let mut queue = Queue {
            renderer,
            ring,
            refs,
            spans,
            table,
            shared,
        };
        f(&mut queue)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Commands published and not yet executed.
    pub fn pending(&self) -> usize {
        self.ring.pending()
    }

    pub fn interrupt_pending(&self) -> bool {
        self.shared.interrupt.is_pending()
    }

    /// Run a pending interrupt, then at most one command. Returns whether a
    /// command was executed.
    pub fn step(&mut self) -> bool {
        self.with_queue(|queue| {
            queue.service_interrupt();
            queue.execute_front()
        })
    }

    /// Execute everything currently queued. Returns how many commands ran.
    pub fn process_pending(&mut self) -> usize {
        self.with_queue(|queue| queue.drain())
    }

    /// The consumer loop. Returns once the producer has shut the engine down
    /// and the remaining commands have been handled per the shutdown policy.
    pub fn run(mut self) {
        self.shared.advance(EngineState::Running);
        info!(
            thread = ?std::thread::current().name(),
            "backend worker started"
        );

        let shared = Arc::clone(&self.shared);
        self.with_queue(|queue| {
            while shared.state() < EngineState::ShuttingDown {
                shared.work_available.wait();
                queue.drain();
            }
        });
        self.finish();
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let policy = self.shared.shutdown_policy;
        let shared = Arc::clone(&self.shared);
        self.with_queue(|queue| {
            match policy {
                ShutdownPolicy::Drain => {
                    let executed = queue.drain();
                    debug!(executed, "drained remaining commands at shutdown");
                }
                ShutdownPolicy::Discard => {
                    let dropped = queue.discard();
                    shared.stats.add_commands_discarded(dropped as u64);
                    debug!(dropped, "discarded remaining commands at shutdown");
                }
            }
            shared.advance(EngineState::Stopped);
            queue.service_interrupt();
        });

        self.backend.dispose();
        self.shared.release_waiters();
        info!(
            stats = %self.shared.stats.to_json(),
            "backend worker stopped"
        );
    }
}

impl<B: Renderer + 'static> Drop for BackendWorker<B> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if std::thread::panicking() {
            self.finished = true;
            self.shared.abandon();
        } else {
            self.finish();
        }
    }
}
