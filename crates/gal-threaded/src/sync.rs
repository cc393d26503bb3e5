//! Blocking primitives shared by the producer and the backend thread.

#[cfg(all(feature = "loom", test))]
use loom::sync::{Condvar, Mutex};
#[cfg(not(all(feature = "loom", test)))]
use std::sync::{Condvar, Mutex};

#[cfg(not(all(feature = "loom", test)))]
use std::time::Duration;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// A panic on the backend thread must not wedge the producer: every waiter
/// still needs to observe the shutdown that follows it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Auto-reset event.
///
/// `set` makes the event signalled; exactly one `wait` consumes the signal and
/// resets it. Setting an already signalled event is a no-op, so signals do not
/// accumulate.
#[derive(Debug)]
pub struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new(initially_set: bool) -> Self {
        Self {
            signalled: Mutex::new(initially_set),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signalled = self.lock_signal();
        *signalled = true;
        self.cond.notify_one();
    }

    pub fn wait(&self) {
        let mut signalled = self.lock_signal();
        while !*signalled {
            signalled = match self.cond.wait(signalled) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *signalled = false;
    }

    /// Returns `true` if the event was consumed, `false` on timeout.
    #[cfg(not(all(feature = "loom", test)))]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock_signal();
        let (mut signalled, _) = match self
            .cond
            .wait_timeout_while(guard, timeout, |signalled| !*signalled)
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *signalled, false)
    }

    pub fn is_set(&self) -> bool {
        *self.lock_signal()
    }

    #[cfg(not(all(feature = "loom", test)))]
    fn lock_signal(&self) -> std::sync::MutexGuard<'_, bool> {
        lock(&self.signalled)
    }

    #[cfg(all(feature = "loom", test))]
    fn lock_signal(&self) -> loom::sync::MutexGuard<'_, bool> {
        match self.signalled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Escalating wait used where the producer polls for space.
///
/// Spins with exponentially growing bursts, then yields the thread, then
/// sleeps in short intervals.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    #[cfg(not(all(feature = "loom", test)))]
    const SLEEP: Duration = Duration::from_micros(100);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                core::hint::spin_loop();
            }
        } else if self.step <= Self::YIELD_LIMIT {
            yield_now();
        } else {
            sleep();
        }
        if self.step <= Self::YIELD_LIMIT {
            self.step += 1;
        }
    }

    /// `true` once spinning and yielding have both been exhausted and
    /// `snooze` has started sleeping.
    pub fn is_completed(&self) -> bool {
        self.step > Self::YIELD_LIMIT
    }
}

#[cfg(all(feature = "loom", test))]
fn yield_now() {
    loom::thread::yield_now();
}

#[cfg(not(all(feature = "loom", test)))]
fn yield_now() {
    std::thread::yield_now();
}

#[cfg(all(feature = "loom", test))]
fn sleep() {
    loom::thread::yield_now();
}

#[cfg(not(all(feature = "loom", test)))]
fn sleep() {
    std::thread::sleep(Backoff::SLEEP);
}
