use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one threaded engine.
///
/// Updated from both the producer and the backend thread with relaxed
/// atomics; a snapshot is only a best-effort view while the engine runs.
#[derive(Debug, Default)]
pub struct GalStats {
    commands_submitted: AtomicU64,
    commands_executed: AtomicU64,
    commands_discarded: AtomicU64,
    invokes: AtomicU64,
    interrupts: AtomicU64,
    queue_stalls: AtomicU64,
    span_pool_stalls: AtomicU64,
    span_bytes: AtomicU64,
    span_overflows: AtomicU64,
    frames_presented: AtomicU64,
}

impl GalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_commands_submitted(&self) {
        self.commands_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_commands_executed(&self) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_commands_discarded(&self, count: u64) {
        self.commands_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_invokes(&self) {
        self.invokes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_interrupts(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    /// The producer found the command ring full.
    pub fn inc_queue_stalls(&self) {
        self.queue_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_span_pool_stalls(&self) {
        self.span_pool_stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_span_bytes(&self, bytes: u64) {
        self.span_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// A payload larger than the whole span pool went to the heap instead.
    pub fn inc_span_overflows(&self) {
        self.span_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_frames_presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GalStatsSnapshot {
        GalStatsSnapshot {
            commands_submitted: self.commands_submitted.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            commands_discarded: self.commands_discarded.load(Ordering::Relaxed),
            invokes: self.invokes.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            queue_stalls: self.queue_stalls.load(Ordering::Relaxed),
            span_pool_stalls: self.span_pool_stalls.load(Ordering::Relaxed),
            span_bytes: self.span_bytes.load(Ordering::Relaxed),
            span_overflows: self.span_overflows.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> String {
        self.snapshot().to_json()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GalStatsSnapshot {
    pub commands_submitted: u64,
    pub commands_executed: u64,
    pub commands_discarded: u64,
    pub invokes: u64,
    pub interrupts: u64,
    pub queue_stalls: u64,
    pub span_pool_stalls: u64,
    pub span_bytes: u64,
    pub span_overflows: u64,
    pub frames_presented: u64,
}

impl GalStatsSnapshot {
    /// Commands submitted but neither executed nor discarded yet.
    pub fn in_flight(&self) -> u64 {
        self.commands_submitted
            .saturating_sub(self.commands_executed)
            .saturating_sub(self.commands_discarded)
    }

    pub fn to_json(&self) -> String {
        // Plain struct of integers; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_contains_counters() {
        let stats = GalStats::new();
        stats.inc_commands_submitted();
        stats.inc_commands_submitted();
        stats.inc_commands_executed();
        stats.add_span_bytes(24);
        stats.inc_frames_presented();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.in_flight(), 1);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(json["commands_submitted"], 2);
        assert_eq!(json["commands_executed"], 1);
        assert_eq!(json["span_bytes"], 24);
        assert_eq!(json["frames_presented"], 1);
        assert_eq!(json["queue_stalls"], 0);
    }

    #[test]
    fn discarded_commands_are_not_in_flight() {
        let stats = GalStats::new();
        for _ in 0..5 {
            stats.inc_commands_submitted();
        }
        stats.inc_commands_executed();
        stats.add_commands_discarded(4);
        assert_eq!(stats.snapshot().in_flight(), 0);
    }
}
