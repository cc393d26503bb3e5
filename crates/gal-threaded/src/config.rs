use serde::{Deserialize, Serialize};

use crate::error::{GalError, Result};

/// The most references any single command in the catalogue takes.
pub const MIN_REFS_PER_COMMAND: usize = 2;

/// Alignment of every span pool allocation.
pub const SPAN_ALIGNMENT: usize = 8;

/// What the backend thread does with commands still queued at shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Execute everything that was submitted before shutdown.
    #[default]
    Drain,
    /// Drop queued commands without executing them.
    Discard,
}

/// Whether a backend should be wrapped in the threaded engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendThreading {
    /// Follow the backend's own preference.
    #[default]
    Auto,
    On,
    Off,
}

impl BackendThreading {
    pub fn should_thread(self, backend_prefers_threading: bool) -> bool {
        match self {
            Self::Auto => backend_prefers_threading,
            Self::On => true,
            Self::Off => false,
        }
    }
}

/// Sizing and behaviour of a threaded engine. All of it is fixed at
/// construction.
///
/// Undersizing does not lose data but can stall the producer for long
/// stretches: the queue must hold a frame's worth of commands and the span
/// pool the payloads of all of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalConfig {
    /// Number of command slots. Must be a power of two; one slot is always
    /// kept empty, so at most `queue_capacity - 1` commands are outstanding.
    pub queue_capacity: usize,
    /// Size of the span pool arena in bytes.
    pub span_pool_bytes: usize,
    /// Reference table entries reserved per command slot.
    pub max_refs_per_command: usize,
    pub shutdown_policy: ShutdownPolicy,
    pub worker_thread_name: String,
}

impl Default for GalConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8192,
            span_pool_bytes: 4 * 1024 * 1024,
            max_refs_per_command: MIN_REFS_PER_COMMAND,
            shutdown_policy: ShutdownPolicy::Drain,
            worker_thread_name: "gal-backend".to_owned(),
        }
    }
}

impl GalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity < 2 || !self.queue_capacity.is_power_of_two() {
            return Err(GalError::InvalidConfig(format!(
                "queue_capacity must be a power of two >= 2 (got {})",
                self.queue_capacity
            )));
        }
        if self.span_pool_bytes == 0 || self.span_pool_bytes % SPAN_ALIGNMENT != 0 {
            return Err(GalError::InvalidConfig(format!(
                "span_pool_bytes must be a non-zero multiple of {SPAN_ALIGNMENT} (got {})",
                self.span_pool_bytes
            )));
        }
        if self.max_refs_per_command < MIN_REFS_PER_COMMAND {
            return Err(GalError::InvalidConfig(format!(
                "max_refs_per_command must be at least {MIN_REFS_PER_COMMAND} (got {})",
                self.max_refs_per_command
            )));
        }
        if self
            .queue_capacity
            .checked_mul(self.max_refs_per_command)
            .is_none()
        {
            return Err(GalError::InvalidConfig(
                "reference table size overflows usize".to_owned(),
            ));
        }
        Ok(())
    }

    /// Reference table capacity. Sized so the table cannot overflow as long
    /// as references are only pushed after their command slot was allocated.
    pub fn reference_table_capacity(&self) -> usize {
        self.queue_capacity * self.max_refs_per_command
    }
}
