//! `gal-threaded` runs a [`gal::Renderer`] backend on a dedicated thread.
//!
//! The producer (typically the emulated GPU's command processor) talks to a
//! [`ThreadedRenderer`]. Every call is serialized into a fixed-size slot of a
//! single-producer / single-consumer ring and executed later, in order, by the
//! [`BackendWorker`] that owns the real backend.
//!
//! Building blocks, leaves first:
//! - [`ref_table`]: side table for owned objects that cannot travel as bytes.
//! - [`span_pool`]: circular arena for variable-length payloads.
//! - [`handle_map`]: virtual buffer handles and sync fence ids that resolve
//!   asynchronously on the backend thread.
//! - [`dispatch`] and [`commands`]: the command catalogue and the tag ->
//!   execute function table.
//! - [`ring`]: the command ring itself.
//! - [`ThreadedRenderer`] / [`BackendWorker`]: the orchestrator.
//!
//! Capacity exhaustion is backpressure (the producer waits), protocol misuse
//! panics, and backend failures are passed through to whoever asked for a
//! result.

pub mod commands;
pub mod config;
pub mod dispatch;
mod engine;
mod error;
pub mod handle_map;
pub mod ref_table;
mod result_box;
pub mod ring;
pub mod span_pool;
mod stats;
pub mod sync;
mod texture;
mod worker;

pub use config::{BackendThreading, GalConfig, ShutdownPolicy};
pub use engine::{run_loop, EngineState, InterruptHandle, ThreadedRenderer};
pub use error::{GalError, Result};
pub use handle_map::{BufferMap, SyncMap};
pub use result_box::ResultBox;
pub use stats::{GalStats, GalStatsSnapshot};
pub use texture::ThreadedTexture;
pub use worker::BackendWorker;
