//! Shared helpers for `gal-threaded` integration tests.

#![allow(dead_code)]

use std::sync::Once;

use gal::soft::RecordedCall;
use gal_threaded::GalConfig;

/// Install a test-friendly `tracing` subscriber once per test binary.
///
/// Honors `RUST_LOG`-style filtering through `GAL_TEST_LOG` so a failing test
/// can be rerun with engine logs without touching the code.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = match std::env::var("GAL_TEST_LOG").as_deref() {
            Ok("trace") => tracing::Level::TRACE,
            Ok("debug") => tracing::Level::DEBUG,
            Ok("info") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .try_init();
    });
}

/// A config small enough that tests hit wraparound and backpressure.
pub fn small_config(queue_capacity: usize) -> GalConfig {
    GalConfig {
        queue_capacity,
        span_pool_bytes: 256,
        ..GalConfig::default()
    }
}

pub fn draw_call(vertex_count: u32) -> RecordedCall {
    RecordedCall::Draw {
        vertex_count,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    }
}
