#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
#[cfg(not(target_arch = "wasm32"))]
use gal::soft::RecordingRenderer;
#[cfg(not(target_arch = "wasm32"))]
use gal_threaded::commands::Draw;
#[cfg(not(target_arch = "wasm32"))]
use gal_threaded::dispatch::{encode, CommandTable};
#[cfg(not(target_arch = "wasm32"))]
use gal_threaded::ring::command_ring;
#[cfg(not(target_arch = "wasm32"))]
use gal_threaded::span_pool::span_pool;
#[cfg(not(target_arch = "wasm32"))]
use gal_threaded::{GalConfig, GalStats, ThreadedRenderer};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("GAL_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(150))
            .measurement_time(Duration::from_millis(400))
            .sample_size(20)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(50)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_ring_encode(c: &mut Criterion) {
    const COMMANDS: u32 = 4096;
    let slot_size = CommandTable::standard().slot_size();

    let mut group = c.benchmark_group("command_ring");
    group.throughput(criterion::Throughput::Elements(COMMANDS as u64));
    group.bench_function("encode_publish_consume", |b| {
        let (mut producer, mut consumer) = command_ring(8192, slot_size);
        b.iter(|| {
            for i in 0..COMMANDS {
                let mut slot = producer.allocate();
                encode(
                    slot.bytes_mut(),
                    &Draw {
                        vertex_count: black_box(i),
                        instance_count: 1,
                        first_vertex: 0,
                        first_instance: 0,
                    },
                );
                slot.publish();
            }
            while let Some((_, bytes)) = consumer.front() {
                black_box(bytes[slot_size - 1]);
                consumer.advance();
            }
        });
    });
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_span_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("span_pool");
    for size in [16usize, 256, 4096] {
        let payload = vec![0x5Au8; size];
        group.throughput(criterion::Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("insert_take", size), &payload, |b, payload| {
            let (mut producer, mut consumer) = span_pool(1 << 20, Arc::new(GalStats::new()));
            b.iter(|| {
                let span = producer.insert(black_box(payload));
                black_box(consumer.take(span).len());
            });
        });
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_threaded_draws(c: &mut Criterion) {
    let mut group = c.benchmark_group("threaded_renderer");
    for draws in [256u32, 4096] {
        group.throughput(criterion::Throughput::Elements(draws as u64));
        group.bench_with_input(BenchmarkId::new("draw_flush", draws), &draws, |b, &draws| {
            b.iter_batched(
                || ThreadedRenderer::spawn(GalConfig::default(), RecordingRenderer::new()).unwrap(),
                |mut renderer| {
                    for i in 0..draws {
                        renderer.draw(black_box(i), 1, 0, 0);
                    }
                    renderer.flush().unwrap();
                    renderer
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_ring_encode, bench_span_pool, bench_threaded_draws
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
