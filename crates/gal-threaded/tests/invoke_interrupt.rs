mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gal::soft::{RecordedCall, RecordingRenderer};
use gal::BackendError;
use gal_threaded::{GalError, ThreadedRenderer};

#[test]
fn invoke_observes_every_earlier_command() {
    common::init_tracing();
    let backend = RecordingRenderer::new().with_call_delay(Duration::from_micros(200));
    let log = backend.log();
    let mut renderer = ThreadedRenderer::spawn(common::small_config(8), backend).unwrap();

    const K: u32 = 25;
    for i in 1..=K {
        renderer.draw(i, 1, 0, 0);
    }
    let capabilities = renderer.capabilities();
    assert_eq!(capabilities.vendor_name, "soft");

    let calls = log.calls();
    assert_eq!(calls.len(), K as usize + 1);
    for (i, call) in calls[..K as usize].iter().enumerate() {
        assert_eq!(call, &common::draw_call(i as u32 + 1));
    }
    assert_eq!(calls[K as usize], RecordedCall::Capabilities);
    assert_eq!(renderer.stats().invokes, 1);
    renderer.shutdown().unwrap();
}

#[test]
fn buffer_readback_reflects_queued_writes() {
    common::init_tracing();
    let mut renderer =
        ThreadedRenderer::spawn(common::small_config(16), RecordingRenderer::new()).unwrap();

    let buffer = renderer.create_buffer(32);
    renderer.set_buffer_data(buffer, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
    renderer.copy_buffer(buffer, buffer, 0, 8, 8);
    renderer.clear_buffer(buffer, 16, 8, 0x0403_0201);
    assert_eq!(
        renderer.get_buffer_data(buffer, 0, 24).unwrap(),
        vec![
            1, 2, 3, 4, 5, 6, 7, 8, //
            1, 2, 3, 4, 5, 6, 7, 8, //
            1, 2, 3, 4, 1, 2, 3, 4,
        ]
    );
    assert_eq!(
        renderer.get_buffer_data(buffer, 30, 8),
        Err(BackendError::OutOfBounds {
            offset: 30,
            len: 8,
            size: 32
        })
    );

    renderer.delete_buffer(buffer);
    assert_eq!(
        renderer.get_buffer_data(buffer, 0, 4),
        Err(BackendError::InvalidResource)
    );
    renderer.shutdown().unwrap();
}

#[test]
fn interrupt_runs_before_the_next_queued_command() {
    common::init_tracing();
    let backend = RecordingRenderer::new();
    let log = backend.log();
    let (mut renderer, mut worker) =
        ThreadedRenderer::new(common::small_config(8), backend).unwrap();

    renderer.draw(1, 1, 0, 0);
    renderer.draw(2, 1, 0, 0);
    assert!(worker.step());

    let handle = renderer.interrupt_handle();
    let interrupter = thread::spawn(move || handle.interrupt(|r| r.barrier()));
    for _ in 0..2_000 {
        if worker.interrupt_pending() {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(worker.interrupt_pending());
    assert!(!interrupter.is_finished());

    assert!(worker.step());
    interrupter.join().unwrap().unwrap();
    assert_eq!(
        log.calls(),
        vec![
            common::draw_call(1),
            RecordedCall::Barrier,
            common::draw_call(2),
        ]
    );
    assert_eq!(renderer.stats().interrupts, 1);
}

#[test]
fn interrupt_from_the_backend_thread_runs_inline() {
    common::init_tracing();
    let backend = RecordingRenderer::new();
    let log = backend.log();
    let mut renderer = ThreadedRenderer::spawn(common::small_config(8), backend).unwrap();

    let handle = renderer.interrupt_handle();
    renderer.run_action(move |r| {
        r.draw(1, 1, 0, 0);
        handle.interrupt(|r| r.barrier()).unwrap();
        r.draw(2, 1, 0, 0);
    });
    renderer.flush().unwrap();
    assert_eq!(
        log.calls(),
        vec![
            common::draw_call(1),
            RecordedCall::Barrier,
            common::draw_call(2),
        ]
    );
    renderer.shutdown().unwrap();
}

#[test]
fn concurrent_interrupters_are_serialized() {
    common::init_tracing();
    let backend = RecordingRenderer::new();
    let log = backend.log();
    let mut renderer = ThreadedRenderer::spawn(common::small_config(64), backend).unwrap();
    let counter = Arc::new(AtomicU32::new(0));

    let interrupters: Vec<_> = (0..4)
        .map(|_| {
            let handle = renderer.interrupt_handle();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..25 {
                    let counter = Arc::clone(&counter);
                    handle
                        .interrupt(move |r| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            r.barrier();
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for i in 0..200 {
        renderer.draw(i, 1, 0, 0);
    }
    for interrupter in interrupters {
        interrupter.join().unwrap();
    }
    renderer.flush().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    let calls = log.calls();
    let barriers = calls
        .iter()
        .filter(|call| **call == RecordedCall::Barrier)
        .count();
    assert_eq!(barriers, 100);
    let draws: Vec<_> = calls
        .iter()
        .filter(|call| matches!(call, RecordedCall::Draw { .. }))
        .cloned()
        .collect();
    assert_eq!(draws, (0..200).map(common::draw_call).collect::<Vec<_>>());
    assert_eq!(renderer.stats().interrupts, 100);
    renderer.shutdown().unwrap();
}

#[test]
fn interrupt_after_shutdown_is_refused() {
    common::init_tracing();
    let backend = RecordingRenderer::new();
    let log = backend.log();
    let renderer = ThreadedRenderer::spawn(common::small_config(8), backend).unwrap();
    let handle = renderer.interrupt_handle();
    renderer.shutdown().unwrap();

    assert!(matches!(
        handle.interrupt(|r| r.barrier()),
        Err(GalError::Stopped)
    ));
    assert_eq!(log.calls(), vec![RecordedCall::Dispose]);
}
