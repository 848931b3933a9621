//! Ordered dispatch, sleep/wake races and drain synchronization.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{fixture, software_settings};
use lyra_gpu_device::RendererKind;
use lyra_gpu_device::sim::SIM_CMD_NOP;

#[test]
fn async_calls_dispatch_in_submission_order() {
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..1000u32 {
        let order = Arc::clone(&order);
        fx.gpu.run_on_thread(move |_worker| {
            order.lock().unwrap().push(i);
        });
    }
    fx.gpu.sync(false);

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, (0..1000).collect::<Vec<_>>());

    fx.gpu.shutdown();
}

#[test]
fn submission_racing_the_worker_to_sleep_is_never_lost() {
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    // Each iteration syncs, so the worker is transitioning toward sleep right
    // as the next record is committed.
    let counter = Arc::new(AtomicU32::new(0));
    for i in 0..500u32 {
        let thread_counter = Arc::clone(&counter);
        fx.gpu.run_on_thread(move |_worker| {
            thread_counter.fetch_add(1, Ordering::SeqCst);
        });
        fx.gpu.sync(i % 2 == 0);
        assert_eq!(counter.load(Ordering::SeqCst), i + 1);
    }

    fx.gpu.shutdown();
}

#[test]
fn sync_with_spin_falls_back_to_blocking() {
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    let slept = Arc::new(AtomicBool::new(false));
    {
        let slept = Arc::clone(&slept);
        fx.gpu.run_on_thread(move |_worker| {
            std::thread::sleep(Duration::from_millis(50));
            slept.store(true, Ordering::SeqCst);
        });
    }

    // The 50ms call outlives any spin window, so the sync must block on the
    // semaphore and still only return once both records are drained.
    let started = Instant::now();
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_NOP, &[], true);
    let elapsed = started.elapsed();

    assert!(slept.load(Ordering::SeqCst));
    assert_eq!(fx.sim.handled_command_kinds(), vec![SIM_CMD_NOP]);
    assert!(elapsed >= Duration::from_millis(50), "elapsed {elapsed:?}");

    fx.gpu.shutdown();
}

#[test]
fn run_idle_presents_at_a_throttled_cadence() {
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    fx.gpu.set_run_idle(true);
    // Re-presenting explicitly is pointless while the idle loop runs.
    fx.gpu.present_current_frame();
    std::thread::sleep(Duration::from_millis(100));
    fx.gpu.set_run_idle(false);
    fx.gpu.sync(false);

    let presents = fx.sim.backend_presents.load(Ordering::SeqCst);
    assert!(presents > 0, "idle loop never presented");
    // A 1ms throttle bounds the cadence; an unthrottled busy loop would be
    // orders of magnitude above this.
    assert!(presents <= 2000, "idle loop ran unthrottled: {presents}");

    fx.gpu.shutdown();
}

#[test]
fn startup_failure_is_reported_and_thread_joins() {
    let mut fx = fixture();
    let settings = software_settings();
    fx.sim
        .fail_next_device_create(lyra_gpu_device::RenderApi::preferred());

    let err = fx.gpu.start(None, &settings).expect_err("start must fail");
    assert!(matches!(
        err,
        lyra_gpu::GpuThreadError::DeviceCreationFailed { .. }
    ));
    assert!(!fx.gpu.is_started());
    assert!(fx.host.released_windows.load(Ordering::SeqCst) >= 1);

    // The scripted failure is consumed; a retry succeeds.
    fx.gpu.start(None, &settings).expect("second start");
    assert!(fx.gpu.is_started());
    fx.gpu.shutdown();
}

#[test]
fn worker_survives_restart_cycles() {
    let mut fx = fixture();
    let settings = software_settings();

    for _ in 0..3 {
        fx.gpu.start(None, &settings).expect("start");
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            fx.gpu.run_on_thread(move |_worker| {
                ran.store(true, Ordering::SeqCst);
            });
        }
        fx.gpu.sync(false);
        assert!(ran.load(Ordering::SeqCst));
        fx.gpu.shutdown();
        assert!(!fx.gpu.is_started());
    }
}
