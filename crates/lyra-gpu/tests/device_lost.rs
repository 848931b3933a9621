//! Device-lost recovery on the worker thread.

mod common;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{fixture, fixture_with_config, software_settings};
use lyra_gpu::GpuThreadConfig;
use lyra_gpu_device::sim::{SIM_CMD_NOP, SIM_CMD_PRESENT};
use lyra_gpu_device::{PresentResult, RendererKind};

#[test]
fn device_lost_rebuilds_device_and_backend() {
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    fx.sim.push_present_result(PresentResult::DeviceLost);
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_PRESENT, &[], false);

    assert_eq!(fx.sim.devices_created.load(Ordering::SeqCst), 2);
    assert_eq!(fx.sim.devices_destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(fx.sim.backends_created.load(Ordering::SeqCst), 2);
    assert!(fx
        .host
        .osd_warning_keys()
        .contains(&"HostGPUDeviceLost".to_owned()));

    // The rebuilt worker keeps dispatching.
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_NOP, &[], false);
    assert!(fx.sim.handled_command_kinds().contains(&SIM_CMD_NOP));

    fx.gpu.shutdown();
}

#[test]
fn second_loss_within_the_reset_interval_is_fatal() {
    // Default 15s gate: the second loss lands well inside it.
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    fx.sim.push_present_result(PresentResult::DeviceLost);
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_PRESENT, &[], false);
    assert_eq!(fx.sim.devices_created.load(Ordering::SeqCst), 2);

    // The second loss must kill the worker instead of reset-looping. The
    // submission is non-blocking; the panic surfaces through the join.
    fx.sim.push_present_result(PresentResult::DeviceLost);
    fx.gpu.submit_backend_command_and_wake(SIM_CMD_PRESENT, &[]);
    std::thread::sleep(Duration::from_millis(100));

    let shutdown = catch_unwind(AssertUnwindSafe(|| fx.gpu.shutdown()));
    assert!(
        shutdown.is_err(),
        "second loss inside the reset interval must be fatal"
    );
    assert!(!fx.gpu.is_started());
    // The storm was cut short: no third device, no second recovery warning.
    assert_eq!(fx.sim.devices_created.load(Ordering::SeqCst), 2);
    assert_eq!(fx.host.osd_warning_keys().len(), 1);
}

#[test]
fn spaced_device_losses_recover_repeatedly() {
    // A short reset interval lets the test exercise two full recoveries.
    let mut fx = fixture_with_config(GpuThreadConfig {
        device_reset_interval: Duration::from_millis(50),
        ..GpuThreadConfig::default()
    });
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    fx.sim.push_present_result(PresentResult::DeviceLost);
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_PRESENT, &[], false);
    assert_eq!(fx.sim.devices_created.load(Ordering::SeqCst), 2);

    std::thread::sleep(Duration::from_millis(60));

    fx.sim.push_present_result(PresentResult::DeviceLost);
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_PRESENT, &[], false);
    assert_eq!(fx.sim.devices_created.load(Ordering::SeqCst), 3);
    assert_eq!(fx.host.osd_warning_keys().len(), 2);

    fx.gpu.shutdown();
}

#[test]
fn present_errors_other_than_loss_do_not_rebuild() {
    let mut fx = fixture();
    fx.gpu
        .start(Some(RendererKind::Software), &software_settings())
        .expect("start");

    fx.sim.push_present_result(PresentResult::Error);
    fx.gpu
        .submit_backend_command_and_sync(SIM_CMD_PRESENT, &[], false);

    assert_eq!(fx.sim.devices_created.load(Ordering::SeqCst), 1);
    assert!(fx.host.osd_warning_keys().is_empty());

    fx.gpu.shutdown();
}
