//! Producer-side handle: thread startup/shutdown and command submission.
//!
//! The single-producer contract is carried by the API: every submission
//! operation takes `&mut self`, so exactly one thread can feed the worker at
//! a time.

use std::path::PathBuf;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use lyra_gpu_device::{
    BackendFactory, DeviceFactory, GpuSettings, RenderApi, RendererKind, UiFactory, VsyncMode,
    FIRST_BACKEND_COMMAND_KIND,
};

use crate::error::GpuThreadError;
use crate::fifo::{kind, DEFAULT_FIFO_SIZE};
use crate::host::Host;
use crate::state::SharedState;
use crate::worker::GpuWorker;

/// Bytes that may pile up before a best-effort push wakes the worker.
pub const DEFAULT_WAKE_THRESHOLD: u32 = 256;

#[derive(Clone, Debug)]
pub struct GpuThreadConfig {
    /// Command ring capacity in bytes; must be a multiple of 4.
    pub fifo_size: u32,
    /// Pending-byte threshold for best-effort wakes.
    pub wake_threshold: u32,
    /// How long a spinning sync polls before blocking on the semaphore.
    pub sync_spin_window: Duration,
    /// Shader cache directory handed to the device, if any.
    pub shader_cache_path: Option<PathBuf>,
    /// Minimum spacing between device-lost resets; a faster loss is fatal.
    pub device_reset_interval: Duration,
}

impl Default for GpuThreadConfig {
    fn default() -> Self {
        Self {
            fifo_size: DEFAULT_FIFO_SIZE,
            wake_threshold: DEFAULT_WAKE_THRESHOLD,
            sync_spin_window: Duration::from_micros(100),
            shader_cache_path: None,
            device_reset_interval: Duration::from_secs(15),
        }
    }
}

/// Handle owned by the producer (emulation) thread.
///
/// Spawns and joins the worker, carves commands out of the shared ring and
/// coordinates wakeups. Dropping the handle shuts the worker down.
pub struct GpuThread {
    shared: Arc<SharedState>,
    host: Arc<dyn Host>,
    device_factory: Arc<dyn DeviceFactory>,
    backend_factory: Arc<dyn BackendFactory>,
    ui_factory: Arc<dyn UiFactory>,
    config: GpuThreadConfig,
    handle: Option<JoinHandle<()>>,
}

impl GpuThread {
    pub fn new(
        host: Arc<dyn Host>,
        device_factory: Arc<dyn DeviceFactory>,
        backend_factory: Arc<dyn BackendFactory>,
        ui_factory: Arc<dyn UiFactory>,
        config: GpuThreadConfig,
    ) -> Self {
        let shared = Arc::new(SharedState::new(
            config.fifo_size,
            config.wake_threshold,
            config.sync_spin_window,
        ));
        Self {
            shared,
            host,
            device_factory,
            backend_factory,
            ui_factory,
            config,
            handle: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// The API of the live device, published by the worker.
    pub fn render_api(&self) -> Option<RenderApi> {
        fence(Ordering::Acquire);
        self.shared.render_api()
    }

    pub fn requested_renderer(&self) -> Option<RendererKind> {
        self.shared.requested_renderer()
    }

    pub fn was_fullscreen_ui_requested(&self) -> bool {
        self.shared.start_fullscreen_ui.load(Ordering::Relaxed)
    }

    /// Spawns the worker, creates the device (and backend, when `renderer` is
    /// set) on it, and blocks until the worker reports ready.
    pub fn start(
        &mut self,
        renderer: Option<RendererKind>,
        settings: &GpuSettings,
    ) -> Result<(), GpuThreadError> {
        assert!(!self.is_started(), "GPU thread already started");

        info!("Starting GPU thread...");
        self.shared.store_requested_renderer(renderer);
        self.shared.publish_gpu_usage(0.0);
        self.shared.publish_average_gpu_time(0.0);
        self.shared
            .perf_counters_updated
            .store(false, Ordering::Relaxed);
        self.shared.shutdown_flag.store(false, Ordering::Release);
        self.shared.run_idle_flag.store(false, Ordering::Release);

        let mut worker = GpuWorker::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.host),
            Arc::clone(&self.device_factory),
            Arc::clone(&self.backend_factory),
            self.ui_factory.create_ui(),
            settings.clone(),
            self.config.shader_cache_path.clone(),
            self.config.device_reset_interval,
        );
        self.handle = Some(
            thread::Builder::new()
                .name("GPUThread".into())
                .spawn(move || worker.run())?,
        );

        self.shared.start_sem.wait();

        if !self.shared.open_flag.load(Ordering::Acquire) {
            error!("Failed to create GPU thread.");
            let err = self
                .shared
                .take_open_error()
                .unwrap_or(GpuThreadError::StartFailed);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            return Err(err);
        }

        debug!("GPU thread started.");
        Ok(())
    }

    /// Starts the worker with the fullscreen UI and no renderer backend, or
    /// initializes the fullscreen UI on an already-running worker.
    pub fn start_fullscreen_ui(&mut self, settings: &GpuSettings) -> Result<(), GpuThreadError> {
        if self.is_started() {
            self.shared.run_on_thread(Box::new(|worker: &mut GpuWorker| {
                if let Err(err) = worker.initialize_fullscreen_ui() {
                    panic!("Failed to initialize fullscreen UI: {err}");
                }
            }));
            return Ok(());
        }

        self.shared.start_fullscreen_ui.store(true, Ordering::Relaxed);
        if let Err(err) = self.start(None, settings) {
            self.shared
                .start_fullscreen_ui
                .store(false, Ordering::Relaxed);
            return Err(err);
        }
        Ok(())
    }

    /// Creates (or replaces) the renderer backend. Starts the worker first if
    /// needed.
    pub fn create_backend(
        &mut self,
        renderer: RendererKind,
        settings: &GpuSettings,
    ) -> Result<(), GpuThreadError> {
        if self.is_started() {
            self.shared.store_requested_renderer(Some(renderer));
            fence(Ordering::Release);
            self.shared.push_control_and_sync(kind::CHANGE_BACKEND, false);
            Ok(())
        } else {
            self.start(Some(renderer), settings)
        }
    }

    /// Switches renderers. With `force_recreate_device` the worker is torn
    /// down and restarted; otherwise the swap happens in place.
    pub fn switch_backend(
        &mut self,
        renderer: RendererKind,
        force_recreate_device: bool,
        settings: &GpuSettings,
    ) -> Result<(), GpuThreadError> {
        if !force_recreate_device {
            assert!(self.is_started(), "GPU thread is not running");
            self.shared.store_requested_renderer(Some(renderer));
            fence(Ordering::Release);
            self.shared.push_control_and_sync(kind::CHANGE_BACKEND, false);
            return Ok(());
        }

        let was_running_fullscreen_ui =
            self.shared.start_fullscreen_ui.load(Ordering::Relaxed);
        self.shutdown();
        self.shared
            .start_fullscreen_ui
            .store(was_running_fullscreen_ui, Ordering::Relaxed);
        if let Err(err) = self.start(Some(renderer), settings) {
            self.shared.store_requested_renderer(None);
            self.shared
                .start_fullscreen_ui
                .store(false, Ordering::Relaxed);
            return Err(err);
        }
        Ok(())
    }

    /// Tears down the backend. Keeps the worker alive when the fullscreen UI
    /// is up; shuts it down entirely otherwise.
    pub fn destroy_backend(&mut self) {
        if !self.is_started() {
            return;
        }

        if self.shared.start_fullscreen_ui.load(Ordering::Relaxed) {
            debug!("Keeping GPU thread open for fullscreen UI");
            self.shared.store_requested_renderer(None);
            fence(Ordering::Release);
            self.shared.push_control_and_sync(kind::CHANGE_BACKEND, false);
            return;
        }

        self.shutdown();
    }

    /// Cooperative shutdown: flag, wake, join. Panics from the worker are
    /// propagated.
    pub fn shutdown(&mut self) {
        self.shutdown_impl(true);
    }

    fn shutdown_impl(&mut self, propagate_panic: bool) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.shared.shutdown_flag.store(true, Ordering::Release);
        self.shared
            .start_fullscreen_ui
            .store(false, Ordering::Relaxed);
        self.shared.store_requested_renderer(None);
        self.shared.wake.wake_consumer();

        match handle.join() {
            Ok(()) => info!("GPU thread stopped."),
            Err(payload) => {
                if propagate_panic {
                    std::panic::resume_unwind(payload);
                }
                error!("GPU thread panicked during shutdown.");
            }
        }
    }

    /// Runs `f` on the worker thread, after all previously submitted
    /// commands.
    pub fn run_on_thread<F>(&mut self, f: F)
    where
        F: FnOnce(&mut GpuWorker) + Send + 'static,
    {
        assert!(self.is_started(), "GPU thread is not running");
        self.shared.run_on_thread(Box::new(f));
    }

    /// Publishes a fresh settings snapshot and applies it on the worker.
    pub fn update_settings(&mut self, settings: &GpuSettings) {
        assert!(self.is_started(), "GPU thread is not running");
        let snapshot = settings.clone();
        self.shared
            .run_on_thread(Box::new(move |worker: &mut GpuWorker| {
                worker.apply_settings(snapshot)
            }));
    }

    pub fn resize_display_window(&mut self, width: u32, height: u32, scale: f32) {
        assert!(self.is_started(), "GPU thread is not running");
        self.shared
            .run_on_thread(Box::new(move |worker: &mut GpuWorker| {
                worker.handle_resize_display_window(width, height, scale)
            }));
    }

    pub fn update_display_window(&mut self) {
        assert!(self.is_started(), "GPU thread is not running");
        self.shared
            .run_on_thread(Box::new(|worker: &mut GpuWorker| {
                worker.handle_update_display_window()
            }));
    }

    /// Requests a vsync mode change; no-op when nothing changed.
    pub fn set_vsync(&mut self, mode: VsyncMode, allow_present_throttle: bool) {
        assert!(self.is_started(), "GPU thread is not running");

        if self.shared.requested_vsync() == mode
            && self.shared.requested_allow_throttle() == allow_present_throttle
        {
            return;
        }

        self.shared.store_requested_vsync(mode, allow_present_throttle);
        fence(Ordering::Release);
        self.shared.push_control_and_wake(kind::UPDATE_VSYNC);
    }

    /// Re-presents the current frame once. No-op while running idle: the idle
    /// loop re-presents anyway.
    pub fn present_current_frame(&mut self) {
        if self.shared.run_idle_flag.load(Ordering::Relaxed) {
            return;
        }
        assert!(self.is_started(), "GPU thread is not running");
        self.shared
            .run_on_thread(Box::new(|worker: &mut GpuWorker| {
                worker.present_frame(false, None)
            }));
    }

    /// Controls whether the worker presents and throttles on an empty queue
    /// instead of sleeping.
    pub fn set_run_idle(&mut self, enabled: bool) {
        self.shared.run_idle_flag.store(enabled, Ordering::Release);
        debug!(
            "GPU thread now {} idle",
            if enabled { "running" } else { "NOT running" }
        );
    }

    /// Last published GPU usage indicator (0-100 scale).
    pub fn gpu_usage(&self) -> f32 {
        self.shared.gpu_usage()
    }

    /// Last published average GPU time per frame in milliseconds.
    pub fn gpu_average_time(&self) -> f32 {
        self.shared.average_gpu_time()
    }

    /// Forces the next present to refresh the performance counters.
    pub fn set_performance_counter_update_pending(&self) {
        self.shared
            .perf_counters_updated
            .store(false, Ordering::Release);
    }

    /// Best-effort submission of a backend command; the worker is only woken
    /// once enough bytes are pending.
    pub fn submit_backend_command(&mut self, command_kind: u32, payload: &[u8]) {
        self.check_backend_command(command_kind);
        self.shared.submit_backend_command(command_kind, payload, false);
    }

    /// Submits a backend command and wakes the worker immediately.
    pub fn submit_backend_command_and_wake(&mut self, command_kind: u32, payload: &[u8]) {
        self.check_backend_command(command_kind);
        self.shared.submit_backend_command(command_kind, payload, true);
    }

    /// Submits a backend command and blocks until the worker drained it.
    pub fn submit_backend_command_and_sync(
        &mut self,
        command_kind: u32,
        payload: &[u8],
        spin: bool,
    ) {
        self.check_backend_command(command_kind);
        self.shared
            .submit_backend_command_and_sync(command_kind, payload, spin);
    }

    /// Blocks until every previously submitted command has been dispatched.
    pub fn sync(&mut self, spin: bool) {
        assert!(self.is_started(), "GPU thread is not running");
        // Best-effort pushes below the wake threshold leave the wake count
        // untouched; bump it so a sleeping worker cannot be mistaken for a
        // drained one while records are still queued.
        self.shared.wake.wake_consumer();
        self.shared.wake.sync(spin);
    }

    fn check_backend_command(&self, command_kind: u32) {
        assert!(self.is_started(), "GPU thread is not running");
        assert!(
            command_kind >= FIRST_BACKEND_COMMAND_KIND,
            "command kind {command_kind:#x} is reserved"
        );
    }
}

impl Drop for GpuThread {
    fn drop(&mut self) {
        self.shutdown_impl(false);
    }
}
