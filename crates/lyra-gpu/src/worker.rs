//! The worker-thread side: drain loop and command dispatch.

use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use lyra_gpu_device::{
    Backend, BackendAction, BackendFactory, Device, DeviceFactory, GpuSettings, UiLayer,
    FIRST_BACKEND_COMMAND_KIND,
};

use crate::fifo::{kind, HEADER_SIZE};
use crate::host::Host;
use crate::lifecycle::DeviceResetGate;
use crate::state::SharedState;

/// Callable executed in-band on the worker thread.
pub(crate) type AsyncCall = Box<dyn FnOnce(&mut GpuWorker) + Send>;

/// Worker-thread state: the device, backend and UI layer plus presentation
/// bookkeeping. Owned by the spawned thread; producer-side code only reaches
/// it through async calls.
pub struct GpuWorker {
    pub(crate) shared: Arc<SharedState>,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) device_factory: Arc<dyn DeviceFactory>,
    pub(crate) backend_factory: Arc<dyn BackendFactory>,
    pub(crate) ui: Box<dyn UiLayer>,
    pub(crate) device: Option<Box<dyn Device>>,
    pub(crate) backend: Option<Box<dyn Backend>>,
    pub(crate) settings: GpuSettings,
    pub(crate) shader_cache_path: Option<PathBuf>,
    pub(crate) reset_gate: DeviceResetGate,
    pub(crate) last_perf_update: Instant,
    pub(crate) presents_since_last_update: u32,
    pub(crate) accumulated_gpu_time: f32,
}

impl GpuWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<SharedState>,
        host: Arc<dyn Host>,
        device_factory: Arc<dyn DeviceFactory>,
        backend_factory: Arc<dyn BackendFactory>,
        ui: Box<dyn UiLayer>,
        settings: GpuSettings,
        shader_cache_path: Option<PathBuf>,
        device_reset_interval: Duration,
    ) -> Self {
        Self {
            shared,
            host,
            device_factory,
            backend_factory,
            ui,
            device: None,
            backend: None,
            settings,
            shader_cache_path,
            reset_gate: DeviceResetGate::new(device_reset_interval),
            last_perf_update: Instant::now(),
            presents_since_last_update: 0,
            accumulated_gpu_time: 0.0,
        }
    }

    pub fn device(&self) -> Option<&dyn Device> {
        self.device.as_deref()
    }

    pub fn device_mut(&mut self) -> Option<&mut (dyn Device + '_)> {
        match &mut self.device {
            Some(d) => Some(d.as_mut()),
            None => None,
        }
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn Backend + '_)> {
        match &mut self.backend {
            Some(b) => Some(b.as_mut()),
            None => None,
        }
    }

    pub fn settings(&self) -> &GpuSettings {
        &self.settings
    }

    pub fn host(&self) -> &dyn Host {
        &*self.host
    }

    pub(crate) fn run(&mut self) {
        let shared = Arc::clone(&self.shared);
        let fifo = &shared.fifo;

        let api = shared
            .requested_renderer()
            .unwrap_or(self.settings.renderer)
            .render_api();
        if let Err(err) = self.create_device(api) {
            self.host.release_render_window();
            shared.set_open_error(err);
            shared.open_flag.store(false, Ordering::Release);
            shared.start_sem.post();
            return;
        }

        self.create_backend(true);

        shared.open_flag.store(true, Ordering::Release);
        shared.start_sem.post();

        loop {
            let write_ptr = fifo.acquire_write();
            let mut read_ptr = fifo.read_pos();
            if read_ptr == write_ptr {
                if shared.shutdown_flag.load(Ordering::Relaxed) {
                    break;
                }
                let allow_sleep = !shared.run_idle_flag.load(Ordering::Relaxed);
                if shared.wake.try_sleep(allow_sleep) {
                    // Work was queued (or we just woke up); reload cursors.
                    continue;
                }

                self.present_frame(false, None);
                if let Some(device) = &mut self.device {
                    if !device.is_vsync_blocking() {
                        device.throttle_presentation();
                    }
                }
                continue;
            }

            let mut local_write = if write_ptr < read_ptr {
                fifo.capacity()
            } else {
                write_ptr
            };
            while read_ptr < local_write {
                let header = fifo.header_at(read_ptr);
                let record_offset = read_ptr;
                debug_assert!(read_ptr + header.size <= fifo.capacity());
                read_ptr += header.size;

                match header.kind {
                    kind::WRAPAROUND => {
                        debug_assert_eq!(read_ptr, fifo.capacity());
                        local_write = fifo.acquire_write();
                        read_ptr = 0;
                        // Publish the reset right away so a producer waiting
                        // on tail space unblocks sooner.
                        fifo.store_read(0);
                    }
                    kind::ASYNC_CALL => {
                        // SAFETY: the producer placed an owned callable in
                        // this record; it is moved out here exactly once.
                        let call: AsyncCall = unsafe {
                            ptr::read_unaligned(fifo.payload_ptr_at(record_offset) as *const AsyncCall)
                        };
                        call(&mut *self);
                    }
                    kind::CHANGE_BACKEND => self.change_backend(),
                    kind::UPDATE_VSYNC => self.update_vsync(),
                    command_kind => {
                        debug_assert!(command_kind >= FIRST_BACKEND_COMMAND_KIND);
                        let action = {
                            let backend = self
                                .backend
                                .as_deref_mut()
                                .expect("backend command without a backend");
                            // SAFETY: record is published and the read cursor
                            // has not been stored past it yet.
                            let payload = unsafe {
                                fifo.payload_at(record_offset, header.size - HEADER_SIZE)
                            };
                            backend.handle_command(command_kind, payload)
                        };
                        match action {
                            BackendAction::None => {}
                            BackendAction::PresentFrame {
                                allow_skip,
                                present_time,
                            } => self.present_frame(allow_skip, present_time),
                        }
                    }
                }
            }

            fifo.store_read(read_ptr);
        }

        self.destroy_backend();
        self.destroy_device();
        self.host.release_render_window();
    }

    pub(crate) fn apply_settings(&mut self, settings: GpuSettings) {
        debug!("Updating GPU settings on thread...");
        let old = std::mem::replace(&mut self.settings, settings);
        self.update_settings_on_thread(&old);
    }

    pub(crate) fn update_settings_on_thread(&mut self, old: &GpuSettings) {
        if self.settings.show_gpu_usage != old.show_gpu_usage
            || self.settings.show_gpu_stats != old.show_gpu_stats
        {
            self.shared.perf_counters_updated.store(false, Ordering::Relaxed);
            self.last_perf_update = Instant::now();
            self.presents_since_last_update = 0;
        }

        if self.settings.show_gpu_usage != old.show_gpu_usage {
            self.accumulated_gpu_time = 0.0;
            self.shared.publish_gpu_usage(0.0);
            self.shared.publish_average_gpu_time(0.0);
            if let Some(device) = &mut self.device {
                device.set_gpu_timing_enabled(self.settings.show_gpu_usage);
            }
        }

        if let Some(backend) = &mut self.backend {
            backend.update_settings(old);
        }
    }

    pub(crate) fn handle_resize_display_window(&mut self, width: u32, height: u32, scale: f32) {
        let Some(device) = &mut self.device else {
            return;
        };
        debug!("Display window resized to {}x{}", width, height);
        device.resize_window(width, height, scale);

        let f_width = device.window_width() as f32;
        let f_height = device.window_height() as f32;
        self.ui.window_resized(f_width, f_height);
        self.host.display_window_resized(f_width, f_height);

        // While paused nothing will push a frame, so re-present at the new
        // size. One frame is not always enough to reach the screen.
        if self.host.system_state() == crate::host::SystemState::Paused {
            self.present_frame(false, None);
            self.present_frame(false, None);
        }

        if self.settings.resolution_scale == 0 {
            if let Some(backend) = &mut self.backend {
                backend.update_resolution_scale();
            }
        }
    }

    pub(crate) fn handle_update_display_window(&mut self) {
        let Some(device) = &mut self.device else {
            return;
        };
        if let Err(err) = device.update_window() {
            tracing::error!("Failed to update window: {err}");
            self.host.report_error_async(
                "Error",
                "Failed to change window after update. The log may contain more information.",
            );
            return;
        }

        let f_width = device.window_width() as f32;
        let f_height = device.window_height() as f32;
        self.ui.window_resized(f_width, f_height);
        self.host.display_window_resized(f_width, f_height);

        if self.host.system_state() == crate::host::SystemState::Paused {
            self.present_frame(false, None);
        }
    }
}
