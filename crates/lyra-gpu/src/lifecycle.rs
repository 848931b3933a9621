//! Device and backend lifecycle, driven exclusively on the worker thread.

use std::sync::atomic::{fence, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use lyra_gpu_device::{
    Device, DeviceCreateParams, ExclusiveFullscreenControl, FeatureMask, RenderApi, RendererKind,
    UiError,
};

use crate::error::GpuThreadError;
use crate::host::{OsdIcon, OSD_CRITICAL_ERROR_DURATION};
use crate::worker::GpuWorker;

/// Version tag of the on-disk shader cache handed to the device.
pub const SHADER_CACHE_VERSION: u32 = 8;

/// Guards against device-reset storms: a second reset within the interval is
/// treated as an unrecoverable device and aborts.
pub(crate) struct DeviceResetGate {
    min_interval: Duration,
    last_reset: Option<Instant>,
}

impl DeviceResetGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_reset: None,
        }
    }

    /// Records a reset at `now`; returns false if it follows the previous one
    /// too closely.
    pub fn register(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_reset {
            if now.duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_reset = Some(now);
        true
    }
}

impl GpuWorker {
    pub(crate) fn create_device(&mut self, api: RenderApi) -> Result<(), GpuThreadError> {
        debug_assert!(self.device.is_none());

        info!("Trying to create a {} GPU device...", api.name());
        let mut device = match self.device_factory.create_device(api) {
            Ok(device) => device,
            Err(err) => {
                error!("Failed to create GPU device: {err}");
                self.shared.publish_render_api(None);
                fence(Ordering::Release);
                return Err(GpuThreadError::DeviceCreationFailed {
                    renderer: api.name(),
                    source: err,
                });
            }
        };

        let exclusive_fullscreen = match self.settings.exclusive_fullscreen_control {
            ExclusiveFullscreenControl::Automatic => None,
            ExclusiveFullscreenControl::Allowed => Some(true),
            ExclusiveFullscreenControl::Disallowed => Some(false),
        };

        let mut disabled_features = FeatureMask::empty();
        if self.settings.disable_dual_source_blend {
            disabled_features |= FeatureMask::DUAL_SOURCE_BLEND;
        }
        if self.settings.disable_framebuffer_fetch {
            disabled_features |= FeatureMask::FRAMEBUFFER_FETCH;
        }
        if self.settings.disable_texture_buffers {
            disabled_features |= FeatureMask::TEXTURE_BUFFERS;
        }
        if self.settings.disable_memory_import {
            disabled_features |= FeatureMask::MEMORY_IMPORT;
        }
        if self.settings.disable_raster_order_views {
            disabled_features |= FeatureMask::RASTER_ORDER_VIEWS;
        }

        let shader_cache_path = if self.settings.disable_shader_cache {
            None
        } else {
            self.shader_cache_path.as_deref()
        };

        let params = DeviceCreateParams {
            adapter: &self.settings.adapter,
            shader_cache_path,
            shader_cache_version: SHADER_CACHE_VERSION,
            debug_device: self.settings.use_debug_device,
            vsync: self.shared.requested_vsync(),
            allow_present_throttle: self.shared.requested_allow_throttle(),
            exclusive_fullscreen,
            disabled_features,
        };

        if let Err(err) = device.create(&params) {
            error!("Failed to create GPU device: {err}");
            device.destroy();
            self.shared.publish_render_api(None);
            fence(Ordering::Release);
            return Err(GpuThreadError::DeviceCreationFailed {
                renderer: api.name(),
                source: err,
            });
        }

        if let Err(err) = self.initialize_ui(device.as_mut()) {
            error!("Failed to initialize UI layer: {err}");
            self.ui.shutdown_fullscreen_ui();
            self.ui.shutdown();
            device.destroy();
            self.shared.publish_render_api(None);
            fence(Ordering::Release);
            return Err(GpuThreadError::UiInitFailed(err));
        }

        self.host.display_window_resized(
            device.window_width() as f32,
            device.window_height() as f32,
        );

        self.accumulated_gpu_time = 0.0;
        self.presents_since_last_update = 0;
        let created_api = device.render_api();
        device.set_gpu_timing_enabled(self.settings.show_gpu_usage);
        self.device = Some(device);
        self.shared.publish_render_api(Some(created_api));
        fence(Ordering::Release);

        Ok(())
    }

    fn initialize_ui(&mut self, device: &mut dyn Device) -> Result<(), UiError> {
        self.ui.initialize(device, self.settings.osd_scale / 100.0)?;
        if self.shared.start_fullscreen_ui.load(Ordering::Relaxed) {
            self.ui.initialize_fullscreen_ui()?;
        }
        Ok(())
    }

    pub(crate) fn initialize_fullscreen_ui(&mut self) -> Result<(), UiError> {
        if self.ui.fullscreen_ui_initialized() {
            return Ok(());
        }
        self.ui.initialize_fullscreen_ui()
    }

    pub(crate) fn destroy_device(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        self.ui.destroy_overlay_textures();
        self.ui.shutdown_fullscreen_ui();
        self.ui.shutdown();

        info!("Destroying {} GPU device...", device.render_api().name());
        device.destroy();
    }

    pub(crate) fn handle_device_lost(&mut self) {
        // A device that keeps dying is wedged; a reset loop would only leak
        // and crash somewhere less obvious.
        if !self.reset_gate.register(Instant::now()) {
            panic!("Host GPU lost too many times, device is probably completely wedged.");
        }

        // Toss out everything and try to hobble on.
        self.destroy_backend();
        self.destroy_device();

        let api = self
            .shared
            .requested_renderer()
            .unwrap_or(self.settings.renderer)
            .render_api();
        if let Err(err) = self.create_device(api) {
            error!("Failed to recreate GPU device after loss: {err}");
            panic!("Failed to recreate GPU device after loss.");
        }

        self.create_backend(false);

        // The first frame after the rebuild is going to be trash.
        self.host.add_osd_warning(
            "HostGPUDeviceLost",
            OsdIcon::Warning,
            "Host GPU device encountered an error and has recovered. This may cause broken rendering."
                .to_owned(),
            OSD_CRITICAL_ERROR_DURATION,
        );
    }

    pub(crate) fn create_backend(&mut self, clear_vram: bool) {
        debug_assert!(self.backend.is_none());
        let Some(renderer) = self.shared.requested_renderer() else {
            return;
        };

        let is_hardware = !renderer.is_software();
        let mut backend = if is_hardware {
            self.backend_factory.create_hardware_backend(renderer)
        } else {
            self.backend_factory.create_software_backend()
        };

        if let Err(err) = backend.initialize(clear_vram) {
            error!("Failed to create {} renderer: {}", renderer.name(), err);
            if !is_hardware {
                panic!("Failed to initialize software backend: {err}");
            }

            self.host.add_osd_message(
                "GPUBackendCreationFailed",
                OsdIcon::Renderer,
                format!(
                    "Failed to initialize {} renderer, falling back to software renderer.",
                    renderer.name()
                ),
                OSD_CRITICAL_ERROR_DURATION,
            );

            self.shared
                .store_requested_renderer(Some(RendererKind::Software));
            backend = self.backend_factory.create_software_backend();
            if let Err(err) = backend.initialize(clear_vram) {
                panic!("Failed to initialize software backend: {err}");
            }
        }

        self.backend = Some(backend);
    }

    pub(crate) fn change_backend(&mut self) {
        fence(Ordering::Acquire);
        let Some(renderer) = self.shared.requested_renderer() else {
            if self.backend.is_some() {
                self.destroy_backend();
            }
            return;
        };

        // Preserve VRAM contents across the swap.
        if let Some(backend) = &mut self.backend {
            backend.read_vram();
        }

        if renderer.is_software() {
            // The software renderer works on any device; just swap backends.
            self.destroy_backend();
            self.create_backend(false);
            return;
        }

        self.destroy_backend();

        let current_api = self
            .device
            .as_ref()
            .expect("backend change without a device")
            .render_api();
        let expected_api = renderer.render_api();
        if current_api != expected_api {
            warn!(
                "Recreating GPU device, expecting {} got {}",
                expected_api.name(),
                current_api.name()
            );

            self.destroy_device();
            // Things tend to break when the window is reused across APIs.
            self.host.release_render_window();

            if let Err(err) = self.create_device(expected_api) {
                self.host.add_osd_message(
                    "DeviceSwitchFailed",
                    OsdIcon::Renderer,
                    format!(
                        "Failed to create {} GPU device, reverting to {}.\n{}",
                        expected_api.name(),
                        current_api.name(),
                        err
                    ),
                    OSD_CRITICAL_ERROR_DURATION,
                );

                self.host.release_render_window();
                if let Err(err) = self.create_device(current_api) {
                    panic!("Failed to switch back to old API after creation failure: {err}");
                }
            }
        }

        self.create_backend(false);
    }

    pub(crate) fn destroy_backend(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        debug!("Shutting down GPU backend...");
        drop(backend);
    }

    pub(crate) fn update_vsync(&mut self) {
        fence(Ordering::Acquire);
        if let Some(device) = &mut self.device {
            device.set_vsync_mode(
                self.shared.requested_vsync(),
                self.shared.requested_allow_throttle(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_gate_allows_spaced_resets() {
        let mut gate = DeviceResetGate::new(Duration::from_secs(15));
        let t0 = Instant::now();
        assert!(gate.register(t0));
        assert!(gate.register(t0 + Duration::from_secs(16)));
        assert!(gate.register(t0 + Duration::from_secs(40)));
    }

    #[test]
    fn reset_gate_rejects_rapid_resets() {
        let mut gate = DeviceResetGate::new(Duration::from_secs(15));
        let t0 = Instant::now();
        assert!(gate.register(t0));
        assert!(!gate.register(t0 + Duration::from_secs(14)));
    }

    #[test]
    fn reset_gate_first_reset_always_passes() {
        let mut gate = DeviceResetGate::new(Duration::from_secs(15));
        assert!(gate.register(Instant::now()));
    }
}
