//! Deterministic device/backend/UI implementations with scripted outcomes.
//!
//! Everything shares one [`SimState`] hub so tests can inject failures
//! (creation errors, device loss, hardware-init failure) and observe calls
//! without reaching into the worker thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::{Backend, BackendAction, BackendError, BackendFactory, RendererKind};
use crate::device::{
    Device, DeviceCreateParams, DeviceError, DeviceFactory, DeviceFeatures, PresentResult,
    RenderApi, VsyncMode,
};
use crate::settings::GpuSettings;
use crate::ui::{UiError, UiFactory, UiLayer};

/// Size of the simulated VRAM store in bytes.
pub const SIM_VRAM_SIZE: usize = 1024;

/// Backend command: write payload bytes at VRAM offset 0.
pub const SIM_CMD_WRITE_VRAM: u32 = 0x100;
/// Backend command: flush backend-local VRAM to the canonical store.
pub const SIM_CMD_FLUSH_VRAM: u32 = 0x101;
/// Backend command: request presentation of the current frame.
pub const SIM_CMD_PRESENT: u32 = 0x102;
/// Backend command: record-only no-op.
pub const SIM_CMD_NOP: u32 = 0x103;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared scripting and observation hub for all simulated objects.
#[derive(Debug)]
pub struct SimState {
    // Device.
    pub devices_created: AtomicU32,
    pub devices_destroyed: AtomicU32,
    device_create_failures: Mutex<Vec<RenderApi>>,
    present_results: Mutex<VecDeque<PresentResult>>,
    pub begin_presents: AtomicU32,
    pub explicit_submits: AtomicU32,
    pub throttles: AtomicU32,
    pub vsync_changes: Mutex<Vec<(VsyncMode, bool)>>,
    pub gpu_time_per_frame_ms: Mutex<f32>,
    pub skip_next_frame: AtomicBool,
    pub fail_window_update: AtomicBool,
    window_size: Mutex<(u32, u32)>,

    // Backend.
    vram: Mutex<Vec<u8>>,
    pub vram_readbacks: AtomicU32,
    pub backends_created: AtomicU32,
    hardware_init_failures: AtomicU32,
    pub handled_commands: Mutex<Vec<(u32, Vec<u8>)>>,
    pub flushes: AtomicU32,
    pub backend_presents: AtomicU32,
    pub settings_updates: AtomicU32,
    pub stats_updates: Mutex<Vec<u32>>,
    pub resolution_scale_updates: AtomicU32,

    // UI.
    pub ui_inits: AtomicU32,
    pub ui_shutdowns: AtomicU32,
    pub fullscreen_ui_inits: AtomicU32,
    pub ui_frames: AtomicU32,
    pub fail_fullscreen_ui_init: AtomicBool,
}

impl SimState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            devices_created: AtomicU32::new(0),
            devices_destroyed: AtomicU32::new(0),
            device_create_failures: Mutex::new(Vec::new()),
            present_results: Mutex::new(VecDeque::new()),
            begin_presents: AtomicU32::new(0),
            explicit_submits: AtomicU32::new(0),
            throttles: AtomicU32::new(0),
            vsync_changes: Mutex::new(Vec::new()),
            gpu_time_per_frame_ms: Mutex::new(0.0),
            skip_next_frame: AtomicBool::new(false),
            fail_window_update: AtomicBool::new(false),
            window_size: Mutex::new((640, 480)),
            vram: Mutex::new(vec![0; SIM_VRAM_SIZE]),
            vram_readbacks: AtomicU32::new(0),
            backends_created: AtomicU32::new(0),
            hardware_init_failures: AtomicU32::new(0),
            handled_commands: Mutex::new(Vec::new()),
            flushes: AtomicU32::new(0),
            backend_presents: AtomicU32::new(0),
            settings_updates: AtomicU32::new(0),
            stats_updates: Mutex::new(Vec::new()),
            resolution_scale_updates: AtomicU32::new(0),
            ui_inits: AtomicU32::new(0),
            ui_shutdowns: AtomicU32::new(0),
            fullscreen_ui_inits: AtomicU32::new(0),
            ui_frames: AtomicU32::new(0),
            fail_fullscreen_ui_init: AtomicBool::new(false),
        })
    }

    /// The next creation attempt for `api` fails.
    pub fn fail_next_device_create(&self, api: RenderApi) {
        lock(&self.device_create_failures).push(api);
    }

    /// Scripts the outcome of an upcoming present; unscripted presents
    /// succeed.
    pub fn push_present_result(&self, result: PresentResult) {
        lock(&self.present_results).push_back(result);
    }

    /// The next `n` hardware backend initializations fail.
    pub fn fail_next_hardware_inits(&self, n: u32) {
        self.hardware_init_failures.store(n, Ordering::SeqCst);
    }

    pub fn vram_snapshot(&self) -> Vec<u8> {
        lock(&self.vram).clone()
    }

    pub fn handled_command_kinds(&self) -> Vec<u32> {
        lock(&self.handled_commands)
            .iter()
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn take_device_create_failure(&self, api: RenderApi) -> bool {
        let mut failures = lock(&self.device_create_failures);
        if let Some(pos) = failures.iter().position(|&a| a == api) {
            failures.remove(pos);
            true
        } else {
            false
        }
    }

    fn next_present_result(&self) -> PresentResult {
        lock(&self.present_results)
            .pop_front()
            .unwrap_or(PresentResult::Ok)
    }
}

/// Scripted [`Device`].
#[derive(Debug)]
pub struct SimDevice {
    state: Arc<SimState>,
    api: RenderApi,
    features: DeviceFeatures,
    throttle_sleep: Duration,
    created: bool,
    vsync: VsyncMode,
    allow_present_throttle: bool,
    timing_enabled: bool,
}

impl Device for SimDevice {
    fn render_api(&self) -> RenderApi {
        self.api
    }

    fn features(&self) -> DeviceFeatures {
        self.features
    }

    fn create(&mut self, params: &DeviceCreateParams<'_>) -> Result<(), DeviceError> {
        if self.state.take_device_create_failure(self.api) {
            return Err(DeviceError::CreationFailed(format!(
                "simulated creation failure for {}",
                self.api.name()
            )));
        }
        self.created = true;
        self.vsync = params.vsync;
        self.allow_present_throttle = params.allow_present_throttle;
        self.state.devices_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.created {
            self.created = false;
            self.state.devices_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn set_vsync_mode(&mut self, mode: VsyncMode, allow_present_throttle: bool) {
        self.vsync = mode;
        self.allow_present_throttle = allow_present_throttle;
        lock(&self.state.vsync_changes).push((mode, allow_present_throttle));
    }

    fn is_vsync_blocking(&self) -> bool {
        self.vsync == VsyncMode::Fifo
    }

    fn throttle_presentation(&mut self) {
        self.state.throttles.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.throttle_sleep);
    }

    fn should_skip_frame(&self) -> bool {
        self.state.skip_next_frame.swap(false, Ordering::SeqCst)
    }

    fn begin_present(&mut self) -> PresentResult {
        self.state.begin_presents.fetch_add(1, Ordering::SeqCst);
        self.state.next_present_result()
    }

    fn render_ui(&mut self) {}

    fn end_present(&mut self, _explicit_present: bool) {}

    fn submit_present(&mut self) {
        self.state.explicit_submits.fetch_add(1, Ordering::SeqCst);
    }

    fn set_gpu_timing_enabled(&mut self, enabled: bool) {
        self.timing_enabled = enabled;
    }

    fn gpu_timing_enabled(&self) -> bool {
        self.timing_enabled
    }

    fn take_accumulated_gpu_time(&mut self) -> f32 {
        *lock(&self.state.gpu_time_per_frame_ms)
    }

    fn window_width(&self) -> u32 {
        lock(&self.state.window_size).0
    }

    fn window_height(&self) -> u32 {
        lock(&self.state.window_size).1
    }

    fn resize_window(&mut self, width: u32, height: u32, _scale: f32) {
        *lock(&self.state.window_size) = (width, height);
    }

    fn update_window(&mut self) -> Result<(), DeviceError> {
        if self.state.fail_window_update.swap(false, Ordering::SeqCst) {
            Err(DeviceError::WindowUpdateFailed(
                "simulated window update failure".into(),
            ))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
pub struct SimDeviceFactory {
    state: Arc<SimState>,
    pub features: DeviceFeatures,
    pub throttle_sleep: Duration,
}

impl SimDeviceFactory {
    pub fn new(state: Arc<SimState>) -> Self {
        Self {
            state,
            features: DeviceFeatures::default(),
            throttle_sleep: Duration::from_millis(1),
        }
    }

    pub fn with_features(mut self, features: DeviceFeatures) -> Self {
        self.features = features;
        self
    }
}

impl DeviceFactory for SimDeviceFactory {
    fn create_device(&self, api: RenderApi) -> Result<Box<dyn Device>, DeviceError> {
        Ok(Box::new(SimDevice {
            state: Arc::clone(&self.state),
            api,
            features: self.features,
            throttle_sleep: self.throttle_sleep,
            created: false,
            vsync: VsyncMode::Disabled,
            allow_present_throttle: false,
            timing_enabled: false,
        }))
    }
}

/// Scripted [`Backend`] with a backend-local VRAM copy, mirroring a hardware
/// renderer that keeps VRAM on-device until `read_vram`.
#[derive(Debug)]
pub struct SimBackend {
    state: Arc<SimState>,
    renderer: RendererKind,
    local_vram: Vec<u8>,
}

impl Backend for SimBackend {
    fn renderer(&self) -> RendererKind {
        self.renderer
    }

    fn initialize(&mut self, clear_vram: bool) -> Result<(), BackendError> {
        if !self.renderer.is_software() {
            let failures = &self.state.hardware_init_failures;
            let mut remaining = failures.load(Ordering::SeqCst);
            while remaining > 0 {
                match failures.compare_exchange(
                    remaining,
                    remaining - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        return Err(BackendError::InitializationFailed(format!(
                            "simulated initialization failure for {}",
                            self.renderer.name()
                        )))
                    }
                    Err(current) => remaining = current,
                }
            }
        }

        if clear_vram {
            lock(&self.state.vram).fill(0);
            self.local_vram.fill(0);
        } else {
            self.local_vram = self.state.vram_snapshot();
        }
        self.state.backends_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn handle_command(&mut self, kind: u32, payload: &[u8]) -> BackendAction {
        lock(&self.state.handled_commands).push((kind, payload.to_vec()));
        match kind {
            SIM_CMD_WRITE_VRAM => {
                let len = payload.len().min(self.local_vram.len());
                self.local_vram[..len].copy_from_slice(&payload[..len]);
                BackendAction::None
            }
            SIM_CMD_FLUSH_VRAM => {
                lock(&self.state.vram).copy_from_slice(&self.local_vram);
                BackendAction::None
            }
            SIM_CMD_PRESENT => BackendAction::PresentFrame {
                allow_skip: true,
                present_time: None,
            },
            _ => BackendAction::None,
        }
    }

    fn read_vram(&mut self) {
        lock(&self.state.vram).copy_from_slice(&self.local_vram);
        self.state.vram_readbacks.fetch_add(1, Ordering::SeqCst);
    }

    fn flush_render(&mut self) {
        self.state.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn present_display(&mut self) -> PresentResult {
        self.state.backend_presents.fetch_add(1, Ordering::SeqCst);
        self.state.next_present_result()
    }

    fn restore_device_context(&mut self) {}

    fn update_settings(&mut self, _old: &GpuSettings) {
        self.state.settings_updates.fetch_add(1, Ordering::SeqCst);
    }

    fn update_statistics(&mut self, frame_count: u32) {
        lock(&self.state.stats_updates).push(frame_count);
    }

    fn update_resolution_scale(&mut self) {
        self.state
            .resolution_scale_updates
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SimBackendFactory {
    state: Arc<SimState>,
}

impl SimBackendFactory {
    pub fn new(state: Arc<SimState>) -> Self {
        Self { state }
    }
}

impl BackendFactory for SimBackendFactory {
    fn create_hardware_backend(&self, renderer: RendererKind) -> Box<dyn Backend> {
        Box::new(SimBackend {
            state: Arc::clone(&self.state),
            renderer,
            local_vram: vec![0; SIM_VRAM_SIZE],
        })
    }

    fn create_software_backend(&self) -> Box<dyn Backend> {
        Box::new(SimBackend {
            state: Arc::clone(&self.state),
            renderer: RendererKind::Software,
            local_vram: vec![0; SIM_VRAM_SIZE],
        })
    }
}

/// Call-counting [`UiLayer`].
#[derive(Debug)]
pub struct SimUi {
    state: Arc<SimState>,
    initialized: bool,
    fullscreen: bool,
}

impl UiLayer for SimUi {
    fn initialize(&mut self, _device: &mut dyn Device, _osd_scale: f32) -> Result<(), UiError> {
        self.initialized = true;
        self.state.ui_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.initialized {
            self.initialized = false;
            self.state.ui_shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn destroy_overlay_textures(&mut self) {}

    fn initialize_fullscreen_ui(&mut self) -> Result<(), UiError> {
        if self.state.fail_fullscreen_ui_init.swap(false, Ordering::SeqCst) {
            return Err(UiError::FullscreenInitFailed(
                "simulated fullscreen UI failure".into(),
            ));
        }
        self.fullscreen = true;
        self.state.fullscreen_ui_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown_fullscreen_ui(&mut self) {
        self.fullscreen = false;
    }

    fn fullscreen_ui_initialized(&self) -> bool {
        self.fullscreen
    }

    fn new_frame(&mut self) {
        self.state.ui_frames.fetch_add(1, Ordering::SeqCst);
    }

    fn end_frame(&mut self) {}

    fn render_fullscreen_ui(&mut self, _device: &mut dyn Device) {}
    fn render_text_overlays(&mut self, _device: &mut dyn Device) {}
    fn render_osd_messages(&mut self, _device: &mut dyn Device) {}
    fn render_software_cursors(&mut self, _device: &mut dyn Device) {}
    fn render_overlay_windows(&mut self, _device: &mut dyn Device) {}
    fn render_debug_windows(&mut self, _device: &mut dyn Device) {}

    fn window_resized(&mut self, _width: f32, _height: f32) {}
}

#[derive(Debug)]
pub struct SimUiFactory {
    state: Arc<SimState>,
}

impl SimUiFactory {
    pub fn new(state: Arc<SimState>) -> Self {
        Self { state }
    }
}

impl UiFactory for SimUiFactory {
    fn create_ui(&self) -> Box<dyn UiLayer> {
        Box::new(SimUi {
            state: Arc::clone(&self.state),
            initialized: false,
            fullscreen: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FeatureMask;
    use pretty_assertions::assert_eq;

    #[test]
    fn backend_vram_survives_readback_cycle() {
        let state = SimState::new();
        let factory = SimBackendFactory::new(Arc::clone(&state));

        let mut first = factory.create_hardware_backend(RendererKind::Vulkan);
        first.initialize(true).unwrap();
        first.handle_command(SIM_CMD_WRITE_VRAM, &[0xAB; 16]);
        first.read_vram();
        drop(first);

        let mut second = factory.create_hardware_backend(RendererKind::OpenGl);
        second.initialize(false).unwrap();
        second.handle_command(SIM_CMD_FLUSH_VRAM, &[]);

        assert_eq!(&state.vram_snapshot()[..16], &[0xAB; 16]);
    }

    #[test]
    fn hardware_init_failure_is_scripted_and_consumed() {
        let state = SimState::new();
        let factory = SimBackendFactory::new(Arc::clone(&state));
        state.fail_next_hardware_inits(1);

        let mut hw = factory.create_hardware_backend(RendererKind::Vulkan);
        assert!(hw.initialize(true).is_err());
        assert!(hw.initialize(true).is_ok());

        // Software initialization is never scripted to fail.
        state.fail_next_hardware_inits(1);
        let mut sw = factory.create_software_backend();
        assert!(sw.initialize(true).is_ok());
    }

    #[test]
    fn device_create_failure_matches_api() {
        let state = SimState::new();
        let factory = SimDeviceFactory::new(Arc::clone(&state));
        state.fail_next_device_create(RenderApi::Vulkan);

        let mut d3d = factory.create_device(RenderApi::D3d12).unwrap();
        assert!(d3d
            .create(&DeviceCreateParams {
                adapter: "",
                shader_cache_path: None,
                shader_cache_version: 1,
                debug_device: false,
                vsync: VsyncMode::Disabled,
                allow_present_throttle: false,
                exclusive_fullscreen: None,
                disabled_features: FeatureMask::empty(),
            })
            .is_ok());

        let mut vk = factory.create_device(RenderApi::Vulkan).unwrap();
        assert!(vk
            .create(&DeviceCreateParams {
                adapter: "",
                shader_cache_path: None,
                shader_cache_version: 1,
                debug_device: false,
                vsync: VsyncMode::Disabled,
                allow_present_throttle: false,
                exclusive_fullscreen: None,
                disabled_features: FeatureMask::empty(),
            })
            .is_err());
    }
}
