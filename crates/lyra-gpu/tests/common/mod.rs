#![allow(dead_code)]

//! Shared fixture for `lyra-gpu` integration tests: simulated device stack
//! plus a recording host.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use lyra_gpu::{GpuThread, GpuThreadConfig, Host, OsdIcon, SystemState};
use lyra_gpu_device::sim::{SimBackendFactory, SimDeviceFactory, SimState, SimUiFactory};
use lyra_gpu_device::{GpuSettings, RendererKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug)]
pub struct TestHost {
    pub osd_messages: Mutex<Vec<(String, String)>>,
    pub osd_warnings: Mutex<Vec<(String, String)>>,
    pub async_errors: Mutex<Vec<(String, String)>>,
    pub released_windows: AtomicU32,
    pub window_resizes: Mutex<Vec<(f32, f32)>>,
    system_state: Mutex<SystemState>,
}

impl TestHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            osd_messages: Mutex::new(Vec::new()),
            osd_warnings: Mutex::new(Vec::new()),
            async_errors: Mutex::new(Vec::new()),
            released_windows: AtomicU32::new(0),
            window_resizes: Mutex::new(Vec::new()),
            system_state: Mutex::new(SystemState::Running),
        })
    }

    pub fn set_system_state(&self, state: SystemState) {
        *lock(&self.system_state) = state;
    }

    pub fn osd_message_keys(&self) -> Vec<String> {
        lock(&self.osd_messages)
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn osd_warning_keys(&self) -> Vec<String> {
        lock(&self.osd_warnings)
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Host for TestHost {
    fn release_render_window(&self) {
        self.released_windows.fetch_add(1, Ordering::SeqCst);
    }

    fn report_error_async(&self, title: &str, message: &str) {
        lock(&self.async_errors).push((title.to_owned(), message.to_owned()));
    }

    fn add_osd_message(&self, key: &str, _icon: OsdIcon, message: String, _duration: f32) {
        lock(&self.osd_messages).push((key.to_owned(), message));
    }

    fn add_osd_warning(&self, key: &str, _icon: OsdIcon, message: String, _duration: f32) {
        lock(&self.osd_warnings).push((key.to_owned(), message));
    }

    fn display_window_resized(&self, width: f32, height: f32) {
        lock(&self.window_resizes).push((width, height));
    }

    fn system_state(&self) -> SystemState {
        *lock(&self.system_state)
    }
}

pub struct Fixture {
    pub gpu: GpuThread,
    pub sim: Arc<SimState>,
    pub host: Arc<TestHost>,
}

pub fn fixture_with_config(config: GpuThreadConfig) -> Fixture {
    let sim = SimState::new();
    let host = TestHost::new();
    let gpu = GpuThread::new(
        Arc::<TestHost>::clone(&host),
        Arc::new(SimDeviceFactory::new(Arc::clone(&sim))),
        Arc::new(SimBackendFactory::new(Arc::clone(&sim))),
        Arc::new(SimUiFactory::new(Arc::clone(&sim))),
        config,
    );
    Fixture { gpu, sim, host }
}

pub fn fixture() -> Fixture {
    fixture_with_config(GpuThreadConfig::default())
}

pub fn software_settings() -> GpuSettings {
    GpuSettings {
        renderer: RendererKind::Software,
        ..GpuSettings::default()
    }
}

pub fn hardware_settings(renderer: RendererKind) -> GpuSettings {
    GpuSettings {
        renderer,
        ..GpuSettings::default()
    }
}
