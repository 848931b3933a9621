use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Graphics API a [`Device`] is built on top of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderApi {
    Vulkan,
    D3d12,
    Metal,
    OpenGl,
}

impl RenderApi {
    /// The API a software renderer (or an automatic choice) defaults to on
    /// this platform.
    pub const fn preferred() -> Self {
        if cfg!(target_os = "windows") {
            RenderApi::D3d12
        } else if cfg!(target_os = "macos") {
            RenderApi::Metal
        } else {
            RenderApi::Vulkan
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RenderApi::Vulkan => "Vulkan",
            RenderApi::D3d12 => "Direct3D 12",
            RenderApi::Metal => "Metal",
            RenderApi::OpenGl => "OpenGL",
        }
    }

    pub const fn as_raw(self) -> u8 {
        match self {
            RenderApi::Vulkan => 0,
            RenderApi::D3d12 => 1,
            RenderApi::Metal => 2,
            RenderApi::OpenGl => 3,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(RenderApi::Vulkan),
            1 => Some(RenderApi::D3d12),
            2 => Some(RenderApi::Metal),
            3 => Some(RenderApi::OpenGl),
            _ => None,
        }
    }
}

/// Presentation synchronization mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VsyncMode {
    Disabled,
    Fifo,
    Mailbox,
}

impl VsyncMode {
    pub const fn as_raw(self) -> u8 {
        match self {
            VsyncMode::Disabled => 0,
            VsyncMode::Fifo => 1,
            VsyncMode::Mailbox => 2,
        }
    }

    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => VsyncMode::Fifo,
            2 => VsyncMode::Mailbox,
            _ => VsyncMode::Disabled,
        }
    }
}

/// Outcome of starting presentation of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentResult {
    Ok,
    SkipPresent,
    DeviceLost,
    Error,
}

bitflags! {
    /// Device features the host configuration can force off.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FeatureMask: u32 {
        const DUAL_SOURCE_BLEND = 1 << 0;
        const FRAMEBUFFER_FETCH = 1 << 1;
        const TEXTURE_BUFFERS = 1 << 2;
        const MEMORY_IMPORT = 1 << 3;
        const RASTER_ORDER_VIEWS = 1 << 4;
    }
}

/// Capabilities reported by a created [`Device`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceFeatures {
    /// The device can split recording a present from submitting it, allowing
    /// the caller to sleep until a target time in between.
    pub explicit_present: bool,
    pub dual_source_blend: bool,
    pub framebuffer_fetch: bool,
}

/// Parameters for [`Device::create`].
#[derive(Clone, Copy, Debug)]
pub struct DeviceCreateParams<'a> {
    pub adapter: &'a str,
    /// `None` disables the on-disk shader cache.
    pub shader_cache_path: Option<&'a Path>,
    pub shader_cache_version: u32,
    pub debug_device: bool,
    pub vsync: VsyncMode,
    pub allow_present_throttle: bool,
    /// `None` leaves exclusive-fullscreen control up to the driver.
    pub exclusive_fullscreen: Option<bool>,
    pub disabled_features: FeatureMask,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no adapter matching \"{0}\"")]
    AdapterNotFound(String),

    #[error("device creation failed: {0}")]
    CreationFailed(String),

    #[error("device lost")]
    DeviceLost,

    #[error("window update failed: {0}")]
    WindowUpdateFailed(String),
}

/// A graphics device owned exclusively by the GPU worker thread.
///
/// A freshly constructed device is inert until [`Device::create`] succeeds;
/// [`Device::destroy`] releases all API objects and must be the last call.
pub trait Device: Send {
    fn render_api(&self) -> RenderApi;
    fn features(&self) -> DeviceFeatures;

    fn create(&mut self, params: &DeviceCreateParams<'_>) -> Result<(), DeviceError>;
    fn destroy(&mut self);

    fn set_vsync_mode(&mut self, mode: VsyncMode, allow_present_throttle: bool);
    /// Whether the current vsync mode blocks in present (FIFO-style).
    fn is_vsync_blocking(&self) -> bool;
    /// Rate-limit presentation while running without vsync blocking.
    fn throttle_presentation(&mut self);
    /// Whether the next frame should be dropped (e.g. occluded window).
    fn should_skip_frame(&self) -> bool;

    fn begin_present(&mut self) -> PresentResult;
    fn render_ui(&mut self);
    fn end_present(&mut self, explicit_present: bool);
    /// Submits a present previously recorded with `explicit_present` set.
    fn submit_present(&mut self);

    fn set_gpu_timing_enabled(&mut self, enabled: bool);
    fn gpu_timing_enabled(&self) -> bool;
    /// Returns GPU time in milliseconds accumulated since the last call.
    fn take_accumulated_gpu_time(&mut self) -> f32;

    fn window_width(&self) -> u32;
    fn window_height(&self) -> u32;
    fn resize_window(&mut self, width: u32, height: u32, scale: f32);
    fn update_window(&mut self) -> Result<(), DeviceError>;
}

/// Creates devices for a given API. Called on the worker thread whenever the
/// device has to be (re)built: startup, renderer switch, device-lost recovery.
pub trait DeviceFactory: Send + Sync {
    fn create_device(&self, api: RenderApi) -> Result<Box<dyn Device>, DeviceError>;
}
