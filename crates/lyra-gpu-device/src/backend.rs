use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{PresentResult, RenderApi};
use crate::settings::GpuSettings;

/// First command kind value owned by backends; smaller values are reserved
/// for the worker's internal records.
pub const FIRST_BACKEND_COMMAND_KIND: u32 = 0x100;

/// The renderer the emulation side asked for. Hardware renderers pin the
/// device to a specific API; the software renderer works on any device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RendererKind {
    Vulkan,
    D3d12,
    Metal,
    OpenGl,
    Software,
}

impl RendererKind {
    pub const fn is_software(self) -> bool {
        matches!(self, RendererKind::Software)
    }

    /// The device API this renderer requires.
    pub const fn render_api(self) -> RenderApi {
        match self {
            RendererKind::Vulkan => RenderApi::Vulkan,
            RendererKind::D3d12 => RenderApi::D3d12,
            RendererKind::Metal => RenderApi::Metal,
            RendererKind::OpenGl => RenderApi::OpenGl,
            RendererKind::Software => RenderApi::preferred(),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RendererKind::Vulkan => "Vulkan",
            RendererKind::D3d12 => "Direct3D 12",
            RendererKind::Metal => "Metal",
            RendererKind::OpenGl => "OpenGL",
            RendererKind::Software => "Software",
        }
    }

    pub const fn as_raw(self) -> u8 {
        match self {
            RendererKind::Vulkan => 0,
            RendererKind::D3d12 => 1,
            RendererKind::Metal => 2,
            RendererKind::OpenGl => 3,
            RendererKind::Software => 4,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(RendererKind::Vulkan),
            1 => Some(RendererKind::D3d12),
            2 => Some(RendererKind::Metal),
            3 => Some(RendererKind::OpenGl),
            4 => Some(RendererKind::Software),
            _ => None,
        }
    }
}

/// Side effect a backend requests from the worker after handling a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendAction {
    None,
    /// Present the completed frame. `present_time` targets an explicit-present
    /// device; the worker sleeps until then before submitting.
    PresentFrame {
        allow_skip: bool,
        present_time: Option<Instant>,
    },
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),
}

/// A renderer backend owned by the GPU worker thread.
///
/// Backends receive the emulation command stream via [`Backend::handle_command`]
/// and are torn down/rebuilt around device recreation. `read_vram` must flush
/// the backend's VRAM state to the canonical store so a successor backend
/// created with `clear_vram = false` can pick it up.
pub trait Backend: Send {
    fn renderer(&self) -> RendererKind;

    fn initialize(&mut self, clear_vram: bool) -> Result<(), BackendError>;

    fn handle_command(&mut self, kind: u32, payload: &[u8]) -> BackendAction;

    /// Writes the backend's VRAM contents back to the canonical store.
    fn read_vram(&mut self);

    /// Flushes any batched rendering before presentation.
    fn flush_render(&mut self);

    fn present_display(&mut self) -> PresentResult;

    /// Re-binds backend state after UI rendering may have clobbered it.
    fn restore_device_context(&mut self);

    fn update_settings(&mut self, old: &GpuSettings);

    fn update_statistics(&mut self, frame_count: u32);

    /// Recomputes an automatic resolution scale from the current window size.
    fn update_resolution_scale(&mut self);
}

/// Creates backends on the worker thread. Construction is infallible;
/// [`Backend::initialize`] is the fallible step.
pub trait BackendFactory: Send + Sync {
    fn create_hardware_backend(&self, renderer: RendererKind) -> Box<dyn Backend>;
    fn create_software_backend(&self) -> Box<dyn Backend>;
}
