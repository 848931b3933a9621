use serde::{Deserialize, Serialize};

use crate::backend::RendererKind;

/// Whether the device may take exclusive control of the display output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusiveFullscreenControl {
    Automatic,
    Disallowed,
    Allowed,
}

/// Snapshot of the GPU-related host settings.
///
/// The worker thread owns its own copy; the producer publishes a fresh
/// snapshot through an async call rather than sharing mutable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpuSettings {
    pub renderer: RendererKind,
    /// Adapter name to select, empty for the default adapter.
    pub adapter: String,
    pub use_debug_device: bool,
    pub disable_shader_cache: bool,
    /// OSD scale in percent.
    pub osd_scale: f32,
    pub show_gpu_usage: bool,
    pub show_gpu_stats: bool,
    /// Internal resolution scale; 0 derives it from the window size.
    pub resolution_scale: u8,
    pub exclusive_fullscreen_control: ExclusiveFullscreenControl,
    pub disable_dual_source_blend: bool,
    pub disable_framebuffer_fetch: bool,
    pub disable_texture_buffers: bool,
    pub disable_memory_import: bool,
    pub disable_raster_order_views: bool,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            renderer: RendererKind::Software,
            adapter: String::new(),
            use_debug_device: false,
            disable_shader_cache: false,
            osd_scale: 100.0,
            show_gpu_usage: false,
            show_gpu_stats: false,
            resolution_scale: 1,
            exclusive_fullscreen_control: ExclusiveFullscreenControl::Automatic,
            disable_dual_source_blend: false,
            disable_framebuffer_fetch: false,
            disable_texture_buffers: false,
            disable_memory_import: false,
            disable_raster_order_views: false,
        }
    }
}
