use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum UiError {
    #[error("UI initialization failed: {0}")]
    InitFailed(String),

    #[error("fullscreen UI initialization failed: {0}")]
    FullscreenInitFailed(String),
}

/// Immediate-mode UI layer driven by the GPU worker thread.
///
/// The worker keeps a UI frame open at all times: every present (including
/// skipped ones) ends the current frame and starts the next, so input handling
/// keeps working even when nothing reaches the screen.
pub trait UiLayer: Send {
    fn initialize(&mut self, device: &mut dyn Device, osd_scale: f32) -> Result<(), UiError>;
    fn shutdown(&mut self);
    fn destroy_overlay_textures(&mut self);

    fn initialize_fullscreen_ui(&mut self) -> Result<(), UiError>;
    fn shutdown_fullscreen_ui(&mut self);
    fn fullscreen_ui_initialized(&self) -> bool;

    fn new_frame(&mut self);
    /// Closes the current frame without rendering it (error/skip paths).
    fn end_frame(&mut self);

    fn render_fullscreen_ui(&mut self, device: &mut dyn Device);
    fn render_text_overlays(&mut self, device: &mut dyn Device);
    fn render_osd_messages(&mut self, device: &mut dyn Device);
    fn render_software_cursors(&mut self, device: &mut dyn Device);
    fn render_overlay_windows(&mut self, device: &mut dyn Device);
    fn render_debug_windows(&mut self, device: &mut dyn Device);

    fn window_resized(&mut self, width: f32, height: f32);
}

/// Creates the UI layer on the worker thread.
pub trait UiFactory: Send + Sync {
    fn create_ui(&self) -> Box<dyn UiLayer>;
}
