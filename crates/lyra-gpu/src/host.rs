//! Callbacks into the embedding host.

/// Display duration for OSD messages reporting critical errors, in seconds.
pub const OSD_CRITICAL_ERROR_DURATION: f32 = 10.0;

/// Icon hint attached to OSD messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsdIcon {
    Info,
    Warning,
    Renderer,
}

/// Coarse host-side system state the worker consults for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemState {
    Shutdown,
    Running,
    Paused,
}

/// Host services the worker thread calls out to.
///
/// All methods may be invoked from the worker thread; implementations must be
/// thread-safe and must not call back into the GPU thread API.
pub trait Host: Send + Sync {
    /// The render window is no longer used by the current device and may be
    /// destroyed or reparented.
    fn release_render_window(&self);

    /// Reports a non-fatal error to the user without blocking the worker.
    fn report_error_async(&self, title: &str, message: &str);

    /// Shows (or replaces, by key) an OSD message.
    fn add_osd_message(&self, key: &str, icon: OsdIcon, message: String, duration: f32);

    /// Shows (or replaces, by key) an OSD warning.
    fn add_osd_warning(&self, key: &str, icon: OsdIcon, message: String, duration: f32);

    /// Notifies input handling of the current display dimensions.
    fn display_window_resized(&self, width: f32, height: f32);

    fn system_state(&self) -> SystemState;
}
