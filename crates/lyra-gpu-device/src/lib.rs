//! Device-facing abstractions for the lyra GPU worker thread.
//!
//! The worker thread owns exactly one [`Device`] and at most one [`Backend`]
//! at a time; everything here is designed to be created, driven and destroyed
//! on that thread. The traits are the seams the worker uses to talk to a real
//! graphics stack; the [`sim`] module provides deterministic implementations
//! with scripted failure injection for tests.

mod backend;
mod device;
mod settings;
mod ui;

pub mod sim;

pub use backend::{
    Backend, BackendAction, BackendError, BackendFactory, RendererKind,
    FIRST_BACKEND_COMMAND_KIND,
};
pub use device::{
    Device, DeviceCreateParams, DeviceError, DeviceFactory, DeviceFeatures, FeatureMask,
    PresentResult, RenderApi, VsyncMode,
};
pub use settings::{ExclusiveFullscreenControl, GpuSettings};
pub use ui::{UiError, UiFactory, UiLayer};
