use thiserror::Error;

use lyra_gpu_device::{DeviceError, UiError};

/// Errors surfaced to the producer by [`GpuThread::start`] and friends.
///
/// [`GpuThread::start`]: crate::GpuThread::start
#[derive(Debug, Error)]
pub enum GpuThreadError {
    #[error(
        "Failed to create render device:\n\n{source}\n\nThis may be due to your GPU not \
         supporting the chosen renderer ({renderer}), or because your graphics drivers need \
         to be updated."
    )]
    DeviceCreationFailed {
        renderer: &'static str,
        #[source]
        source: DeviceError,
    },

    #[error("failed to initialize UI layer: {0}")]
    UiInitFailed(#[from] UiError),

    #[error("failed to spawn GPU thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("GPU thread failed to start")]
    StartFailed,
}
