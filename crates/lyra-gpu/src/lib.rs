//! GPU worker thread and its command-submission ring.
//!
//! A producer (emulation) thread feeds small, variable-sized commands through
//! a lock-free SPSC byte ring to a worker thread that owns the graphics
//! device. The worker drains in FIFO order, presents frames while idle,
//! recovers from device loss and can swap renderer backends without
//! restarting.
//!
//! The entry point is [`GpuThread`]; the device/backend/UI seams it drives
//! live in [`lyra_gpu_device`].

mod error;
mod fifo;
mod host;
mod lifecycle;
mod present;
mod state;
mod thread;
mod wake;
mod worker;

pub use error::GpuThreadError;
pub use fifo::DEFAULT_FIFO_SIZE;
pub use host::{Host, OsdIcon, SystemState, OSD_CRITICAL_ERROR_DURATION};
pub use lifecycle::SHADER_CACHE_VERSION;
pub use thread::{GpuThread, GpuThreadConfig, DEFAULT_WAKE_THRESHOLD};
pub use worker::GpuWorker;
