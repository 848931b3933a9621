//! State shared between the producer handle and the worker thread.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lyra_gpu_device::{RenderApi, RendererKind, VsyncMode};

use crate::error::GpuThreadError;
use crate::fifo::{kind, CommandFifo, CommandSlot};
use crate::wake::{Semaphore, WakeCoordinator};
use crate::worker::AsyncCall;

const RAW_NONE: u8 = u8::MAX;

pub(crate) struct SharedState {
    pub fifo: CommandFifo,
    pub wake: WakeCoordinator,
    pub start_sem: Semaphore,
    wake_threshold: u32,

    pub open_flag: AtomicBool,
    pub shutdown_flag: AtomicBool,
    pub run_idle_flag: AtomicBool,
    /// Set once per perf-counter window; cleared to request a refresh.
    pub perf_counters_updated: AtomicBool,
    pub start_fullscreen_ui: AtomicBool,

    // Written by the producer under a release fence paired with the
    // acquire fence the worker issues in the corresponding handler.
    requested_renderer: AtomicU8,
    requested_vsync: AtomicU8,
    requested_allow_throttle: AtomicBool,

    // Published by the worker under a release fence after device creation.
    render_api: AtomicU8,

    gpu_usage_bits: AtomicU32,
    average_gpu_time_bits: AtomicU32,

    open_error: Mutex<Option<GpuThreadError>>,
}

impl SharedState {
    pub fn new(fifo_size: u32, wake_threshold: u32, sync_spin_window: Duration) -> Self {
        Self {
            fifo: CommandFifo::new(fifo_size),
            wake: WakeCoordinator::new(sync_spin_window),
            start_sem: Semaphore::new(),
            wake_threshold,
            open_flag: AtomicBool::new(false),
            shutdown_flag: AtomicBool::new(false),
            run_idle_flag: AtomicBool::new(false),
            perf_counters_updated: AtomicBool::new(false),
            start_fullscreen_ui: AtomicBool::new(false),
            requested_renderer: AtomicU8::new(RAW_NONE),
            requested_vsync: AtomicU8::new(VsyncMode::Disabled.as_raw()),
            requested_allow_throttle: AtomicBool::new(false),
            render_api: AtomicU8::new(RAW_NONE),
            gpu_usage_bits: AtomicU32::new(0),
            average_gpu_time_bits: AtomicU32::new(0),
            open_error: Mutex::new(None),
        }
    }

    pub fn requested_renderer(&self) -> Option<RendererKind> {
        RendererKind::from_raw(self.requested_renderer.load(Ordering::Relaxed))
    }

    pub fn store_requested_renderer(&self, renderer: Option<RendererKind>) {
        self.requested_renderer.store(
            renderer.map_or(RAW_NONE, RendererKind::as_raw),
            Ordering::Relaxed,
        );
    }

    pub fn requested_vsync(&self) -> VsyncMode {
        VsyncMode::from_raw(self.requested_vsync.load(Ordering::Relaxed))
    }

    pub fn requested_allow_throttle(&self) -> bool {
        self.requested_allow_throttle.load(Ordering::Relaxed)
    }

    pub fn store_requested_vsync(&self, mode: VsyncMode, allow_throttle: bool) {
        self.requested_vsync.store(mode.as_raw(), Ordering::Relaxed);
        self.requested_allow_throttle
            .store(allow_throttle, Ordering::Relaxed);
    }

    pub fn render_api(&self) -> Option<RenderApi> {
        RenderApi::from_raw(self.render_api.load(Ordering::Relaxed))
    }

    pub fn publish_render_api(&self, api: Option<RenderApi>) {
        self.render_api
            .store(api.map_or(RAW_NONE, RenderApi::as_raw), Ordering::Relaxed);
    }

    pub fn gpu_usage(&self) -> f32 {
        f32::from_bits(self.gpu_usage_bits.load(Ordering::Relaxed))
    }

    pub fn publish_gpu_usage(&self, usage: f32) {
        self.gpu_usage_bits.store(usage.to_bits(), Ordering::Relaxed);
    }

    pub fn average_gpu_time(&self) -> f32 {
        f32::from_bits(self.average_gpu_time_bits.load(Ordering::Relaxed))
    }

    pub fn publish_average_gpu_time(&self, time: f32) {
        self.average_gpu_time_bits
            .store(time.to_bits(), Ordering::Relaxed);
    }

    pub fn set_open_error(&self, error: GpuThreadError) {
        let mut slot = match self.open_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(error);
    }

    pub fn take_open_error(&self) -> Option<GpuThreadError> {
        let mut slot = match self.open_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    // Producer-side submission primitives.

    /// Commits a record; wakes the worker only once enough bytes piled up.
    pub fn push_command(&self, slot: CommandSlot<'_>) {
        slot.commit();
        if self.fifo.pending_size() >= self.wake_threshold {
            self.wake.wake_consumer();
        }
    }

    pub fn push_command_and_wake(&self, slot: CommandSlot<'_>) {
        slot.commit();
        self.wake.wake_consumer();
    }

    pub fn push_command_and_sync(&self, slot: CommandSlot<'_>, spin: bool) {
        slot.commit();
        self.wake.wake_consumer();
        self.wake.sync(spin);
    }

    /// Commits a payload-less control record and waits for the drain.
    pub fn push_control_and_sync(&self, control_kind: u32, spin: bool) {
        let slot = self.fifo.allocate(control_kind, 0, &self.wake);
        self.push_command_and_sync(slot, spin);
    }

    pub fn push_control_and_wake(&self, control_kind: u32) {
        let slot = self.fifo.allocate(control_kind, 0, &self.wake);
        self.push_command_and_wake(slot);
    }

    /// Enqueues an owned callable to run on the worker thread.
    pub fn run_on_thread(&self, call: AsyncCall) {
        let mut slot = self.fifo.allocate(
            kind::ASYNC_CALL,
            std::mem::size_of::<AsyncCall>() as u32,
            &self.wake,
        );
        // SAFETY: the slot payload is at least `size_of::<AsyncCall>()` bytes
        // of exclusive storage; the worker moves the callable out (unaligned)
        // exactly once before the read cursor passes the record.
        unsafe { ptr::write_unaligned(slot.payload_ptr().cast::<AsyncCall>(), call) };
        self.push_command_and_wake(slot);
    }

    pub fn submit_backend_command(&self, command_kind: u32, payload: &[u8], wake: bool) {
        let slot = self.write_backend_command(command_kind, payload);
        if wake {
            self.push_command_and_wake(slot);
        } else {
            self.push_command(slot);
        }
    }

    pub fn submit_backend_command_and_sync(&self, command_kind: u32, payload: &[u8], spin: bool) {
        let slot = self.write_backend_command(command_kind, payload);
        self.push_command_and_sync(slot, spin);
    }

    fn write_backend_command(&self, command_kind: u32, payload: &[u8]) -> CommandSlot<'_> {
        debug_assert!(command_kind >= lyra_gpu_device::FIRST_BACKEND_COMMAND_KIND);
        let mut slot = self
            .fifo
            .allocate(command_kind, payload.len() as u32, &self.wake);
        slot.payload_mut()[..payload.len()].copy_from_slice(payload);
        slot
    }
}
