//! Frame presentation and GPU usage statistics.

use std::sync::atomic::{fence, Ordering};
use std::time::Instant;

use lyra_gpu_device::PresentResult;

use crate::host::SystemState;
use crate::worker::GpuWorker;

impl GpuWorker {
    /// Renders UI layers and presents the current frame.
    ///
    /// `allow_skip` lets the device drop the frame (occlusion, pacing);
    /// overlay and debug windows are still rendered so input keeps working.
    /// With `present_time` set and an explicit-present device, the worker
    /// sleeps until the target time between recording and submitting.
    pub(crate) fn present_frame(&mut self, allow_skip: bool, present_time: Option<Instant>) {
        // The backend may still hold mapped buffers for the frame.
        if let Some(backend) = &mut self.backend {
            backend.flush_render();
        }

        self.presents_since_last_update += 1;
        if !self.shared.perf_counters_updated.swap(true, Ordering::AcqRel) {
            self.update_performance_counters();
        }

        let Some(device) = self.device.as_mut() else {
            debug_assert!(false, "present without a device");
            return;
        };

        let skip_present = allow_skip && device.should_skip_frame();
        let explicit_present = present_time.is_some() && device.features().explicit_present;

        // Pairs with the producer's release fence publishing UI input state.
        fence(Ordering::Acquire);

        if !skip_present {
            self.ui.render_fullscreen_ui(device.as_mut());
            self.ui.render_text_overlays(device.as_mut());
            self.ui.render_osd_messages(device.as_mut());
            if self.host.system_state() == SystemState::Running {
                self.ui.render_software_cursors(device.as_mut());
            }
        }

        // Rendered even on skipped frames, otherwise mouse input breaks.
        self.ui.render_overlay_windows(device.as_mut());
        self.ui.render_debug_windows(device.as_mut());

        let result = if skip_present {
            PresentResult::SkipPresent
        } else if let Some(backend) = &mut self.backend {
            backend.present_display()
        } else {
            device.begin_present()
        };

        match result {
            PresentResult::Ok => {
                device.render_ui();
                device.end_present(explicit_present);

                if device.gpu_timing_enabled() {
                    self.accumulated_gpu_time += device.take_accumulated_gpu_time();
                }

                if explicit_present {
                    if let Some(target) = present_time {
                        let now = Instant::now();
                        if target > now {
                            std::thread::sleep(target - now);
                        }
                    }
                    device.submit_present();
                }
            }
            PresentResult::DeviceLost => {
                self.handle_device_lost();
                self.ui.end_frame();
            }
            PresentResult::SkipPresent | PresentResult::Error => {
                self.ui.end_frame();
            }
        }

        self.ui.new_frame();

        if let Some(backend) = &mut self.backend {
            backend.restore_device_context();
        }
    }

    /// Refreshes the published GPU usage/average over the elapsed window.
    pub(crate) fn update_performance_counters(&mut self) {
        let now = Instant::now();
        let frames = std::mem::take(&mut self.presents_since_last_update);
        let elapsed = now
            .duration_since(std::mem::replace(&mut self.last_perf_update, now))
            .as_secs_f32();

        let timing_enabled = self
            .device
            .as_ref()
            .is_some_and(|device| device.gpu_timing_enabled());
        if timing_enabled {
            let average = self.accumulated_gpu_time / frames.max(1) as f32;
            let usage = if elapsed > 0.0 {
                self.accumulated_gpu_time / (elapsed * 10.0)
            } else {
                0.0
            };
            self.shared.publish_average_gpu_time(average);
            self.shared.publish_gpu_usage(usage);
            self.accumulated_gpu_time = 0.0;
        }

        if self.settings.show_gpu_stats {
            if let Some(backend) = &mut self.backend {
                backend.update_statistics(frames);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // GPU usage arithmetic: `usage = accumulated_ms / (elapsed_s * 10)` maps
    // "busy the whole window" to ~100.
    #[test]
    fn gpu_usage_formula_scales_to_percent() {
        let accumulated_ms = 500.0f32;
        let elapsed_s = 0.5f32;
        let usage = accumulated_ms / (elapsed_s * 10.0);
        assert!((usage - 100.0).abs() < f32::EPSILON);

        let half_busy = 250.0f32 / (0.5 * 10.0);
        assert!((half_busy - 50.0).abs() < f32::EPSILON);
    }
}
