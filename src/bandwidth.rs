//! Memory-bandwidth estimation and QoS sequencing around commits.

use std::sync::Mutex;

use tracing::debug;

use crate::config::PanelConfig;
use crate::format::PixelFormat;
use crate::window::{WindowConfig, WindowState};

/// System QoS collaborator. Receives the pipeline's aggregate read-bandwidth
/// demand in bytes per second.
pub trait QosController: Send + Sync {
    fn request_bandwidth(&self, bytes_per_second: u64);
}

/// One window's contribution: actual on-screen size times bytes per pixel
/// times refresh rate.
pub fn window_bandwidth(width: u32, height: u32, bytes_per_pixel: u32, fps: u32) -> u64 {
    width as u64 * height as u64 * bytes_per_pixel as u64 * fps as u64
}

/// Aggregate demand of a frame's enabled buffer windows.
pub fn estimate(configs: &[WindowConfig], fps: u32) -> u64 {
    configs
        .iter()
        .filter(|c| c.state == WindowState::Buffer)
        .filter_map(|c| {
            let format = PixelFormat::from_raw(c.format).ok()?;
            let bpp = format.bits_per_pixel();
            Some(window_bandwidth(c.dst.w, c.dst.h, bpp.div_ceil(8), fps))
        })
        .sum()
}

/// Floor requested while no frame-specific estimate applies: three
/// full-screen 32-bit windows.
pub fn default_bandwidth(panel: &PanelConfig) -> u64 {
    window_bandwidth(panel.xres, panel.yres, 4, panel.fps) * 3
}

/// Sequences QoS changes around commits: demand increases land before the
/// frame is programmed, decreases after it is on screen, and unchanged
/// demand is never re-requested.
pub struct QosTracker {
    prev: Mutex<u64>,
}

impl QosTracker {
    pub fn new() -> Self {
        Self { prev: Mutex::new(0) }
    }

    /// `after` is false on the pre-commit edge and true on the post-commit
    /// edge. The request fires on at most one of the two; returns true when
    /// it did.
    pub fn apply(&self, qos: &dyn QosController, requested: u64, after: bool) -> bool {
        let mut prev = self.prev.lock().unwrap();
        if *prev == requested {
            return false;
        }
        if (after && *prev > requested) || (!after && *prev < requested) {
            qos.request_bandwidth(requested);
            *prev = requested;
            debug!(bandwidth = requested, "qos bandwidth updated");
            return true;
        }
        false
    }

    /// Forgets the last requested level so the next `apply` always fires.
    /// Power transitions use this before requesting the default floor.
    pub fn reset(&self) {
        *self.prev.lock().unwrap() = 0;
    }
}

impl Default for QosTracker {
    fn default() -> Self {
        Self::new()
    }
}
