//! Scan-out engine collaborator seam.
//!
//! The pipeline never touches registers directly; everything goes through
//! this trait so the whole commit path runs against a mock in tests.

use std::time::Duration;

use crate::config::PanelConfig;
use crate::geometry::Rect;
use crate::registers::WindowRegs;

pub trait DisplayHw: Send + Sync {
    fn init(&self, panel: &PanelConfig) -> anyhow::Result<()>;
    /// Starts scan-out. In self-refresh modes this arms the trigger path.
    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self, reset: bool) -> anyhow::Result<()>;

    fn set_interrupts(&self, on: bool);
    fn set_vsync_interrupt(&self, on: bool);
    /// Panel-fault (crack/error detect) interrupt sources.
    fn set_recovery_interrupts(&self, on: bool);
    fn clear_interrupt_pending(&self);

    /// Holds a window's shadow registers so a partially written set can
    /// never latch into the active registers.
    fn shadow_protect(&self, win: usize, protect: bool);
    fn write_window(&self, win: usize, regs: &WindowRegs);
    fn clear_window(&self, win: usize);
    /// Programs or clears the fetch-skip rectangle (window-relative).
    fn set_block_area(&self, win: usize, area: Option<Rect>);

    /// Unmasks (`true`) or masks the frame trigger.
    fn set_trigger(&self, unmasked: bool);
    /// Stops refreshes after the next frame completes.
    fn per_frame_off(&self);
    /// Kicks one standalone update of the active registers.
    fn kick_update(&self);

    /// Waits for the shadow set to latch. Returns false on timeout.
    fn wait_shadow_update(&self, timeout: Duration) -> bool;
    /// Waits for the scan-out line counter to reach zero.
    fn wait_linecnt_zero(&self, timeout: Duration) -> bool;
    /// True while scan-out sits idle between frames.
    fn scanout_idle(&self) -> bool;
    /// Current scan-out dimensions as latched by the engine and the link.
    fn scanout_size(&self) -> (u32, u32);

    fn set_content_protection(&self, on: bool) -> anyhow::Result<()>;

    /// Register dump for timeout diagnostics.
    fn dump(&self) -> String;
}

/// Scoped shadow-protect bracket over every window. Unprotects on every
/// exit path, including panics in the commit sequence.
pub struct ShadowGuard<'a> {
    hw: &'a dyn DisplayHw,
    windows: usize,
}

impl<'a> ShadowGuard<'a> {
    pub fn protect(hw: &'a dyn DisplayHw, windows: usize) -> Self {
        for w in 0..windows {
            hw.shadow_protect(w, true);
        }
        Self { hw, windows }
    }
}

impl Drop for ShadowGuard<'_> {
    fn drop(&mut self) {
        for w in 0..self.windows {
            self.hw.shadow_protect(w, false);
        }
    }
}
