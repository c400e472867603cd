//! The serialized commit worker.
//!
//! One dedicated thread drains the frame queue. It is the only writer of
//! hardware registers and of the persistent window slots, so the whole
//! commit sequence needs no register-level locking. A dequeued frame always
//! runs to completion; timeouts inside it are logged and tolerated, and the
//! completion timeline advances by exactly one no matter what happened.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::buffer::DmaBufferBinding;
use crate::config::{PsrMode, TrigMode};
use crate::events::DisplayEvent;
use crate::geometry::Rect;
use crate::hw::ShadowGuard;
use crate::pipeline::PipelineCore;
use crate::registers::{self, RegisterSnapshot, WinFlags, WindowRegs};
use crate::window::MAX_PLANES;

/// Frames with at most this many fetch windows honor queued extra vsync
/// waits before programming.
pub(crate) const VSYNC_SKIP_MAX_WINDOWS: usize = 2;

/// Sentinel meaning "drop all queued extra waits"; power transitions set it
/// so the worker never stalls a blank on cosmetic waits.
pub(crate) const VSYNC_SKIP_SUPPRESS: i32 = i32::MAX / 2;

pub(crate) enum WorkItem {
    Commit(RegisterSnapshot),
    Shutdown,
}

pub(crate) fn run_worker(core: Arc<PipelineCore>, rx: Receiver<WorkItem>) {
    loop {
        match rx.recv() {
            Ok(WorkItem::Commit(snapshot)) => {
                core.process_snapshot(snapshot);
                core.lpd_unblock();
                let mut pending = core.pending.lock().unwrap();
                *pending -= 1;
                core.pending_cond.notify_all();
            }
            Ok(WorkItem::Shutdown) | Err(_) => break,
        }
    }
    debug!("commit worker stopped");
}

impl PipelineCore {
    pub(crate) fn process_snapshot(&self, mut snap: RegisterSnapshot) {
        let t = &self.config.timeouts;
        let fence_timeout = Duration::from_millis(t.fence_ms);
        let vsync_timeout = Duration::from_millis(t.vsync_ms);

        // A frame can arrive with the display parked when the submitter
        // raced low-power entry; wake it before touching registers.
        if self.parked_low_power.load(Ordering::SeqCst) {
            if let Err(e) = self.exit_low_power() {
                error!("low-power exit before commit failed: {e:#}");
            }
        }

        // Superseded bindings, released once the new frame is on screen.
        let old_bindings: Vec<[DmaBufferBinding; MAX_PLANES]> = {
            let mut windows = self.windows.lock().unwrap();
            windows
                .iter_mut()
                .map(|w| w.replace_bindings(Default::default()))
                .collect()
        };

        for (i, staged) in snap.windows.iter_mut().enumerate() {
            if let Some(fence) = staged.bindings[0].take_fence() {
                if !fence.wait(fence_timeout) {
                    warn!(win = i, "input fence wait timed out");
                    self.events.record(DisplayEvent::FenceTimeout { win: i });
                }
            }
        }

        if self
            .qos_tracker
            .apply(self.qos.as_ref(), snap.bandwidth, false)
        {
            self.events.record(DisplayEvent::QosChange(snap.bandwidth));
        }

        if self.config.features.vsync_skip && snap.enabled_count <= VSYNC_SKIP_MAX_WINDOWS {
            let mut waits = self.extra_vsync_skip.swap(0, Ordering::SeqCst);
            if waits >= VSYNC_SKIP_SUPPRESS {
                waits = 0;
            }
            while waits > 0 {
                if self.extra_vsync_skip.load(Ordering::SeqCst) >= VSYNC_SKIP_SUPPRESS {
                    self.extra_vsync_skip.store(0, Ordering::SeqCst);
                    break;
                }
                let _ = self.wait_vsync(Some(vsync_timeout));
                waits -= 1;
            }
        }

        self.program_windows(&mut snap);

        let want_protection = snap.protected;
        if self.protection_on.load(Ordering::SeqCst) != want_protection {
            self.toggle_content_protection(want_protection);
        }

        // Let the trigger latch the shadow set into the active registers.
        self.hw.set_trigger(true);

        if self.wait_vsync(Some(vsync_timeout)).is_err() {
            self.events.record(DisplayEvent::VsyncTimeout);
            error!(dump = %self.hw.dump(), "vsync timed out after commit");
        }
        if !self
            .hw
            .wait_shadow_update(Duration::from_millis(t.shadow_update_ms))
        {
            self.events.record(DisplayEvent::ShadowUpdateTimeout);
            error!(dump = %self.hw.dump(), "shadow registers failed to latch");
        }

        if self.config.pipeline.psr_mode == PsrMode::Command {
            self.poll_size_match(&snap.update_rect, Duration::from_millis(t.size_mismatch_ms));
        }

        if self.config.pipeline.trig_mode == TrigMode::Hw {
            self.hw.set_trigger(false);
        }

        for mut planes in old_bindings {
            for binding in planes.iter_mut() {
                binding.release(self.allocator.as_ref(), fence_timeout);
            }
        }

        self.timeline.advance();
        self.events.record(DisplayEvent::Commit {
            seq: snap.seq,
            windows: snap.enabled_count,
        });

        if self
            .qos_tracker
            .apply(self.qos.as_ref(), snap.bandwidth, true)
        {
            self.events.record(DisplayEvent::QosChange(snap.bandwidth));
        }
    }

    /// Writes the snapshot into the shadow registers inside one protect
    /// bracket and installs the new bindings into the persistent slots.
    fn program_windows(&self, snap: &mut RegisterSnapshot) {
        if self.config.pipeline.trig_mode == TrigMode::Hw {
            self.hw.set_trigger(false);
        }
        let _guard = ShadowGuard::protect(self.hw.as_ref(), snap.windows.len());

        let mut all_regs: Vec<WindowRegs> =
            snap.windows.iter().map(|s| s.regs.clone()).collect();
        registers::validate_channel_map(&mut all_regs);

        if snap.need_update {
            self.reconfigure_update_region(&snap.update_rect);
            self.events
                .record(DisplayEvent::PartialUpdate(snap.update_rect));
        }

        let mut windows = self.windows.lock().unwrap();
        for (i, staged) in snap.windows.iter_mut().enumerate() {
            let regs = &all_regs[i];
            if regs.flags.contains(WinFlags::ENABLE) {
                self.hw.write_window(i, regs);
            } else {
                self.hw.clear_window(i);
            }
            self.hw.set_block_area(i, regs.block);
            windows[i].bindings = std::mem::take(&mut staged.bindings);
            windows[i].config = staged.config.clone();
        }
    }

    /// Pushes a changed update region to the panel and the link timing.
    /// Failures leave the previous region in force and are logged; the
    /// frame still commits.
    fn reconfigure_update_region(&self, rect: &Rect) {
        let linecnt = Duration::from_millis(self.config.timeouts.linecnt_ms);
        if !self.hw.wait_linecnt_zero(linecnt) {
            warn!("line counter still running before region change");
            self.events.record(DisplayEvent::LinecntTimeout);
        }
        if let Err(e) = self.transport.partial_area_command(rect) {
            error!(?rect, "panel partial-area command failed: {e:#}");
        }
        if let Err(e) = self.transport.set_porch(rect) {
            error!(?rect, "link porch reprogram failed: {e:#}");
        }
    }

    fn toggle_content_protection(&self, on: bool) {
        let linecnt = Duration::from_millis(self.config.timeouts.linecnt_ms);
        if !self.hw.wait_linecnt_zero(linecnt) {
            warn!("line counter still running before protection change");
            self.events.record(DisplayEvent::LinecntTimeout);
        }
        match self.hw.set_content_protection(on) {
            Ok(()) => {
                self.protection_on.store(on, Ordering::SeqCst);
                self.events.record(DisplayEvent::ContentProtection(on));
            }
            Err(e) => error!(on, "content protection change failed: {e:#}"),
        }
    }

    /// The engine and the link must agree on the scan-out size before the
    /// next frame; a transient mismatch produces a corrupted frame the
    /// panel keeps in self-refresh. Poll until they settle or give up.
    fn poll_size_match(&self, expected_rect: &Rect, timeout: Duration) {
        let expected = (expected_rect.w, expected_rect.h);
        let deadline = Instant::now() + timeout;
        let mut logged = false;
        while self.hw.scanout_idle() {
            let engine = self.hw.scanout_size();
            let link = self.transport.link_size();
            if engine == expected && link == expected {
                return;
            }
            if !logged {
                self.events.record(DisplayEvent::SizeMismatch {
                    expected,
                    actual: engine,
                });
                logged = true;
            }
            if Instant::now() >= deadline {
                error!(
                    ?expected,
                    ?engine,
                    ?link,
                    "scan-out size mismatch did not settle"
                );
                return;
            }
            thread::sleep(Duration::from_micros(100));
        }
    }
}
