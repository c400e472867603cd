//! Power and recovery state machine.
//!
//! All transitions run under the single output lock. The low-power display
//! state is guarded by a re-entrant integer block count rather than a lock,
//! so any path that needs the display live can stack a block and kick an
//! exit without caring who else holds one.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::bandwidth;
use crate::config::PsrMode;
use crate::events::DisplayEvent;
use crate::partial;
use crate::pipeline::{OutputState, PipelineCore};

/// Where the display is in its power lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Off,
    /// Powered by the bootloader, never driven by this pipeline yet.
    Init,
    On,
    LowPowerEnterRequested,
    /// Link parked, panel self-refreshing the last frame.
    LowPowerDisplay,
    LowPowerExitRequested,
    /// Windows handed to the secure world; submissions short-circuit.
    TuiActive,
}

impl PipelineCore {
    pub(crate) fn enable(&self) -> anyhow::Result<()> {
        let mut out = self.output.lock().unwrap();
        self.enable_locked(&mut out)
    }

    pub(crate) fn enable_locked(&self, out: &mut OutputState) -> anyhow::Result<()> {
        if out.state == DeviceState::Init {
            // Bootloader left the panel lit; just take ownership.
            info!("display in init state, adopting");
            out.state = DeviceState::On;
            self.events
                .record(DisplayEvent::PowerTransition(DeviceState::On));
            return Ok(());
        }
        if out.state == DeviceState::On {
            warn!("display already enabled");
            return Ok(());
        }
        let from_low_power = matches!(
            out.state,
            DeviceState::LowPowerDisplay | DeviceState::LowPowerExitRequested
        );

        self.qos_tracker.reset();
        let default_bw = bandwidth::default_bandwidth(&self.config.panel);
        if self.qos_tracker.apply(self.qos.as_ref(), default_bw, false) {
            self.events.record(DisplayEvent::QosChange(default_bw));
        }

        if from_low_power {
            self.transport
                .exit_low_power_link()
                .context("failed to exit low-power link")?;
        } else {
            self.transport
                .set_stream(true)
                .context("failed to start output stream")?;
        }
        self.allocator.activate();

        self.hw
            .init(&self.config.panel)
            .context("scan-out engine init failed")?;
        self.hw.start().context("scan-out start failed")?;

        if self.config.features.window_update && out.in_partial {
            if from_low_power {
                // The link kept the partial timing; re-push it to be sure.
                if let Err(e) = self.transport.set_porch(&out.update_rect) {
                    error!("failed to restore partial porch: {e:#}");
                }
            } else {
                // Cold resume scans out the whole panel again.
                out.update_rect = partial::full_screen(&self.config.panel);
                out.in_partial = false;
            }
        }

        self.hw.set_interrupts(true);
        if !from_low_power && self.config.pipeline.psr_mode == PsrMode::Command {
            self.hw.set_recovery_interrupts(true);
        }
        self.parked_low_power.store(false, Ordering::SeqCst);
        out.state = DeviceState::On;
        self.events
            .record(DisplayEvent::PowerTransition(DeviceState::On));
        info!("display enabled");
        Ok(())
    }

    pub(crate) fn disable(&self) -> anyhow::Result<()> {
        let mut out = self.output.lock().unwrap();
        self.disable_locked(&mut out, false)
    }

    pub(crate) fn disable_locked(
        &self,
        out: &mut OutputState,
        to_low_power: bool,
    ) -> anyhow::Result<()> {
        if out.state == DeviceState::TuiActive {
            self.exit_tui_locked(out);
        }
        if out.state == DeviceState::Off {
            info!("display already disabled");
            return Ok(());
        }
        if out.state == DeviceState::LowPowerDisplay && !to_low_power {
            // Wake the link so the stop sequence sees a live panel.
            self.transport
                .exit_low_power_link()
                .context("failed to exit low-power link")?;
            self.parked_low_power.store(false, Ordering::SeqCst);
        }

        if !to_low_power {
            self.hw.set_recovery_interrupts(false);
        }
        self.flush();
        self.hw.set_interrupts(false);

        if self.config.pipeline.psr_mode == PsrMode::Video {
            self.transport
                .set_stream(false)
                .context("failed to stop output stream")?;
        }
        self.hw.stop(true).context("scan-out stop failed")?;
        self.hw.clear_interrupt_pending();
        if self.protection_on.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.hw.set_content_protection(false) {
                error!("failed to drop content protection: {e:#}");
            } else {
                self.events.record(DisplayEvent::ContentProtection(false));
            }
        }
        self.allocator.deactivate();

        if to_low_power {
            match self.transport.enter_low_power_link() {
                Ok(()) => {
                    self.parked_low_power.store(true, Ordering::SeqCst);
                    out.state = DeviceState::LowPowerDisplay;
                }
                Err(e) => {
                    error!("failed to enter low-power link, turning off: {e:#}");
                    out.state = DeviceState::Off;
                }
            }
        } else {
            if self.config.pipeline.psr_mode == PsrMode::Command {
                self.transport
                    .set_stream(false)
                    .context("failed to stop output stream")?;
            }
            out.state = DeviceState::Off;
        }
        self.events.record(DisplayEvent::PowerTransition(out.state));

        let default_bw = bandwidth::default_bandwidth(&self.config.panel);
        if self.qos_tracker.apply(self.qos.as_ref(), default_bw, true) {
            self.events.record(DisplayEvent::QosChange(default_bw));
        }
        info!(state = ?out.state, "display disabled");
        Ok(())
    }

    /// Screen blank entry point. Suppresses the few-window vsync-skip waits
    /// around the transition so the worker never stalls a power change.
    pub(crate) fn set_blank(&self, blank: bool) -> anyhow::Result<()> {
        self.lpd_block_exit();
        self.extra_vsync_skip
            .store(crate::commit::VSYNC_SKIP_SUPPRESS, Ordering::SeqCst);
        self.vsync_cond.notify_all();
        let result = {
            let mut out = self.output.lock().unwrap();
            if blank {
                self.disable_locked(&mut out, false)
            } else {
                self.enable_locked(&mut out)
            }
        };
        self.lpd_unblock();
        result
    }

    /// Requests low-power display. A standing block makes this a no-op.
    pub(crate) fn enter_low_power(&self) -> anyhow::Result<()> {
        if self.lpd_block.load(Ordering::SeqCst) > 0 {
            debug!(
                blocks = self.lpd_block.load(Ordering::SeqCst),
                "low-power entry blocked"
            );
            return Ok(());
        }
        let mut out = self.output.lock().unwrap();
        if out.state != DeviceState::On {
            return Ok(());
        }
        out.state = DeviceState::LowPowerEnterRequested;
        self.events
            .record(DisplayEvent::PowerTransition(DeviceState::LowPowerEnterRequested));
        self.disable_locked(&mut out, true)
    }

    pub(crate) fn exit_low_power(&self) -> anyhow::Result<()> {
        let mut out = self.output.lock().unwrap();
        if out.state != DeviceState::LowPowerDisplay {
            return Ok(());
        }
        out.state = DeviceState::LowPowerExitRequested;
        self.events
            .record(DisplayEvent::PowerTransition(DeviceState::LowPowerExitRequested));
        self.enable_locked(&mut out)
    }

    /// Re-entrant low-power block. Paired with `lpd_unblock`.
    pub(crate) fn lpd_block(&self) {
        self.lpd_block.fetch_add(1, Ordering::SeqCst);
    }

    /// Block and, when the display is parked, kick it awake.
    pub(crate) fn lpd_block_exit(&self) {
        self.lpd_block();
        if self.parked_low_power.load(Ordering::SeqCst) {
            if let Err(e) = self.exit_low_power() {
                error!("low-power exit failed: {e:#}");
            }
        }
    }

    pub(crate) fn lpd_unblock(&self) {
        let prev = self.lpd_block.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "unbalanced low-power unblock");
    }

    /// Hands the windows to the secure world. The display stays powered but
    /// this pipeline stops driving it until `exit_tui`.
    pub(crate) fn enter_tui(&self) -> anyhow::Result<()> {
        {
            let out = self.output.lock().unwrap();
            if out.state == DeviceState::Off {
                anyhow::bail!("secure hand-off requires an active display");
            }
        }
        self.lpd_block_exit();
        self.flush();
        let vsync_timeout = Duration::from_millis(self.config.timeouts.vsync_ms);
        let _ = self.wait_vsync(Some(vsync_timeout));

        let mut out = self.output.lock().unwrap();
        for w in 0..self.config.pipeline.max_windows {
            self.hw.clear_window(w);
        }
        if self.config.features.window_update && out.in_partial {
            // Secure world scans out the whole panel.
            let full = partial::full_screen(&self.config.panel);
            let linecnt = Duration::from_millis(self.config.timeouts.linecnt_ms);
            if !self.hw.wait_linecnt_zero(linecnt) {
                warn!("line counter still running before secure hand-off");
            }
            if let Err(e) = self.transport.partial_area_command(&full) {
                error!("failed to restore full-screen panel region: {e:#}");
            }
            if let Err(e) = self.transport.set_porch(&full) {
                error!("failed to restore full-screen porch: {e:#}");
            }
            out.update_rect = full;
            out.in_partial = false;
        }
        self.hw.set_trigger(false);
        self.hw.per_frame_off();
        self.hw.kick_update();
        out.state = DeviceState::TuiActive;
        self.events.record(DisplayEvent::TuiEnter);
        self.events
            .record(DisplayEvent::PowerTransition(DeviceState::TuiActive));

        self.qos_tracker.reset();
        let default_bw = bandwidth::default_bandwidth(&self.config.panel);
        if self.qos_tracker.apply(self.qos.as_ref(), default_bw, false) {
            self.events.record(DisplayEvent::QosChange(default_bw));
        }
        info!("entered secure display hand-off");
        Ok(())
    }

    pub(crate) fn exit_tui(&self) -> anyhow::Result<()> {
        let mut out = self.output.lock().unwrap();
        if out.state != DeviceState::TuiActive {
            anyhow::bail!("display is not in secure hand-off");
        }
        self.exit_tui_locked(&mut out);
        Ok(())
    }

    pub(crate) fn exit_tui_locked(&self, out: &mut OutputState) {
        out.state = DeviceState::On;
        self.events.record(DisplayEvent::TuiExit);
        self.events
            .record(DisplayEvent::PowerTransition(DeviceState::On));
        self.lpd_unblock();
        info!("secure display hand-off released");
    }

    /// Panel fault recovery: restart the pixel stream while every vsync
    /// waiter is released, then force a full-screen reprogram.
    pub(crate) fn recover(&self) -> anyhow::Result<()> {
        self.lpd_block_exit();
        let result = self.recover_inner();
        self.lpd_unblock();
        result
    }

    fn recover_inner(&self) -> anyhow::Result<()> {
        let mut out = self.output.lock().unwrap();
        if out.state != DeviceState::On {
            warn!(state = ?out.state, "recovery skipped, display not active");
            return Ok(());
        }
        if self.config.pipeline.psr_mode == PsrMode::Command {
            self.ignore_vsync.store(true, Ordering::SeqCst);
            self.vsync_cond.notify_all();
        }
        self.flush();

        let restore_ignore = |r: anyhow::Result<()>| -> anyhow::Result<()> {
            self.ignore_vsync.store(false, Ordering::SeqCst);
            r
        };
        if let Err(e) = self.transport.set_stream(false) {
            return restore_ignore(Err(e).context("failed to stop stream for recovery"));
        }
        thread::sleep(Duration::from_millis(self.config.timeouts.recovery_settle_ms));
        if let Err(e) = self.transport.set_stream(true) {
            return restore_ignore(Err(e).context("failed to restart stream after recovery"));
        }
        self.hw.clear_interrupt_pending();
        self.ignore_vsync.store(false, Ordering::SeqCst);

        if self.config.features.window_update {
            out.update_rect = partial::full_screen(&self.config.panel);
            out.in_partial = false;
        }
        self.events.record(DisplayEvent::Recovery);
        info!("panel recovery completed");
        Ok(())
    }

    /// Fault interrupt entry point: stop trusting vsync immediately so no
    /// waiter hangs on a dead panel. Recovery clears the flag.
    pub(crate) fn handle_panel_fault(&self) {
        warn!("panel fault detected, ignoring vsync until recovery");
        self.ignore_vsync.store(true, Ordering::SeqCst);
        self.vsync_cond.notify_all();
        self.events.record(DisplayEvent::PanelFault);
    }
}
