//! Pipeline front end.
//!
//! `Pipeline` is the public handle: it owns the commit worker thread and
//! exposes frame submission, vsync, power, and diagnostics. All per-frame
//! validation and staging happens on the submitter's thread under the
//! output lock; the worker only ever sees fully staged snapshots.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bandwidth::{self, QosController, QosTracker};
use crate::buffer::{Allocator, DmaBufferBinding};
use crate::commit::{self, WorkItem};
use crate::config::{Config, PsrMode, TrigMode};
use crate::events::{DiagnosticLog, DisplayEvent, LogEntry};
use crate::geometry::Rect;
use crate::hw::DisplayHw;
use crate::partial::{self, UpdatePlan};
use crate::power::DeviceState;
use crate::registers::{self, RegisterSnapshot, StageError, StagedWindow, WinFlags, WindowRegs};
use crate::sync::{CompletionTimeline, FrameFence};
use crate::transport::OutputTransport;
use crate::window::{Window, WindowConfig, WindowState};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The frame failed a fatal check; nothing was queued and every buffer
    /// touched during staging has been released.
    #[error(transparent)]
    Invalid(#[from] StageError),
    /// The commit worker is gone; the pipeline is shutting down.
    #[error("commit worker unavailable")]
    Exhausted,
}

#[derive(Debug, Error)]
pub enum WaitVsyncError {
    #[error("vsync did not arrive in time")]
    Timeout,
}

/// State guarded by the single output lock: the power state machine and the
/// persisted partial-update region. `timeline_max` is the highest completion
/// target handed out as a fence and only grows under this lock, so fences
/// signal in submission order.
pub(crate) struct OutputState {
    pub state: DeviceState,
    pub update_rect: Rect,
    pub in_partial: bool,
    pub timeline_max: u64,
}

/// Shared pipeline state. Split from the `Pipeline` handle so the commit
/// worker can hold its own reference.
pub(crate) struct PipelineCore {
    pub(crate) config: Config,
    pub(crate) hw: Arc<dyn DisplayHw>,
    pub(crate) transport: Arc<dyn OutputTransport>,
    pub(crate) allocator: Arc<dyn Allocator>,
    pub(crate) qos: Arc<dyn QosController>,

    pub(crate) output: Mutex<OutputState>,
    /// Persistent window slots; only the commit worker mutates them once a
    /// frame is accepted.
    pub(crate) windows: Mutex<Vec<Window>>,
    pub(crate) timeline: CompletionTimeline,

    pub(crate) vsync_count: Mutex<u64>,
    pub(crate) vsync_cond: Condvar,
    vsync_refs: Mutex<i32>,
    vsync_user_on: AtomicBool,
    /// Set on a panel fault so no waiter hangs on a dead panel; cleared by
    /// recovery.
    pub(crate) ignore_vsync: AtomicBool,
    pub(crate) extra_vsync_skip: AtomicI32,

    pub(crate) lpd_block: AtomicI32,
    pub(crate) parked_low_power: AtomicBool,

    /// Frames queued but not yet on screen; `flush` waits this to zero.
    pub(crate) pending: Mutex<usize>,
    pub(crate) pending_cond: Condvar,
    tx: Mutex<Option<Sender<WorkItem>>>,

    pub(crate) events: DiagnosticLog,
    pub(crate) qos_tracker: QosTracker,
    pub(crate) protection_on: AtomicBool,
    seq: AtomicU64,
}

/// The display pipeline handle. Dropping it shuts the worker down after the
/// queued frames drain.
pub struct Pipeline {
    core: Arc<PipelineCore>,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        hw: Arc<dyn DisplayHw>,
        transport: Arc<dyn OutputTransport>,
        allocator: Arc<dyn Allocator>,
        qos: Arc<dyn QosController>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.pipeline.max_windows > 0,
            "pipeline needs at least one window slot"
        );
        anyhow::ensure!(
            config.panel.xres > 0 && config.panel.yres > 0,
            "panel resolution must be nonzero"
        );

        let full = partial::full_screen(&config.panel);
        let windows = (0..config.pipeline.max_windows).map(Window::new).collect();
        let events = DiagnosticLog::new(config.pipeline.event_log_capacity);
        let (tx, rx) = mpsc::channel();

        let core = Arc::new(PipelineCore {
            config,
            hw,
            transport,
            allocator,
            qos,
            output: Mutex::new(OutputState {
                // The bootloader may have left the panel lit; `enable`
                // adopts it without a power cycle.
                state: DeviceState::Init,
                update_rect: full,
                in_partial: false,
                timeline_max: 0,
            }),
            windows: Mutex::new(windows),
            timeline: CompletionTimeline::new(),
            vsync_count: Mutex::new(0),
            vsync_cond: Condvar::new(),
            vsync_refs: Mutex::new(0),
            vsync_user_on: AtomicBool::new(false),
            ignore_vsync: AtomicBool::new(false),
            extra_vsync_skip: AtomicI32::new(0),
            lpd_block: AtomicI32::new(0),
            parked_low_power: AtomicBool::new(false),
            pending: Mutex::new(0),
            pending_cond: Condvar::new(),
            tx: Mutex::new(Some(tx)),
            events,
            qos_tracker: QosTracker::new(),
            protection_on: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let worker = std::thread::Builder::new()
            .name("strata-commit".into())
            .spawn({
                let core = Arc::clone(&core);
                move || commit::run_worker(core, rx)
            })
            .context("failed to spawn commit worker")?;

        info!(
            windows = core.config.pipeline.max_windows,
            psr = ?core.config.pipeline.psr_mode,
            "pipeline ready"
        );
        Ok(Self {
            core,
            worker: Some(worker),
        })
    }

    /// Stages one frame and queues it for commit. Returns a fence that
    /// signals once the frame is on screen (or, when the display cannot
    /// show it, immediately).
    pub fn submit(&self, configs: &[WindowConfig]) -> Result<FrameFence, SubmitError> {
        self.core.lpd_block_exit();
        let result = self.core.submit(configs);
        self.core.lpd_unblock();
        result
    }

    /// Blocks until the next vsync. `None` waits forever.
    pub fn wait_vsync(&self, timeout: Option<Duration>) -> Result<(), WaitVsyncError> {
        self.core.wait_vsync(timeout)
    }

    /// Vsync interrupt entry point.
    pub fn handle_vsync(&self) {
        self.core.handle_vsync();
    }

    /// Panel-fault interrupt entry point.
    pub fn handle_panel_fault(&self) {
        self.core.handle_panel_fault();
    }

    /// Client-driven vsync interrupt request, reference counted against the
    /// pipeline's own waiters.
    pub fn set_vsync_enabled(&self, on: bool) {
        if self.core.vsync_user_on.swap(on, Ordering::SeqCst) == on {
            return;
        }
        if on {
            self.core.activate_vsync();
        } else {
            self.core.deactivate_vsync();
        }
    }

    /// Queues extra vsync waits before the next few-window commits.
    pub fn add_vsync_skip(&self, frames: u32) {
        self.core
            .extra_vsync_skip
            .fetch_add(frames as i32, Ordering::SeqCst);
    }

    pub fn enable(&self) -> anyhow::Result<()> {
        self.core.enable()
    }

    pub fn disable(&self) -> anyhow::Result<()> {
        self.core.disable()
    }

    /// Blank (`true`) or unblank the display.
    pub fn set_blank(&self, blank: bool) -> anyhow::Result<()> {
        self.core.set_blank(blank)
    }

    pub fn enter_low_power(&self) -> anyhow::Result<()> {
        self.core.enter_low_power()
    }

    pub fn exit_low_power(&self) -> anyhow::Result<()> {
        self.core.exit_low_power()
    }

    pub fn enter_tui(&self) -> anyhow::Result<()> {
        self.core.enter_tui()
    }

    pub fn exit_tui(&self) -> anyhow::Result<()> {
        self.core.exit_tui()
    }

    /// Restarts the pixel stream after a panel fault.
    pub fn recover(&self) -> anyhow::Result<()> {
        self.core.recover()
    }

    /// Waits until every queued frame is on screen.
    pub fn flush(&self) {
        self.core.flush();
    }

    pub fn device_state(&self) -> DeviceState {
        self.core.output.lock().unwrap().state
    }

    /// Frames completed so far.
    pub fn timeline_value(&self) -> u64 {
        self.core.timeline.value()
    }

    /// Copy of the diagnostic event ring, oldest first.
    pub fn events(&self) -> Vec<LogEntry> {
        self.core.events.snapshot()
    }

    fn shutdown_inner(&mut self) {
        if let Some(tx) = self.core.tx.lock().unwrap().take() {
            let _ = tx.send(WorkItem::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Drains the queue and stops the worker. Dropping the pipeline does
    /// the same.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl PipelineCore {
    pub(crate) fn submit(&self, configs: &[WindowConfig]) -> Result<FrameFence, SubmitError> {
        let max = self.config.pipeline.max_windows;
        let mut out = self.output.lock().unwrap();

        if matches!(out.state, DeviceState::Off | DeviceState::TuiActive)
            || self.ignore_vsync.load(Ordering::SeqCst)
        {
            // Nothing will scan this frame out; satisfy the client right
            // away so it never blocks on a dark display.
            warn!(state = ?out.state, "frame dropped, display not accepting frames");
            out.timeline_max += 1;
            let fence = self.timeline.create_fence(out.timeline_max);
            self.timeline.advance();
            return Ok(fence);
        }

        // Split the request into per-slot window configs and the optional
        // update-region carrier.
        let mut update_req = None;
        let mut work: Vec<WindowConfig> = vec![WindowConfig::default(); max];
        for (i, cfg) in configs.iter().enumerate() {
            if cfg.state == WindowState::UpdateRegion {
                update_req = Some(cfg.dst);
            } else if i < max {
                work[i] = cfg.clone();
            } else if cfg.state != WindowState::Disabled {
                warn!(win = i, "request beyond the last window slot ignored");
            }
        }

        // Reborrow so the two region fields can be borrowed independently
        // of the guard.
        let out = &mut *out;
        let plan = if self.config.features.window_update {
            partial::plan_window_update(
                &mut work,
                update_req,
                &mut out.update_rect,
                &mut out.in_partial,
                &self.config.panel,
            )
        } else {
            UpdatePlan {
                rect: partial::full_screen(&self.config.panel),
                need_update: false,
            }
        };

        let blocks = if self.config.features.blocking_mode {
            registers::plan_blocking(&mut work)
        } else {
            vec![None; max]
        };

        let mut staged: Vec<StagedWindow> = Vec::with_capacity(max);
        for (i, cfg) in work.iter().enumerate() {
            match self.stage_one(i, cfg, blocks[i]) {
                Ok(s) => staged.push(s),
                Err(e) => {
                    warn!(win = i, "frame rejected: {e}");
                    self.release_staged(&mut staged);
                    return Err(SubmitError::Invalid(e));
                }
            }
        }

        // Only windows that survived validation fetch memory.
        let enabled: Vec<WindowConfig> = staged
            .iter()
            .filter(|s| {
                s.config.state == WindowState::Buffer && s.regs.flags.contains(WinFlags::ENABLE)
            })
            .map(|s| s.config.clone())
            .collect();
        let enabled_count = enabled.len();
        let bandwidth = bandwidth::estimate(&enabled, self.config.panel.fps);
        let protected = staged
            .iter()
            .any(|s| s.regs.flags.contains(WinFlags::ENABLE) && s.regs.protected);

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = RegisterSnapshot {
            seq,
            windows: staged,
            bandwidth,
            update_rect: plan.rect,
            need_update: plan.need_update,
            enabled_count,
            protected,
        };

        let tx = self.tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else {
            let mut lost = snapshot;
            self.release_staged(&mut lost.windows);
            return Err(SubmitError::Exhausted);
        };

        // The block keeps low-power entry away until the worker is done
        // with this frame; the worker drops it.
        self.lpd_block();
        out.timeline_max += 1;
        let fence = self.timeline.create_fence(out.timeline_max);
        *self.pending.lock().unwrap() += 1;
        if let Err(mpsc::SendError(item)) = tx.send(WorkItem::Commit(snapshot)) {
            if let WorkItem::Commit(mut lost) = item {
                self.release_staged(&mut lost.windows);
            }
            *self.pending.lock().unwrap() -= 1;
            self.pending_cond.notify_all();
            self.lpd_unblock();
            // Keep the timeline aligned with the fences already handed out.
            self.timeline.advance();
            return Err(SubmitError::Exhausted);
        }
        debug!(seq, enabled = enabled_count, bandwidth, "frame queued");
        Ok(fence)
    }

    /// Validates and lowers one window. Request problems disable the window
    /// and the frame goes on; buffer problems reject the whole frame with
    /// everything staged so far already unwound by the caller.
    fn stage_one(
        &self,
        win_idx: usize,
        cfg: &WindowConfig,
        block: Option<Rect>,
    ) -> Result<StagedWindow, StageError> {
        let mut staged = StagedWindow {
            // The fetch-burst length has no shadow register, so even a
            // disabled slot carries it.
            regs: WindowRegs {
                flags: WinFlags::BURST_16,
                ..Default::default()
            },
            config: cfg.clone(),
            bindings: Default::default(),
        };

        match cfg.state {
            WindowState::Disabled | WindowState::UpdateRegion => {}
            WindowState::Color => match registers::check_request(win_idx, cfg) {
                Ok((_, blending)) => {
                    staged.regs = registers::stage_color(win_idx, cfg, blending);
                }
                Err(reason) => {
                    warn!(win = win_idx, ?reason, "color window disabled");
                }
            },
            WindowState::Buffer => {
                let (format, blending) = match registers::check_request(win_idx, cfg) {
                    Ok(v) => v,
                    Err(reason) => {
                        warn!(win = win_idx, ?reason, "window disabled");
                        return Ok(staged);
                    }
                };
                registers::precheck_buffer(win_idx, cfg, format)?;

                let mut addrs = [0u64; crate::window::MAX_PLANES];
                let mut plane0_len = 0;
                for plane in 0..format.plane_count() {
                    match DmaBufferBinding::bind(self.allocator.as_ref(), cfg.planes[plane]) {
                        Ok(binding) => {
                            addrs[plane] = binding.device_addr();
                            if plane == 0 {
                                plane0_len = binding.len();
                            }
                            staged.bindings[plane] = binding;
                        }
                        Err(source) => {
                            self.release_staged(std::slice::from_mut(&mut staged));
                            return Err(StageError::Bind {
                                win: win_idx,
                                plane,
                                source,
                            });
                        }
                    }
                }

                match registers::stage_buffer(win_idx, cfg, format, blending, addrs, plane0_len) {
                    Ok(mut regs) => {
                        regs.block = block;
                        if let Some(fence) = cfg.fence.clone() {
                            staged.bindings[0].attach_fence(fence);
                        }
                        staged.regs = regs;
                    }
                    Err(e) => {
                        self.release_staged(std::slice::from_mut(&mut staged));
                        return Err(e);
                    }
                }
            }
        }
        Ok(staged)
    }

    fn release_staged(&self, staged: &mut [StagedWindow]) {
        let fence_timeout = Duration::from_millis(self.config.timeouts.fence_ms);
        for s in staged.iter_mut() {
            for binding in s.bindings.iter_mut() {
                binding.release(self.allocator.as_ref(), fence_timeout);
            }
        }
    }

    pub(crate) fn wait_vsync(&self, timeout: Option<Duration>) -> Result<(), WaitVsyncError> {
        if self.ignore_vsync.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Hardware-triggered self-refresh panels deliver vsync as part of
        // the trigger path; only the other modes need the interrupt armed
        // for the wait.
        let track = self.config.pipeline.trig_mode == TrigMode::Sw
            || self.config.pipeline.psr_mode == PsrMode::Video;
        if track {
            self.activate_vsync();
        }

        let result = {
            let count = self.vsync_count.lock().unwrap();
            let target = *count + 1;
            let waiting = |c: &mut u64| *c < target && !self.ignore_vsync.load(Ordering::SeqCst);
            match timeout {
                Some(t) => {
                    let (count, _) = self
                        .vsync_cond
                        .wait_timeout_while(count, t, waiting)
                        .unwrap();
                    if *count >= target || self.ignore_vsync.load(Ordering::SeqCst) {
                        Ok(())
                    } else {
                        Err(WaitVsyncError::Timeout)
                    }
                }
                None => {
                    let _count = self.vsync_cond.wait_while(count, waiting).unwrap();
                    Ok(())
                }
            }
        };

        if track {
            self.deactivate_vsync();
        }
        result
    }

    pub(crate) fn handle_vsync(&self) {
        let mut count = self.vsync_count.lock().unwrap();
        *count += 1;
        self.vsync_cond.notify_all();
    }

    fn activate_vsync(&self) {
        let mut refs = self.vsync_refs.lock().unwrap();
        *refs += 1;
        if *refs == 1 {
            self.hw.set_vsync_interrupt(true);
            self.events.record(DisplayEvent::VsyncInterrupt { on: true });
        }
    }

    fn deactivate_vsync(&self) {
        let mut refs = self.vsync_refs.lock().unwrap();
        debug_assert!(*refs > 0, "unbalanced vsync deactivate");
        *refs -= 1;
        if *refs == 0 {
            self.hw.set_vsync_interrupt(false);
            self.events.record(DisplayEvent::VsyncInterrupt { on: false });
        }
    }

    pub(crate) fn flush(&self) {
        let pending = self.pending.lock().unwrap();
        let _pending = self
            .pending_cond
            .wait_while(pending, |p| *p > 0)
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AllocHandle, RawBufferId};
    use crate::config::PanelConfig;
    use crate::format::{BlendMode, PixelFormat};
    use std::sync::atomic::AtomicU32;
    use std::thread;

    #[derive(Default)]
    struct MockHw {
        writes: Mutex<Vec<(usize, WindowRegs)>>,
        clears: Mutex<Vec<usize>>,
    }

    impl DisplayHw for MockHw {
        fn init(&self, _panel: &PanelConfig) -> anyhow::Result<()> {
            Ok(())
        }
        fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn stop(&self, _reset: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn set_interrupts(&self, _on: bool) {}
        fn set_vsync_interrupt(&self, _on: bool) {}
        fn set_recovery_interrupts(&self, _on: bool) {}
        fn clear_interrupt_pending(&self) {}
        fn shadow_protect(&self, _win: usize, _protect: bool) {}
        fn write_window(&self, win: usize, regs: &WindowRegs) {
            self.writes.lock().unwrap().push((win, regs.clone()));
        }
        fn clear_window(&self, win: usize) {
            self.clears.lock().unwrap().push(win);
        }
        fn set_block_area(&self, _win: usize, _area: Option<Rect>) {}
        fn set_trigger(&self, _unmasked: bool) {}
        fn per_frame_off(&self) {}
        fn kick_update(&self) {}
        fn wait_shadow_update(&self, _timeout: Duration) -> bool {
            true
        }
        fn wait_linecnt_zero(&self, _timeout: Duration) -> bool {
            true
        }
        fn scanout_idle(&self) -> bool {
            false
        }
        fn scanout_size(&self) -> (u32, u32) {
            (0, 0)
        }
        fn set_content_protection(&self, _on: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn dump(&self) -> String {
            "mock".into()
        }
    }

    #[derive(Default)]
    struct MockTransport {
        partial_cmds: Mutex<Vec<Rect>>,
    }

    impl OutputTransport for MockTransport {
        fn set_stream(&self, _on: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn set_porch(&self, _area: &Rect) -> anyhow::Result<()> {
            Ok(())
        }
        fn partial_area_command(&self, area: &Rect) -> anyhow::Result<()> {
            self.partial_cmds.lock().unwrap().push(*area);
            Ok(())
        }
        fn enter_low_power_link(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn exit_low_power_link(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn link_size(&self) -> (u32, u32) {
            (720, 1280)
        }
    }

    struct MockAllocator {
        len: u64,
        imports: AtomicU32,
        releases: AtomicU32,
    }

    impl MockAllocator {
        fn with_len(len: u64) -> Self {
            Self {
                len,
                imports: AtomicU32::new(0),
                releases: AtomicU32::new(0),
            }
        }
    }

    impl Allocator for MockAllocator {
        fn import(&self, raw: RawBufferId) -> anyhow::Result<AllocHandle> {
            self.imports.fetch_add(1, Ordering::SeqCst);
            Ok(AllocHandle(raw.0 + 1))
        }
        fn map(&self, _handle: AllocHandle) -> anyhow::Result<u64> {
            Ok(self.len)
        }
        fn map_for_device(&self, handle: AllocHandle) -> anyhow::Result<u64> {
            Ok(0x4000_0000 + handle.0 * 0x10_0000)
        }
        fn unmap_for_device(&self, _handle: AllocHandle) {}
        fn unmap(&self, _handle: AllocHandle) {}
        fn release(&self, _handle: AllocHandle) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockQos(Mutex<Vec<u64>>);

    impl QosController for MockQos {
        fn request_bandwidth(&self, bytes_per_second: u64) {
            self.0.lock().unwrap().push(bytes_per_second);
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config::default();
        // Short waits; the mock hardware never delivers a real vsync.
        cfg.timeouts.fence_ms = 10;
        cfg.timeouts.vsync_ms = 5;
        cfg.timeouts.shadow_update_ms = 5;
        cfg.timeouts.linecnt_ms = 5;
        cfg.timeouts.size_mismatch_ms = 5;
        cfg.timeouts.recovery_settle_ms = 1;
        cfg
    }

    struct Rig {
        pipeline: Pipeline,
        hw: Arc<MockHw>,
        transport: Arc<MockTransport>,
        allocator: Arc<MockAllocator>,
        qos: Arc<MockQos>,
    }

    fn rig_with(config: Config, buffer_len: u64) -> Rig {
        // RUST_LOG=strata=debug makes a failing run readable.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let hw = Arc::new(MockHw::default());
        let transport = Arc::new(MockTransport::default());
        let allocator = Arc::new(MockAllocator::with_len(buffer_len));
        let qos = Arc::new(MockQos::default());
        let pipeline = Pipeline::new(
            config,
            hw.clone(),
            transport.clone(),
            allocator.clone(),
            qos.clone(),
        )
        .unwrap();
        Rig {
            pipeline,
            hw,
            transport,
            allocator,
            qos,
        }
    }

    fn rig() -> Rig {
        rig_with(test_config(), 16 << 20)
    }

    fn buffer_window(x: i32, y: i32, w: u32, h: u32) -> WindowConfig {
        WindowConfig {
            state: WindowState::Buffer,
            dst: Rect::new(x, y, w, h),
            src: Rect::new(0, 0, w, h),
            frame_width: w,
            frame_height: h,
            format: PixelFormat::Argb8888.as_raw(),
            blending: BlendMode::None.as_raw(),
            plane_alpha: 255,
            planes: [RawBufferId(1), RawBufferId(0), RawBufferId(0)],
            ..Default::default()
        }
    }

    #[test]
    fn frame_commits_and_signals_its_fence() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        assert_eq!(rig.pipeline.device_state(), DeviceState::On);

        let fence = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap();
        assert!(fence.wait(Duration::from_secs(2)));
        rig.pipeline.flush();

        let writes = rig.hw.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0);
        assert!(writes[0].1.flags.contains(WinFlags::ENABLE));
        assert_eq!(rig.pipeline.timeline_value(), 1);
        assert!(rig
            .pipeline
            .events()
            .iter()
            .any(|e| matches!(e.event, DisplayEvent::Commit { seq: 1, windows: 1 })));
    }

    #[test]
    fn bandwidth_raise_lands_before_the_commit() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        rig.pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap();
        rig.pipeline.flush();
        let requests = rig.qos.0.lock().unwrap();
        assert_eq!(*requests, vec![720 * 1280 * 4 * 60]);
    }

    #[test]
    fn short_circuit_when_display_is_off() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        rig.pipeline.disable().unwrap();
        assert_eq!(rig.pipeline.device_state(), DeviceState::Off);

        let fence = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap();
        // Signaled without any commit.
        assert!(fence.is_signaled());
        assert_eq!(rig.allocator.imports.load(Ordering::SeqCst), 0);
        assert!(rig.hw.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn fatal_staging_error_unwinds_every_binding() {
        // Buffers too small for the window footprint.
        let rig = rig_with(test_config(), 4096);
        rig.pipeline.enable().unwrap();
        let err = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Invalid(StageError::BufferTooSmall { .. })
        ));
        assert_eq!(
            rig.allocator.imports.load(Ordering::SeqCst),
            rig.allocator.releases.load(Ordering::SeqCst)
        );
        assert_eq!(rig.pipeline.timeline_value(), 0);
    }

    #[test]
    fn bad_request_disables_only_that_window() {
        let rig = rig();
        rig.pipeline.enable().unwrap();

        let mut bad = buffer_window(0, 0, 720, 640);
        bad.format = 9999;
        let fence = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280), bad])
            .unwrap();
        assert!(fence.wait(Duration::from_secs(2)));
        rig.pipeline.flush();

        let writes = rig.hw.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert!(rig.hw.clears.lock().unwrap().contains(&1));
    }

    #[test]
    fn update_region_reprograms_panel_and_clips_windows() {
        let rig = rig();
        rig.pipeline.enable().unwrap();

        let region = WindowConfig {
            state: WindowState::UpdateRegion,
            dst: Rect::new(0, 256, 720, 256),
            ..Default::default()
        };
        rig.pipeline
            .submit(&[buffer_window(0, 0, 720, 1280), region])
            .unwrap();
        rig.pipeline.flush();

        assert_eq!(
            *rig.transport.partial_cmds.lock().unwrap(),
            vec![Rect::new(0, 256, 720, 256)]
        );
        let writes = rig.hw.writes.lock().unwrap();
        assert_eq!(writes[0].1.dst, Rect::new(0, 0, 720, 256));
        assert!(rig
            .pipeline
            .events()
            .iter()
            .any(|e| matches!(e.event, DisplayEvent::PartialUpdate(_))));
    }

    #[test]
    fn fences_signal_in_submission_order() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        let first = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap();
        let second = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 640)])
            .unwrap();
        assert!(second.wait(Duration::from_secs(2)));
        assert!(first.is_signaled());
        assert_eq!(rig.pipeline.timeline_value(), 2);
    }

    #[test]
    fn panel_fault_releases_vsync_waiters() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        rig.pipeline.handle_panel_fault();
        // No vsync ever arrives, yet the wait returns at once.
        assert!(rig.pipeline.wait_vsync(Some(Duration::from_secs(5))).is_ok());
        // Submissions short-circuit until recovery.
        let fence = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn vsync_wait_wakes_on_interrupt() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        let core = Arc::clone(&rig.pipeline.core);
        let waiter = thread::spawn(move || core.wait_vsync(Some(Duration::from_secs(2))));
        thread::sleep(Duration::from_millis(20));
        rig.pipeline.handle_vsync();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn commit_survives_vsync_timeout() {
        let rig = rig();
        rig.pipeline.enable().unwrap();
        let fence = rig
            .pipeline
            .submit(&[buffer_window(0, 0, 720, 1280)])
            .unwrap();
        // The mock never delivers vsync; the frame must still complete.
        assert!(fence.wait(Duration::from_secs(2)));
        assert!(rig
            .pipeline
            .events()
            .iter()
            .any(|e| e.event == DisplayEvent::VsyncTimeout));
    }
}
