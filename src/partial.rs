//! Partial-screen update planning.
//!
//! A submission may carry a requested update region. The region is snapped to
//! the panel's 8-pixel column granularity, compared against the currently
//! active region, and every window in the frame is clipped into it. The
//! transport is only reconfigured when the active region actually changes.

use tracing::debug;

use crate::config::PanelConfig;
use crate::geometry::Rect;
use crate::window::{WindowConfig, WindowState};

/// Outcome of planning one frame's update region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Region the frame scans out into.
    pub rect: Rect,
    /// The transport and porch must be reprogrammed for this frame.
    pub need_update: bool,
}

pub fn full_screen(panel: &PanelConfig) -> Rect {
    Rect::new(0, 0, panel.xres, panel.yres)
}

/// Snaps a requested region to the panel's column granularity. Left edge and
/// width round out to 8-pixel multiples; a width overrunning the panel falls
/// back to full-width at column zero. Returns `None` when the request is
/// unusable (negative origin, or no active region to replace).
pub fn calibrate(req: Rect, stored: &Rect, xres: u32) -> Option<Rect> {
    if req.x < 0 || req.y < 0 {
        return None;
    }
    if stored.w == 0 || stored.h == 0 {
        return None;
    }
    let mut x = req.x;
    let mut w = req.w;
    if x & 7 != 0 {
        w += (x & 7) as u32;
        x &= !7;
    }
    w = (w + 7) & !7u32;
    if x as u32 + w > xres {
        w = xres;
        x = 0;
    }
    Some(Rect::new(x, req.y, w, req.h))
}

/// Plans the frame's update region and clips every window into it.
///
/// `stored` and `in_partial` are the persisted region state; they are
/// updated here and applied to hardware together with the frame so the
/// region can never change out from under a commit.
pub fn plan_window_update(
    configs: &mut [WindowConfig],
    update_req: Option<Rect>,
    stored: &mut Rect,
    in_partial: &mut bool,
    panel: &PanelConfig,
) -> UpdatePlan {
    let full = full_screen(panel);
    let calibrated = update_req.and_then(|r| calibrate(r, stored, panel.xres));

    let mut plan = UpdatePlan {
        rect: *stored,
        need_update: false,
    };

    match calibrated {
        Some(rect) if rect != *stored => {
            *stored = rect;
            *in_partial = true;
            plan.rect = rect;
            plan.need_update = true;
            debug!(?rect, "update region changed");
        }
        None if *in_partial => {
            // Back to full-screen scan-out.
            *stored = full;
            *in_partial = false;
            plan.rect = full;
            plan.need_update = true;
            debug!("update region restored to full screen");
            return plan;
        }
        Some(rect) => {
            // Same region as the previous frame; nothing to reprogram.
            plan.rect = rect;
        }
        None => return plan,
    }

    let region = plan.rect;
    if region == full {
        return plan;
    }
    for (i, cfg) in configs.iter_mut().enumerate() {
        if cfg.state == WindowState::Disabled {
            continue;
        }
        clip_to_region(cfg, &region, i);
    }
    plan
}

/// Clips one window into the update region, translating its destination to
/// region-relative coordinates and advancing the source origin to match.
/// Disables the window when it lies entirely outside the region.
fn clip_to_region(cfg: &mut WindowConfig, region: &Rect, win_idx: usize) {
    if !region.bounds().intersects(&cfg.dst.bounds()) {
        cfg.state = WindowState::Disabled;
        debug!(win = win_idx, "window outside update region, disabled");
        return;
    }
    let orig = cfg.dst;
    let (ux, uy) = (region.x, region.y);
    let (uw, uh) = (region.w as i32, region.h as i32);
    let (cx, cy) = (cfg.dst.x, cfg.dst.y);
    let (cw, ch) = (cfg.dst.w as i32, cfg.dst.h as i32);

    if ux > cx {
        cfg.dst.w = uw.min(cx + cw - ux) as u32;
    } else if ux + uw < cx + cw {
        cfg.dst.w = cw.min(uw + ux - cx) as u32;
    }
    if uy > cy {
        cfg.dst.h = uh.min(cy + ch - uy) as u32;
    } else if uy + uh < cy + ch {
        cfg.dst.h = ch.min(uh + uy - cy) as u32;
    }

    cfg.dst.x = (cx - ux).max(0);
    cfg.dst.y = (cy - uy).max(0);
    if uy > orig.y {
        cfg.src.y += uy - orig.y;
    }
    if ux > orig.x {
        cfg.src.x += ux - orig.x;
    }
    cfg.src.w = cfg.dst.w;
    cfg.src.h = cfg.dst.h;
}
