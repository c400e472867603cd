//! Staged per-window register state and the request validator.
//!
//! Nothing here touches hardware. A submission is validated and lowered into
//! a `RegisterSnapshot`; the commit worker later writes the snapshot into the
//! shadow registers in one protected bracket.

use bitflags::bitflags;
use thiserror::Error;
use tracing::warn;

use crate::buffer::{BindError, DmaBufferBinding};
use crate::format::{BlendMode, ByteOrder, PixelFormat};
use crate::geometry::{is_x_aligned, Rect};
use crate::window::{WindowConfig, WindowState, MAX_PLANES};

/// Smallest overlap worth programming as a skipped fetch region.
pub const MIN_BLOCK_WIDTH: u32 = 2;
pub const MIN_BLOCK_HEIGHT: u32 = 2;

bitflags! {
    /// Per-window control bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WinFlags: u32 {
        const ENABLE       = 1 << 0;
        /// Blend using the pixel's own alpha channel.
        const BLEND_PIXEL  = 1 << 1;
        const ALPHA_SEL    = 1 << 2;
        /// Multiply pixel alpha by the constant plane alpha.
        const ALPHA_MUL    = 1 << 3;
        /// Chroma interpolation for semi-planar YUV.
        const INTERPOLATE  = 1 << 4;
        /// 16-word fetch bursts. The burst field has no shadow register, so
        /// it is set on every window every frame.
        const BURST_16     = 1 << 5;
    }
}

/// Fetch-engine pixel interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BppMode {
    #[default]
    None,
    Argb8888,
    Xrgb8888,
    Rgb565,
    Nv12,
    Nv21,
}

/// Blend-equation coefficient selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendCoef {
    Zero,
    One,
    /// The pixel's alpha.
    AlphaA,
    OneMinusAlphaA,
    /// The window's constant alpha register.
    Alpha0,
}

/// Source/destination blend coefficients for a window against the stack
/// below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEq {
    pub src: BlendCoef,
    pub dst: BlendCoef,
}

/// Everything the worker writes for one window.
#[derive(Debug, Clone, Default)]
pub struct WindowRegs {
    pub flags: WinFlags,
    pub bpp_mode: BppMode,
    pub byte_order: ByteOrder,
    /// Placement on the panel (top-left plus extent; hardware takes an
    /// inclusive bottom-right, derived at write time).
    pub dst: Rect,
    /// Constant alpha pair.
    pub alpha0: u8,
    pub alpha1: u8,
    /// Solid fill value; `Some` marks a color-map window.
    pub color_map: Option<u32>,
    /// Blend equation against the windows below. Never set on window 0.
    pub blend: Option<BlendEq>,
    pub buf_addrs: [u64; MAX_PLANES],
    /// Whole-buffer dimensions (stride in pixels, scanline count).
    pub whole_w: u32,
    pub whole_h: u32,
    /// Fetch origin inside the buffer.
    pub offset_x: u32,
    pub offset_y: u32,
    pub protected: bool,
    pub channel: u32,
    /// Sub-rectangle (window-relative) the fetch engine may skip.
    pub block: Option<Rect>,
}

/// Why a window was dropped from a frame instead of failing the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableReason {
    EmptyDestination,
    NegativePosition,
    UnknownFormat(u32),
    UnknownBlending(u32),
    BlendOnBaseWindow,
    NeedsScaling,
    CoveredByOpaqueWindow,
    OutsideUpdateRegion,
}

/// Validation failures that reject the whole submission.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("window {win}: width {width}px at {bpp}bpp is under the 128-byte burst minimum")]
    BurstWidth { win: usize, width: u32, bpp: u32 },
    #[error("window {win}: buffer stride {stride}px narrower than destination width {width}px")]
    Stride { win: usize, stride: u32, width: u32 },
    #[error("window {win}: x placement violates {bpp}bpp DMA alignment")]
    Alignment { win: usize, bpp: u32 },
    #[error("window {win}: buffer holds {len} bytes, window needs {needed}")]
    BufferTooSmall { win: usize, len: u64, needed: u64 },
    #[error("window {win}: plane {plane} bind failed")]
    Bind {
        win: usize,
        plane: usize,
        #[source]
        source: BindError,
    },
}

/// Non-fatal request checks, in order. A failure disables the window for
/// this frame and is reported to the caller for logging.
pub fn check_request(
    win_idx: usize,
    cfg: &WindowConfig,
) -> Result<(PixelFormat, BlendMode), DisableReason> {
    if cfg.dst.w == 0 || cfg.dst.h == 0 {
        return Err(DisableReason::EmptyDestination);
    }
    if cfg.dst.x < 0 || cfg.dst.y < 0 {
        return Err(DisableReason::NegativePosition);
    }
    let format = PixelFormat::from_raw(cfg.format)
        .map_err(|e| DisableReason::UnknownFormat(e.0))?;
    let blending =
        BlendMode::from_raw(cfg.blending).ok_or(DisableReason::UnknownBlending(cfg.blending))?;
    if win_idx == 0 && blending != BlendMode::None {
        return Err(DisableReason::BlendOnBaseWindow);
    }
    if cfg.state == WindowState::Buffer
        && (cfg.src.w != cfg.dst.w || cfg.src.h != cfg.dst.h)
    {
        return Err(DisableReason::NeedsScaling);
    }
    Ok((format, blending))
}

/// Fatal checks that must pass before any buffer is imported.
pub fn precheck_buffer(
    win_idx: usize,
    cfg: &WindowConfig,
    format: PixelFormat,
) -> Result<(), StageError> {
    let bpp = format.bits_per_pixel();
    // Widened: the width is client-controlled and must not wrap.
    if cfg.dst.w as u64 * bpp as u64 / 8 < 128 {
        return Err(StageError::BurstWidth {
            win: win_idx,
            width: cfg.dst.w,
            bpp,
        });
    }
    if cfg.frame_width < cfg.dst.w {
        return Err(StageError::Stride {
            win: win_idx,
            stride: cfg.frame_width,
            width: cfg.dst.w,
        });
    }
    if !format.is_yuv() && !is_x_aligned(cfg.dst.x, cfg.dst.w, bpp) {
        return Err(StageError::Alignment { win: win_idx, bpp });
    }
    Ok(())
}

/// Lowers a solid-color window.
pub fn stage_color(win_idx: usize, cfg: &WindowConfig, blending: BlendMode) -> WindowRegs {
    let mut regs = WindowRegs {
        flags: WinFlags::ENABLE | WinFlags::BURST_16,
        dst: cfg.dst,
        color_map: Some(cfg.color),
        channel: cfg.channel,
        ..Default::default()
    };
    let mut blending = blending;
    apply_alpha_blending(win_idx, &mut regs, cfg.plane_alpha, 0, &mut blending);
    regs
}

/// Lowers a buffer window once its planes are mapped. `plane0_len` is the
/// mapped length of the first plane, checked against the window footprint
/// for packed RGB.
pub fn stage_buffer(
    win_idx: usize,
    cfg: &WindowConfig,
    format: PixelFormat,
    blending: BlendMode,
    device_addrs: [u64; MAX_PLANES],
    plane0_len: u64,
) -> Result<WindowRegs, StageError> {
    let bpp = format.bits_per_pixel();
    if !format.is_yuv() {
        let needed = cfg.dst.w as u64 * cfg.dst.h as u64 * bpp as u64 / 8;
        if needed > plane0_len {
            return Err(StageError::BufferTooSmall {
                win: win_idx,
                len: plane0_len,
                needed,
            });
        }
    }

    let mut buf_addrs = device_addrs;
    if format.needs_plane_offset() {
        // Contiguous semi-planar: chroma follows the luma plane directly.
        buf_addrs[1] = buf_addrs[0] + cfg.frame_width as u64 * cfg.frame_height as u64;
    }

    let transp_len = format.layout().alpha_len;
    let mut flags = wincon(bpp, transp_len, format) | WinFlags::ENABLE | WinFlags::BURST_16;

    let bpp_mode = match format {
        PixelFormat::Nv12 | PixelFormat::Nv12m => BppMode::Nv12,
        PixelFormat::Nv21 | PixelFormat::Nv21m | PixelFormat::Nv21mFull => BppMode::Nv21,
        PixelFormat::Rgb565 | PixelFormat::Rgba5551 => BppMode::Rgb565,
        _ if transp_len > 0 => BppMode::Argb8888,
        _ => BppMode::Xrgb8888,
    };
    if format.is_yuv() {
        flags |= WinFlags::INTERPOLATE;
    }

    let mut regs = WindowRegs {
        flags,
        bpp_mode,
        byte_order: format.byte_order(),
        dst: cfg.dst,
        buf_addrs,
        whole_w: cfg.frame_width,
        whole_h: cfg.frame_height,
        offset_x: cfg.src.x.max(0) as u32,
        offset_y: cfg.src.y.max(0) as u32,
        protected: cfg.protected,
        channel: cfg.channel,
        ..Default::default()
    };

    let mut blending = blending;
    apply_alpha_blending(win_idx, &mut regs, cfg.plane_alpha, transp_len, &mut blending);
    Ok(regs)
}

/// Control bits derived from the pixel depth and alpha width.
fn wincon(bits_per_pixel: u32, transp_length: u32, format: PixelFormat) -> WinFlags {
    let mut flags = WinFlags::empty();
    match bits_per_pixel {
        12 => {}
        16 => {}
        24 | 32 => {
            if transp_length > 0 {
                flags |= WinFlags::BLEND_PIXEL;
            }
        }
        other => {
            warn!(bpp = other, format = ?format, "unsupported pixel depth");
        }
    }
    if transp_length != 1 {
        flags |= WinFlags::ALPHA_SEL;
    }
    flags
}

/// Blend-equation lookup. A 1-bit alpha channel cannot carry premultiplied
/// color, so premultiplied falls back to coverage there.
pub fn blend_equation(blending: BlendMode, transp_length: u32, plane_alpha: u32) -> BlendEq {
    let is_plane_alpha = plane_alpha > 0 && plane_alpha < 255;
    let blending = if transp_length == 1 && blending == BlendMode::Premultiplied {
        BlendMode::Coverage
    } else {
        blending
    };
    match blending {
        BlendMode::None => BlendEq {
            src: BlendCoef::One,
            dst: BlendCoef::Zero,
        },
        BlendMode::Premultiplied => BlendEq {
            src: if is_plane_alpha {
                BlendCoef::Alpha0
            } else {
                BlendCoef::One
            },
            dst: BlendCoef::OneMinusAlphaA,
        },
        BlendMode::Coverage => BlendEq {
            src: BlendCoef::AlphaA,
            dst: BlendCoef::OneMinusAlphaA,
        },
    }
}

/// Derives the constant-alpha pair and, for stacked windows, the blend
/// equation. May rewrite the effective blend mode when a constant alpha is
/// combined with an alpha-less format.
fn apply_alpha_blending(
    win_idx: usize,
    regs: &mut WindowRegs,
    plane_alpha: u32,
    transp_length: u32,
    blending: &mut BlendMode,
) {
    let is_plane_alpha = plane_alpha > 0 && plane_alpha < 255;
    let (alpha0, alpha1) = if is_plane_alpha {
        (plane_alpha as u8, 0)
    } else if transp_length == 1 && *blending == BlendMode::None {
        (0xff, 0xff)
    } else {
        (0, 0xff)
    };
    regs.alpha0 = alpha0;
    regs.alpha1 = alpha1;

    if win_idx > 0 {
        if is_plane_alpha {
            if transp_length > 0 {
                if *blending != BlendMode::None {
                    regs.flags |= WinFlags::ALPHA_MUL;
                }
            } else {
                regs.flags &= !WinFlags::ALPHA_SEL;
                if *blending == BlendMode::Premultiplied {
                    *blending = BlendMode::Coverage;
                }
            }
        }
        regs.blend = Some(blend_equation(*blending, transp_length, plane_alpha));
    }
}

/// True when a window's pixels can fully hide what is underneath. A window
/// whose format does not decode never qualifies; validation disables it.
fn is_opaque_cover(cfg: &WindowConfig) -> bool {
    let format = match PixelFormat::from_raw(cfg.format) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let translucent_format = matches!(
        format,
        PixelFormat::Argb8888
            | PixelFormat::Abgr8888
            | PixelFormat::Rgba8888
            | PixelFormat::Bgra8888
            | PixelFormat::Rgba5551
    );
    let is_plane_alpha = cfg.plane_alpha > 0 && cfg.plane_alpha < 255;
    !translucent_format && !is_plane_alpha
}

/// Overlap optimization: for each RGB32 buffer window, find the largest
/// opaque window stacked above it. Full coverage disables the lower window
/// outright; partial coverage yields a window-relative rectangle the fetch
/// engine skips. Returns one entry per window.
pub fn plan_blocking(configs: &mut [WindowConfig]) -> Vec<Option<Rect>> {
    let mut blocks = vec![None; configs.len()];
    for i in 0..configs.len() {
        if configs[i].state != WindowState::Buffer {
            continue;
        }
        // Only the RGB32 fetch path supports skipped regions.
        match PixelFormat::from_raw(configs[i].format) {
            Ok(f) if f.is_rgb32() => {}
            _ => continue,
        }
        let lower = configs[i].dst.bounds();
        let mut best: Option<Rect> = None;
        let mut best_size = 0u32;
        let mut covered = false;
        for j in (i + 1)..configs.len() {
            let upper = &configs[j];
            if upper.state != WindowState::Buffer || !is_opaque_cover(upper) {
                continue;
            }
            let ub = upper.dst.bounds();
            if !lower.intersects(&ub) {
                continue;
            }
            let overlap = lower.intersection(&ub);
            if overlap == lower {
                covered = true;
                break;
            }
            if overlap.width() < MIN_BLOCK_WIDTH || overlap.height() < MIN_BLOCK_HEIGHT {
                continue;
            }
            let size = (overlap.width() - 1) * (overlap.height() - 1);
            if size > best_size {
                best_size = size;
                best = Some(Rect {
                    x: overlap.left - configs[i].dst.x,
                    y: overlap.top - configs[i].dst.y,
                    w: overlap.width(),
                    h: overlap.height(),
                });
            }
        }
        if covered {
            configs[i].state = WindowState::Disabled;
            warn!(win = i, "window fully covered by an opaque window, disabled");
        } else {
            blocks[i] = best;
        }
    }
    blocks
}

/// Two enabled fetch windows must never share a DMA channel. The later
/// window loses; the frame still commits.
pub fn validate_channel_map(windows: &mut [WindowRegs]) {
    let mut bitmap: u64 = 0;
    for (i, regs) in windows.iter_mut().enumerate() {
        if !regs.flags.contains(WinFlags::ENABLE) || regs.color_map.is_some() {
            continue;
        }
        let bit = 1u64 << (regs.channel as u64 & 63);
        if bitmap & bit != 0 {
            warn!(
                win = i,
                channel = regs.channel,
                "channel mapped to multiple windows, disabling"
            );
            regs.flags &= !WinFlags::ENABLE;
            continue;
        }
        bitmap |= bit;
    }
}

/// One window's slice of a snapshot: registers plus everything kept alive
/// until the frame retires.
pub struct StagedWindow {
    pub regs: WindowRegs,
    pub config: WindowConfig,
    pub bindings: [DmaBufferBinding; MAX_PLANES],
}

/// A fully validated frame, immutable once enqueued, consumed exactly once
/// by the commit worker.
pub struct RegisterSnapshot {
    pub seq: u64,
    pub windows: Vec<StagedWindow>,
    pub bandwidth: u64,
    pub update_rect: Rect,
    pub need_update: bool,
    /// Buffer windows enabled in this frame.
    pub enabled_count: usize,
    /// Any window asked for content protection.
    pub protected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::RawBufferId;

    fn buffer_config(fmt: PixelFormat, dst: Rect) -> WindowConfig {
        WindowConfig {
            state: WindowState::Buffer,
            dst,
            src: Rect::new(0, 0, dst.w, dst.h),
            frame_width: dst.w,
            frame_height: dst.h,
            format: fmt.as_raw(),
            blending: BlendMode::None.as_raw(),
            plane_alpha: 255,
            planes: [RawBufferId(1); MAX_PLANES],
            ..Default::default()
        }
    }

    #[test]
    fn request_checks_disable_in_order() {
        let mut cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 0, 10));
        assert_eq!(
            check_request(1, &cfg),
            Err(DisableReason::EmptyDestination)
        );
        cfg.dst = Rect::new(-1, 0, 10, 10);
        assert_eq!(
            check_request(1, &cfg),
            Err(DisableReason::NegativePosition)
        );
        cfg.dst = Rect::new(0, 0, 10, 10);
        cfg.src = Rect::new(0, 0, 10, 10);
        cfg.format = 99;
        assert_eq!(check_request(1, &cfg), Err(DisableReason::UnknownFormat(99)));
        cfg.format = PixelFormat::Argb8888.as_raw();
        cfg.blending = 7;
        assert_eq!(
            check_request(1, &cfg),
            Err(DisableReason::UnknownBlending(7))
        );
        cfg.blending = BlendMode::Coverage.as_raw();
        assert_eq!(check_request(0, &cfg), Err(DisableReason::BlendOnBaseWindow));
        cfg.blending = BlendMode::None.as_raw();
        cfg.src.w = 5;
        assert_eq!(check_request(1, &cfg), Err(DisableReason::NeedsScaling));
    }

    #[test]
    fn burst_minimum_rejects_narrow_windows() {
        // 63px at 16bpp is 126 bytes per burst line.
        let cfg = buffer_config(PixelFormat::Rgb565, Rect::new(0, 0, 63, 64));
        let err = precheck_buffer(1, &cfg, PixelFormat::Rgb565).unwrap_err();
        assert!(matches!(err, StageError::BurstWidth { width: 63, .. }));
        // 64px at 16bpp is exactly 128 bytes.
        let cfg = buffer_config(PixelFormat::Rgb565, Rect::new(0, 0, 64, 64));
        precheck_buffer(1, &cfg, PixelFormat::Rgb565).unwrap();
    }

    #[test]
    fn huge_width_does_not_wrap_the_burst_check() {
        // 2^27 px at 32bpp overflows a 32-bit byte count.
        let mut cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 1 << 27, 1));
        cfg.frame_width = u32::MAX;
        assert!(precheck_buffer(1, &cfg, PixelFormat::Argb8888).is_ok());
        cfg.frame_width = 16;
        assert!(matches!(
            precheck_buffer(1, &cfg, PixelFormat::Argb8888).unwrap_err(),
            StageError::Stride { .. }
        ));
    }

    #[test]
    fn stride_and_alignment_are_fatal() {
        let mut cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 100, 100));
        cfg.frame_width = 50;
        assert!(matches!(
            precheck_buffer(1, &cfg, PixelFormat::Argb8888).unwrap_err(),
            StageError::Stride { stride: 50, width: 100, .. }
        ));
        let cfg = buffer_config(PixelFormat::Rgb565, Rect::new(3, 0, 64, 64));
        assert!(matches!(
            precheck_buffer(1, &cfg, PixelFormat::Rgb565).unwrap_err(),
            StageError::Alignment { bpp: 16, .. }
        ));
    }

    #[test]
    fn buffer_too_small_is_fatal() {
        let cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 100, 100));
        let err = stage_buffer(
            1,
            &cfg,
            PixelFormat::Argb8888,
            BlendMode::None,
            [0x1000, 0, 0],
            100, // needs 40000
        )
        .unwrap_err();
        assert!(matches!(err, StageError::BufferTooSmall { needed: 40000, .. }));
    }

    #[test]
    fn blend_equation_table() {
        use BlendCoef::*;
        let eq = blend_equation(BlendMode::None, 8, 255);
        assert_eq!(eq, BlendEq { src: One, dst: Zero });
        let eq = blend_equation(BlendMode::Premultiplied, 8, 255);
        assert_eq!(eq, BlendEq { src: One, dst: OneMinusAlphaA });
        // Constant plane alpha switches the source coefficient.
        let eq = blend_equation(BlendMode::Premultiplied, 8, 128);
        assert_eq!(eq, BlendEq { src: Alpha0, dst: OneMinusAlphaA });
        let eq = blend_equation(BlendMode::Coverage, 8, 255);
        assert_eq!(eq, BlendEq { src: AlphaA, dst: OneMinusAlphaA });
        // 1-bit alpha cannot be premultiplied.
        let eq = blend_equation(BlendMode::Premultiplied, 1, 255);
        assert_eq!(eq, BlendEq { src: AlphaA, dst: OneMinusAlphaA });
    }

    #[test]
    fn alpha_constants_follow_plane_alpha() {
        let mut cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 100, 100));
        cfg.plane_alpha = 128;
        cfg.blending = BlendMode::Premultiplied.as_raw();
        let regs = stage_buffer(
            1,
            &cfg,
            PixelFormat::Argb8888,
            BlendMode::Premultiplied,
            [0x1000, 0, 0],
            1 << 20,
        )
        .unwrap();
        assert_eq!((regs.alpha0, regs.alpha1), (128, 0));
        assert!(regs.flags.contains(WinFlags::ALPHA_MUL));
        // Opaque 1-bit format with no blending pins both constants high.
        let mut cfg = buffer_config(PixelFormat::Rgba5551, Rect::new(0, 0, 64, 64));
        cfg.plane_alpha = 255;
        let regs = stage_buffer(
            1,
            &cfg,
            PixelFormat::Rgba5551,
            BlendMode::None,
            [0x1000, 0, 0],
            1 << 20,
        )
        .unwrap();
        assert_eq!((regs.alpha0, regs.alpha1), (0xff, 0xff));
    }

    #[test]
    fn color_window_with_plane_alpha_blends_as_coverage() {
        let cfg = WindowConfig {
            state: WindowState::Color,
            dst: Rect::new(0, 0, 100, 100),
            color: 0x00ff00,
            blending: BlendMode::Premultiplied.as_raw(),
            plane_alpha: 128,
            ..Default::default()
        };
        let regs = stage_color(1, &cfg, BlendMode::Premultiplied);
        assert!(regs.flags.contains(WinFlags::ENABLE));
        assert_eq!(regs.color_map, Some(0x00ff00));
        // A fill has no alpha channel, so the constant alpha drives a
        // coverage blend.
        assert_eq!((regs.alpha0, regs.alpha1), (128, 0));
        assert!(!regs.flags.contains(WinFlags::ALPHA_SEL));
        assert_eq!(
            regs.blend,
            Some(BlendEq {
                src: BlendCoef::AlphaA,
                dst: BlendCoef::OneMinusAlphaA
            })
        );
    }

    #[test]
    fn plane_alpha_on_alphaless_format_becomes_coverage() {
        let mut cfg = buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 100, 100));
        cfg.plane_alpha = 100;
        let regs = stage_buffer(
            1,
            &cfg,
            PixelFormat::Xrgb8888,
            BlendMode::Premultiplied,
            [0x1000, 0, 0],
            1 << 20,
        )
        .unwrap();
        assert!(!regs.flags.contains(WinFlags::ALPHA_SEL));
        assert_eq!(
            regs.blend,
            Some(BlendEq {
                src: BlendCoef::AlphaA,
                dst: BlendCoef::OneMinusAlphaA
            })
        );
    }

    #[test]
    fn window_zero_never_gets_a_blend_equation() {
        let cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 100, 100));
        let regs = stage_buffer(
            0,
            &cfg,
            PixelFormat::Argb8888,
            BlendMode::None,
            [0x1000, 0, 0],
            1 << 20,
        )
        .unwrap();
        assert_eq!(regs.blend, None);
    }

    #[test]
    fn wincon_flags_per_format() {
        let cfg = buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 100, 100));
        let regs = stage_buffer(
            1, &cfg, PixelFormat::Argb8888, BlendMode::None, [1, 0, 0], 1 << 20,
        )
        .unwrap();
        assert!(regs.flags.contains(WinFlags::BLEND_PIXEL));
        assert!(regs.flags.contains(WinFlags::ALPHA_SEL));
        assert!(regs.flags.contains(WinFlags::BURST_16));
        assert_eq!(regs.bpp_mode, BppMode::Argb8888);

        let cfg = buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 100, 100));
        let regs = stage_buffer(
            1, &cfg, PixelFormat::Xrgb8888, BlendMode::None, [1, 0, 0], 1 << 20,
        )
        .unwrap();
        assert!(!regs.flags.contains(WinFlags::BLEND_PIXEL));
        assert_eq!(regs.bpp_mode, BppMode::Xrgb8888);

        let cfg = buffer_config(PixelFormat::Nv12, Rect::new(0, 0, 256, 128));
        let regs = stage_buffer(
            1, &cfg, PixelFormat::Nv12, BlendMode::None, [0x1000, 0, 0], 1 << 20,
        )
        .unwrap();
        assert!(regs.flags.contains(WinFlags::INTERPOLATE));
        assert_eq!(regs.bpp_mode, BppMode::Nv12);
        // Chroma derived from the luma plane.
        assert_eq!(regs.buf_addrs[1], 0x1000 + 256 * 128);
    }

    #[test]
    fn full_cover_disables_lower_window() {
        let mut configs = vec![
            buffer_config(PixelFormat::Xrgb8888, Rect::new(10, 10, 100, 100)),
            buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 200, 200)),
        ];
        let blocks = plan_blocking(&mut configs);
        assert_eq!(configs[0].state, WindowState::Disabled);
        assert_eq!(blocks[0], None);
    }

    #[test]
    fn partial_cover_yields_window_relative_block() {
        let mut configs = vec![
            buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 100, 100)),
            buffer_config(PixelFormat::Xrgb8888, Rect::new(50, 50, 100, 100)),
        ];
        let blocks = plan_blocking(&mut configs);
        assert_eq!(configs[0].state, WindowState::Buffer);
        assert_eq!(blocks[0], Some(Rect::new(50, 50, 50, 50)));
    }

    #[test]
    fn translucent_upper_window_does_not_block() {
        let mut configs = vec![
            buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 100, 100)),
            buffer_config(PixelFormat::Argb8888, Rect::new(0, 0, 200, 200)),
        ];
        let blocks = plan_blocking(&mut configs);
        assert_eq!(configs[0].state, WindowState::Buffer);
        assert_eq!(blocks[0], None);
        // Same for a constant plane alpha on an opaque format.
        let mut configs = vec![
            buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 100, 100)),
            buffer_config(PixelFormat::Xrgb8888, Rect::new(0, 0, 200, 200)),
        ];
        configs[1].plane_alpha = 128;
        let blocks = plan_blocking(&mut configs);
        assert_eq!(configs[0].state, WindowState::Buffer);
        assert_eq!(blocks[0], None);
    }

    #[test]
    fn duplicate_channel_disables_later_window() {
        let mut regs = vec![
            WindowRegs {
                flags: WinFlags::ENABLE,
                channel: 3,
                ..Default::default()
            },
            WindowRegs {
                flags: WinFlags::ENABLE,
                channel: 3,
                ..Default::default()
            },
        ];
        validate_channel_map(&mut regs);
        assert!(regs[0].flags.contains(WinFlags::ENABLE));
        assert!(!regs[1].flags.contains(WinFlags::ENABLE));
    }

    #[test]
    fn colormap_windows_do_not_claim_channels() {
        let mut regs = vec![
            WindowRegs {
                flags: WinFlags::ENABLE,
                color_map: Some(0xff0000),
                channel: 3,
                ..Default::default()
            },
            WindowRegs {
                flags: WinFlags::ENABLE,
                channel: 3,
                ..Default::default()
            },
        ];
        validate_channel_map(&mut regs);
        assert!(regs[1].flags.contains(WinFlags::ENABLE));
    }
}
