//! Pixel-format metadata: channel widths/offsets, plane counts and the
//! byte-order the fetch engine programs per window.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported pixel format code {0}")]
pub struct UnsupportedFormat(pub u32);

/// Pixel formats the fetch engine understands. The `*m` YUV variants carry
/// their chroma plane in a separate buffer; plain NV12/NV21 pack both planes
/// into one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Argb8888,
    Abgr8888,
    Rgba8888,
    Bgra8888,
    Xrgb8888,
    Xbgr8888,
    Rgbx8888,
    Bgrx8888,
    Rgba5551,
    Rgb565,
    Nv12,
    Nv21,
    Nv12m,
    Nv21m,
    Nv21mFull,
}

/// Bit widths and offsets of each color channel plus trailing padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelLayout {
    pub red_len: u32,
    pub red_off: u32,
    pub green_len: u32,
    pub green_off: u32,
    pub blue_len: u32,
    pub blue_off: u32,
    pub alpha_len: u32,
    pub alpha_off: u32,
    pub padding: u32,
}

/// In-memory byte order the window control register is programmed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    Argb8888,
    Abgr8888,
    Rgba8888,
    Bgra8888,
    Xrgb8888,
    Xbgr8888,
    Rgbx8888,
    Bgrx8888,
    Rgb565,
    /// YUV windows have no RGB reorder stage.
    #[default]
    None,
}

use PixelFormat::*;

impl PixelFormat {
    /// Decode the raw request code. Requests arrive from an untrusted client
    /// layer, so unknown codes are an expected input, not a bug.
    pub fn from_raw(code: u32) -> Result<Self, UnsupportedFormat> {
        Ok(match code {
            0 => Argb8888,
            1 => Abgr8888,
            2 => Rgba8888,
            3 => Bgra8888,
            4 => Xrgb8888,
            5 => Xbgr8888,
            6 => Rgbx8888,
            7 => Bgrx8888,
            8 => Rgba5551,
            9 => Rgb565,
            10 => Nv12,
            11 => Nv21,
            12 => Nv12m,
            13 => Nv21m,
            14 => Nv21mFull,
            other => return Err(UnsupportedFormat(other)),
        })
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Argb8888 => 0,
            Abgr8888 => 1,
            Rgba8888 => 2,
            Bgra8888 => 3,
            Xrgb8888 => 4,
            Xbgr8888 => 5,
            Rgbx8888 => 6,
            Bgrx8888 => 7,
            Rgba5551 => 8,
            Rgb565 => 9,
            Nv12 => 10,
            Nv21 => 11,
            Nv12m => 12,
            Nv21m => 13,
            Nv21mFull => 14,
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(self, Nv12 | Nv21 | Nv12m | Nv21m | Nv21mFull)
    }

    pub fn is_rgb32(self) -> bool {
        matches!(
            self,
            Argb8888 | Abgr8888 | Rgba8888 | Bgra8888 | Xrgb8888 | Xbgr8888 | Rgbx8888 | Bgrx8888
        )
    }

    /// True when the format carries a real (non-padding) alpha channel.
    pub fn has_alpha(self) -> bool {
        self.layout().alpha_len > 0
    }

    pub fn layout(self) -> ChannelLayout {
        match self {
            Argb8888 => rgb32(8, 16, 8, 24, 8, 0),
            Abgr8888 => rgb32(24, 16, 8, 8, 8, 0),
            Rgba8888 => rgb32(0, 8, 16, 24, 8, 0),
            Bgra8888 => rgb32(16, 8, 0, 24, 8, 0),
            Xrgb8888 => rgb32(8, 16, 24, 0, 0, 8),
            Xbgr8888 => rgb32(24, 16, 8, 0, 0, 8),
            Rgbx8888 => rgb32(0, 8, 16, 16, 0, 8),
            Bgrx8888 => rgb32(16, 8, 0, 16, 0, 8),
            Rgba5551 => ChannelLayout {
                red_len: 5,
                red_off: 0,
                green_len: 5,
                green_off: 5,
                blue_len: 5,
                blue_off: 10,
                alpha_len: 1,
                alpha_off: 15,
                padding: 0,
            },
            Rgb565 => ChannelLayout {
                red_len: 5,
                red_off: 11,
                green_len: 6,
                green_off: 5,
                blue_len: 5,
                blue_off: 0,
                alpha_len: 0,
                alpha_off: 0,
                padding: 0,
            },
            Nv12 | Nv21 | Nv12m | Nv21m | Nv21mFull => ChannelLayout::default(),
        }
    }

    /// Effective bits per pixel. RGB formats sum their channels plus padding;
    /// the semi-planar YUV family is 12 bpp by construction.
    pub fn bits_per_pixel(self) -> u32 {
        if self.is_yuv() {
            return 12;
        }
        let l = self.layout();
        l.red_len + l.green_len + l.blue_len + l.alpha_len + l.padding
    }

    /// Number of separately-allocated memory planes a buffer of this format
    /// spans.
    pub fn plane_count(self) -> usize {
        match self {
            Nv12m | Nv21m | Nv21mFull => 2,
            _ => 1,
        }
    }

    /// Contiguous semi-planar layouts derive the chroma plane address from
    /// the luma plane instead of importing a second buffer.
    pub fn needs_plane_offset(self) -> bool {
        matches!(self, Nv12 | Nv21)
    }

    pub fn byte_order(self) -> ByteOrder {
        match self {
            Argb8888 => ByteOrder::Bgra8888,
            Abgr8888 => ByteOrder::Rgba8888,
            Rgba8888 => ByteOrder::Abgr8888,
            Bgra8888 => ByteOrder::Argb8888,
            Xrgb8888 => ByteOrder::Bgrx8888,
            Xbgr8888 => ByteOrder::Rgbx8888,
            Rgbx8888 => ByteOrder::Xbgr8888,
            Bgrx8888 => ByteOrder::Xrgb8888,
            Rgb565 => ByteOrder::Rgb565,
            Rgba5551 => ByteOrder::None,
            Nv12 | Nv21 | Nv12m | Nv21m | Nv21mFull => ByteOrder::None,
        }
    }
}

fn rgb32(
    red_off: u32,
    green_off: u32,
    blue_off: u32,
    alpha_off: u32,
    alpha_len: u32,
    padding: u32,
) -> ChannelLayout {
    ChannelLayout {
        red_len: 8,
        red_off,
        green_len: 8,
        green_off,
        blue_len: 8,
        blue_off,
        alpha_len,
        alpha_off,
        padding,
    }
}

/// Per-window blend mode requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    None,
    Premultiplied,
    Coverage,
}

impl BlendMode {
    pub fn from_raw(code: u32) -> Option<Self> {
        match code {
            0 => Some(BlendMode::None),
            1 => Some(BlendMode::Premultiplied),
            2 => Some(BlendMode::Coverage),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            BlendMode::None => 0,
            BlendMode::Premultiplied => 1,
            BlendMode::Coverage => 2,
        }
    }
}
