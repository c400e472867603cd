//! Rectangle math for window placement, clipping and DMA alignment checks.

/// A window rectangle: origin plus extent. Origins may be negative while a
/// request is still being validated; extents are always unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Inclusive edge bounds. Meaningless for an empty rect; callers check
    /// `is_empty` first. Extents are client-controlled, so edges past the
    /// coordinate range clamp instead of wrapping.
    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.x,
            top: self.y,
            right: (self.x as i64 + self.w as i64 - 1).min(i32::MAX as i64) as i32,
            bottom: (self.y as i64 + self.h as i64 - 1).min(i32::MAX as i64) as i32,
        }
    }
}

/// Inclusive-edge bounds, the form the overlap math works in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.left > other.right
            || self.right < other.left
            || self.top > other.bottom
            || self.bottom < other.top)
    }

    /// Clamped min/max of the edges. Only meaningful when `intersects` is
    /// true; a non-overlapping pair yields inverted edges.
    pub fn intersection(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left + 1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top + 1).max(0) as u32
    }

    pub fn to_rect(&self) -> Rect {
        Rect {
            x: self.left,
            y: self.top,
            w: self.width(),
            h: self.height(),
        }
    }
}

/// Both the left and right X edge of a window must land on a whole DMA burst
/// boundary: a burst covers `32 / bits_per_pixel` pixels.
pub fn is_x_aligned(x: i32, w: u32, bits_per_pixel: u32) -> bool {
    let pixel_alignment = (32 / bits_per_pixel) as i32;
    if pixel_alignment <= 1 {
        return true;
    }
    if x % pixel_alignment != 0 {
        return false;
    }
    (x + w as i32) % pixel_alignment == 0
}
