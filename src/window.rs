//! Window requests and the persistent per-slot state the commit worker owns.

use std::sync::Arc;

use crate::buffer::{DmaBufferBinding, RawBufferId};
use crate::geometry::Rect;
use crate::sync::Fence;

/// Planes a single window buffer may span.
pub const MAX_PLANES: usize = 3;

/// Requested role of a window slot for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowState {
    #[default]
    Disabled,
    /// Solid color fill, no memory fetch.
    Color,
    /// Scan out from a client buffer.
    Buffer,
    /// Carries the requested partial-update region instead of content.
    UpdateRegion,
}

/// One window's slice of a frame submission. Format and blending arrive as
/// raw codes from the client layer and are decoded during validation.
#[derive(Clone, Default)]
pub struct WindowConfig {
    pub state: WindowState,
    /// Placement on the panel.
    pub dst: Rect,
    /// Region fetched out of the source buffer.
    pub src: Rect,
    /// Whole-buffer dimensions (stride in pixels, scanline count).
    pub frame_width: u32,
    pub frame_height: u32,
    pub format: u32,
    pub blending: u32,
    /// Constant per-window alpha, 0-255.
    pub plane_alpha: u32,
    /// Fill value for `Color` windows.
    pub color: u32,
    pub planes: [RawBufferId; MAX_PLANES],
    /// Producer fence for plane 0; waited before the buffer is scanned out.
    pub fence: Option<Arc<dyn Fence>>,
    /// Content-protection requested for this buffer.
    pub protected: bool,
    /// DMA channel the window fetches through.
    pub channel: u32,
}

impl std::fmt::Debug for WindowConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowConfig")
            .field("state", &self.state)
            .field("dst", &self.dst)
            .field("src", &self.src)
            .field("frame", &(self.frame_width, self.frame_height))
            .field("format", &self.format)
            .field("blending", &self.blending)
            .field("plane_alpha", &self.plane_alpha)
            .field("channel", &self.channel)
            .field("has_fence", &self.fence.is_some())
            .finish()
    }
}

/// Persistent slot state. Only the commit worker mutates this after a frame
/// has been accepted; bindings swapped out here are released once the new
/// frame is on screen.
pub struct Window {
    pub index: usize,
    pub bindings: [DmaBufferBinding; MAX_PLANES],
    /// Descriptor of the frame currently on screen in this slot.
    pub config: WindowConfig,
}

impl Window {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            bindings: Default::default(),
            config: WindowConfig::default(),
        }
    }

    /// Swaps in the new frame's bindings, returning the superseded ones.
    pub fn replace_bindings(
        &mut self,
        new: [DmaBufferBinding; MAX_PLANES],
    ) -> [DmaBufferBinding; MAX_PLANES] {
        std::mem::replace(&mut self.bindings, new)
    }
}
