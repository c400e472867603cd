//! Panel-link collaborator seam (the serial display interface behind the
//! scan-out engine).

use crate::geometry::Rect;

pub trait OutputTransport: Send + Sync {
    /// Starts or stops the pixel stream. Failures here abort power
    /// transitions; everything else on this trait is logged and tolerated.
    fn set_stream(&self, on: bool) -> anyhow::Result<()>;

    /// Reprograms link timing for the given scan-out region.
    fn set_porch(&self, area: &Rect) -> anyhow::Result<()>;

    /// Tells the panel which region subsequent frames cover.
    fn partial_area_command(&self, area: &Rect) -> anyhow::Result<()>;

    /// Drops the link into its low-power state without losing the session.
    fn enter_low_power_link(&self) -> anyhow::Result<()>;
    fn exit_low_power_link(&self) -> anyhow::Result<()>;

    /// Dimensions the link is currently configured for.
    fn link_size(&self) -> (u32, u32);
}
