//! strata - overlay window composition and frame-commit pipeline
//!
//! Drives a windowed scan-out engine: validates per-window requests, lowers
//! them to shadow register values, and commits whole frames atomically from
//! a dedicated worker thread. Hardware, panel link, memory allocator, and
//! system QoS are collaborator traits, so the full pipeline runs unmodified
//! against mocks.
//!
//! The main entry point is [`Pipeline`]: build one with a [`Config`] and the
//! four collaborators, then feed it frames with [`Pipeline::submit`].

pub mod bandwidth;
pub mod buffer;
mod commit;
pub mod config;
pub mod events;
pub mod format;
pub mod geometry;
pub mod hw;
pub mod partial;
pub mod pipeline;
pub mod power;
pub mod registers;
pub mod sync;
pub mod transport;
pub mod window;

pub use bandwidth::QosController;
pub use buffer::{AllocHandle, Allocator, RawBufferId};
pub use config::Config;
pub use events::{DisplayEvent, LogEntry};
pub use format::{BlendMode, PixelFormat};
pub use geometry::Rect;
pub use hw::DisplayHw;
pub use pipeline::{Pipeline, SubmitError, WaitVsyncError};
pub use power::DeviceState;
pub use sync::{Fence, FrameFence};
pub use transport::OutputTransport;
pub use window::{Window, WindowConfig, WindowState};
