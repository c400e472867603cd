//! Buffer import and device mapping.
//!
//! A submitted plane goes through a three-step ladder: import the raw buffer
//! into the allocator, map it to learn its length, then map it into the
//! display device's address space. Any failing step unwinds the earlier ones
//! so the allocator's refcounts stay balanced no matter where the ladder
//! breaks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::sync::Fence;

/// Opaque buffer identifier handed in by the client layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawBufferId(pub u64);

/// Allocator-side handle for an imported buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocHandle(pub u64);

/// Memory-allocator collaborator. One `release` per successful `import`;
/// the binding below keeps that invariant for callers.
pub trait Allocator: Send + Sync {
    fn import(&self, raw: RawBufferId) -> anyhow::Result<AllocHandle>;
    /// Maps the buffer and returns its length in bytes.
    fn map(&self, handle: AllocHandle) -> anyhow::Result<u64>;
    /// Maps the buffer into the display device and returns the device address.
    fn map_for_device(&self, handle: AllocHandle) -> anyhow::Result<u64>;
    fn unmap_for_device(&self, handle: AllocHandle);
    fn unmap(&self, handle: AllocHandle);
    fn release(&self, handle: AllocHandle);

    /// Device memory management bring-up/teardown around display power.
    fn activate(&self) {}
    fn deactivate(&self) {}
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("buffer import failed")]
    Import(#[source] anyhow::Error),
    #[error("buffer map failed")]
    Map(#[source] anyhow::Error),
    #[error("device map failed")]
    DeviceMap(#[source] anyhow::Error),
}

/// A plane mapped into the device. Holds the allocator handle until released;
/// release is idempotent and waits out any still-attached input fence so the
/// producer is never trampled.
#[derive(Default)]
pub struct DmaBufferBinding {
    handle: Option<AllocHandle>,
    device_addr: u64,
    len: u64,
    fence: Option<Arc<dyn Fence>>,
}

impl std::fmt::Debug for DmaBufferBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBufferBinding")
            .field("handle", &self.handle)
            .field("device_addr", &self.device_addr)
            .field("len", &self.len)
            .field("has_fence", &self.fence.is_some())
            .finish()
    }
}

impl DmaBufferBinding {
    pub fn bind(allocator: &dyn Allocator, raw: RawBufferId) -> Result<Self, BindError> {
        let handle = allocator.import(raw).map_err(BindError::Import)?;
        let len = match allocator.map(handle) {
            Ok(len) => len,
            Err(e) => {
                allocator.release(handle);
                return Err(BindError::Map(e));
            }
        };
        let device_addr = match allocator.map_for_device(handle) {
            Ok(addr) => addr,
            Err(e) => {
                allocator.unmap(handle);
                allocator.release(handle);
                return Err(BindError::DeviceMap(e));
            }
        };
        Ok(Self {
            handle: Some(handle),
            device_addr,
            len,
            fence: None,
        })
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }

    pub fn device_addr(&self) -> u64 {
        self.device_addr
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn attach_fence(&mut self, fence: Arc<dyn Fence>) {
        self.fence = Some(fence);
    }

    /// Takes the input fence, leaving the binding releasable without a wait.
    /// The commit worker does this once it has waited the fence itself.
    pub fn take_fence(&mut self) -> Option<Arc<dyn Fence>> {
        self.fence.take()
    }

    /// Unmaps and drops the allocator reference. Safe to call on an unbound
    /// or already-released binding. A fence timeout is logged, never fatal.
    pub fn release(&mut self, allocator: &dyn Allocator, fence_timeout: Duration) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(fence) = self.fence.take() {
            if !fence.wait(fence_timeout) {
                warn!(timeout_ms = fence_timeout.as_millis() as u64,
                      "input fence timed out before buffer release");
            }
        }
        allocator.unmap_for_device(handle);
        allocator.unmap(handle);
        allocator.release(handle);
        self.device_addr = 0;
        self.len = 0;
    }
}
