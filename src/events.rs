//! Fixed-capacity diagnostic event ring.
//!
//! Every notable pipeline action lands here with a monotonic index, so a
//! debug reader can both inspect recent history and detect how much was
//! overwritten since its last snapshot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::geometry::Rect;
use crate::power::DeviceState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Commit { seq: u64, windows: usize },
    VsyncInterrupt { on: bool },
    PowerTransition(DeviceState),
    FenceTimeout { win: usize },
    VsyncTimeout,
    ShadowUpdateTimeout,
    LinecntTimeout,
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },
    QosChange(u64),
    ContentProtection(bool),
    PartialUpdate(Rect),
    TuiEnter,
    TuiExit,
    Recovery,
    PanelFault,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Monotonic, never reused; gaps in a snapshot mean overwritten history.
    pub index: u64,
    pub at: Instant,
    pub event: DisplayEvent,
}

pub struct DiagnosticLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    next_index: AtomicU64,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            next_index: AtomicU64::new(0),
        }
    }

    pub fn record(&self, event: DisplayEvent) {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            index,
            at: Instant::now(),
            event,
        });
    }

    /// Read-only copy of the retained history, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}
