//! Frame-completion timeline and the fence objects handed back to clients.
//!
//! The timeline is a monotonic counter: every accepted submission reserves the
//! next value, and the commit worker advances the counter by exactly one per
//! processed frame. A fence signals once the counter reaches its target, so
//! fences signal strictly in submission order.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// An input fence attached to a submitted buffer. The producer side lives
/// outside this crate; we only ever wait on it.
pub trait Fence: Send + Sync {
    /// Blocks until the fence signals or the timeout elapses. Returns true
    /// when signaled.
    fn wait(&self, timeout: Duration) -> bool;
}

struct Inner {
    value: Mutex<u64>,
    cond: Condvar,
}

/// Monotonic completion counter shared between the submission path and the
/// commit worker.
#[derive(Clone)]
pub struct CompletionTimeline {
    inner: Arc<Inner>,
}

impl CompletionTimeline {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn value(&self) -> u64 {
        *self.inner.value.lock().unwrap()
    }

    /// Advances the counter by one and wakes every waiter. The commit worker
    /// calls this exactly once per frame it retires.
    pub fn advance(&self) {
        let mut v = self.inner.value.lock().unwrap();
        *v += 1;
        self.inner.cond.notify_all();
    }

    pub fn create_fence(&self, target: u64) -> FrameFence {
        FrameFence {
            inner: self.inner.clone(),
            target,
        }
    }
}

impl Default for CompletionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Signals when the frame it was issued for has been retired by the worker.
pub struct FrameFence {
    inner: Arc<Inner>,
    target: u64,
}

impl std::fmt::Debug for FrameFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameFence")
            .field("target", &self.target)
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

impl FrameFence {
    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn is_signaled(&self) -> bool {
        *self.inner.value.lock().unwrap() >= self.target
    }

    /// Bounded wait. Returns true when the frame retired within the timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let v = self.inner.value.lock().unwrap();
        let (v, _res) = self
            .inner
            .cond
            .wait_timeout_while(v, timeout, |v| *v < self.target)
            .unwrap();
        *v >= self.target
    }

    /// Unbounded wait.
    pub fn wait_signaled(&self) {
        let v = self.inner.value.lock().unwrap();
        let _v = self
            .inner
            .cond
            .wait_while(v, |v| *v < self.target)
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fence_signals_when_timeline_reaches_target() {
        let tl = CompletionTimeline::new();
        let f = tl.create_fence(2);
        assert!(!f.is_signaled());
        tl.advance();
        assert!(!f.wait(Duration::from_millis(1)));
        tl.advance();
        assert!(f.is_signaled());
        assert!(f.wait(Duration::from_millis(1)));
    }

    #[test]
    fn fences_signal_in_submission_order() {
        let tl = CompletionTimeline::new();
        let first = tl.create_fence(1);
        let second = tl.create_fence(2);
        tl.advance();
        assert!(first.is_signaled());
        assert!(!second.is_signaled());
        tl.advance();
        assert!(second.is_signaled());
    }

    #[test]
    fn waiter_wakes_from_another_thread() {
        let tl = CompletionTimeline::new();
        let f = tl.create_fence(1);
        let tl2 = tl.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            tl2.advance();
        });
        f.wait_signaled();
        assert_eq!(tl.value(), 1);
        h.join().unwrap();
    }
}
