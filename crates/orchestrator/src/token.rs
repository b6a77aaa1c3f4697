//! Cooperative cancellation (spec §5 "Cancellation & timeout"): every
//! analysis derives a token from `(caller_token, deadline = start +
//! timeout_minutes)`. Components check the token at every loop boundary
//! and between phases; there is no forced preemption.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<CancellationToken>,
}

/// Clone-cheap cancellation token; cloning shares the same underlying
/// flag and deadline.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A token with no parent and no deadline.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Derive a token for one analysis from a caller-supplied token and
    /// a wall-clock timeout (spec §5).
    pub fn with_deadline(caller: &CancellationToken, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
                parent: Some(caller.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self.inner.deadline.is_some_and(|d| Instant::now() >= d)
            || self.inner.parent.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelling_parent_cancels_child() {
        let parent = CancellationToken::new();
        let child = CancellationToken::with_deadline(&parent, Duration::from_secs(60));
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn deadline_expiry_cancels_token() {
        let parent = CancellationToken::new();
        let child = CancellationToken::with_deadline(&parent, Duration::from_millis(10));
        assert!(!child.is_cancelled());
        std::thread::sleep(Duration::from_millis(30));
        assert!(child.is_cancelled());
    }
}
