//! Cooperative cancellation.
//!
//! A single stop flag, observable by the Runner's polling loop, the
//! comparators' inner iteration and the special-judge wait. Every poll site
//! checks the flag on each tick; once set, the component that notices it
//! tears down whatever child process or handle it owns and returns without
//! producing a verdict. There is no preemption: a `CancellationToken` is
//! plain shared state, not a signal that interrupts a thread mid-syscall.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply-cloned, thread-shared stop flag.
///
/// Cloning a `CancellationToken` does not create an independent flag: every
/// clone observes the same underlying state, so a single token can be handed
/// to the judging task while the controlling thread keeps a clone to call
/// `cancel()` on.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    pub fn new() -> CancellationToken {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested. Cheap enough to call
    /// on every iteration of a polling or comparison loop.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::CancellationToken;

    #[test]
    fn not_cancelled_initially() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
