//! Cooperative cancellation
//!
//! Cancellation is checked at registration boundaries only (when a switch or
//! post is requested, and again just before the dequeued action runs). There
//! is no preemptive mid-action cancellation at this layer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner side of a cancellation pair. Dropping the source does not cancel.
#[derive(Debug, Default)]
pub struct CancellationSource {
    flag: Arc<AtomicBool>,
}

impl CancellationSource {
    /// Create a new, unsignalled source.
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            flag: self.flag.clone(),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Observer side of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_observes_cancel() {
        let source = CancellationSource::new();
        let token = source.token();

        assert!(!token.is_cancelled());
        source.cancel();
        assert!(token.is_cancelled());
        assert!(source.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let source = CancellationSource::new();
        source.cancel();
        source.cancel();
        assert!(source.token().is_cancelled());
    }

    #[test]
    fn test_tokens_share_state() {
        let source = CancellationSource::new();
        let t1 = source.token();
        let t2 = t1.clone();

        source.cancel();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }
}
