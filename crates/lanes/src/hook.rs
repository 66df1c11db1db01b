//! Process-wide fault hook
//!
//! Every posted action that panics completes its handle as faulted *and*
//! reaches the handler installed here, whether or not anyone observes the
//! handle. This is the safety net for fire-and-forget posts: failures stay
//! observable (typically logged) even when nobody extracts the result.
//!
//! Panics are captured with `catch_unwind` inside the worker loop at the
//! point of failure and carried as a `Fault` value; they are never unwound
//! across a thread handoff.

use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// A captured failure from a posted action.
///
/// Cheap to clone; two clones of the same capture compare identical via
/// [`Fault::same_as`].
#[derive(Clone)]
pub struct Fault {
    inner: Arc<FaultInner>,
}

struct FaultInner {
    /// Name of the lane or pool the action was posted to.
    target: String,
    /// Panic message, best-effort extracted from the payload.
    message: String,
}

impl Fault {
    pub(crate) fn new(target: &str, message: String) -> Self {
        Self {
            inner: Arc::new(FaultInner {
                target: target.to_string(),
                message,
            }),
        }
    }

    /// Build a fault from a caught panic payload.
    pub(crate) fn from_panic(target: &str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(target, message)
    }

    /// Name of the lane or pool the faulted action ran on.
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    /// The captured panic message.
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Whether two faults refer to the same capture.
    pub fn same_as(&self, other: &Fault) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.inner.target, self.inner.message)
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("target", &self.inner.target)
            .field("message", &self.inner.message)
            .finish()
    }
}

type FaultHandler = Arc<dyn Fn(&Fault) + Send + Sync>;

static HANDLER: LazyLock<RwLock<Option<FaultHandler>>> = LazyLock::new(|| RwLock::new(None));

/// Install the process-wide fault handler, replacing any previous one.
///
/// At most one handler is installed at a time.
pub fn set_fault_handler(handler: impl Fn(&Fault) + Send + Sync + 'static) {
    *HANDLER.write() = Some(Arc::new(handler));
}

/// Remove the installed fault handler, if any.
pub fn clear_fault_handler() {
    *HANDLER.write() = None;
}

/// Invoke the installed handler with a captured fault.
pub(crate) fn notify(fault: &Fault) {
    // Clone out so the handler runs without holding the lock.
    let handler = HANDLER.read().clone();
    if let Some(handler) = handler {
        handler(fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fault_from_panic_payload() {
        let fault = Fault::from_panic("worker", Box::new("boom"));
        assert_eq!(fault.target(), "worker");
        assert_eq!(fault.message(), "boom");

        let fault = Fault::from_panic("worker", Box::new("again".to_string()));
        assert_eq!(fault.message(), "again");

        let fault = Fault::from_panic("worker", Box::new(17usize));
        assert_eq!(fault.message(), "panic with non-string payload");
    }

    #[test]
    fn test_fault_identity() {
        let fault = Fault::new("a", "x".to_string());
        let clone = fault.clone();
        let other = Fault::new("a", "x".to_string());

        assert!(fault.same_as(&clone));
        assert!(!fault.same_as(&other));
    }

    #[test]
    fn test_handler_replace_and_clear() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        // Other tests in this binary may fault concurrently; count only
        // notifications for this test's target.
        set_fault_handler(|fault| {
            if fault.target() == "t" {
                CALLS.fetch_add(1, Ordering::SeqCst);
            }
        });
        notify(&Fault::new("t", "m".to_string()));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        // Replacing means the old handler no longer fires.
        set_fault_handler(|_| {});
        notify(&Fault::new("t", "m".to_string()));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        clear_fault_handler();
        notify(&Fault::new("t", "m".to_string()));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
