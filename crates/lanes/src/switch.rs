//! Switching execution onto a lane or pool
//!
//! A [`Switch`] is a reusable handle to one target. `dispatch` moves the
//! given action onto the target, with one shortcut: if the calling thread
//! is already executing on that exact target, the action runs inline,
//! synchronously, with no queue round-trip. The returned handle is terminal
//! before `dispatch` returns in that case.

use crate::cancel::CancellationToken;
use crate::completion::{CompletionHandle, Outcome};
use crate::current::{self, Slot};
use crate::error::Result;
use crate::hook::{self, Fault};
use crate::lane::{Job, Lane};
use crate::pool::{DynamicPool, StaticPool};
use crate::timer;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
enum Target {
    Lane(Arc<Lane>),
    Static(Arc<StaticPool>),
    Dynamic(Arc<DynamicPool>),
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Target::Lane(lane) => lane.name(),
            Target::Static(pool) => pool.name(),
            Target::Dynamic(pool) => pool.name(),
        }
    }
}

/// Handle for moving execution onto one lane or pool.
#[derive(Clone)]
pub struct Switch {
    target: Target,
}

impl Switch {
    /// Switch handle for a lane held directly, without a registry lookup.
    pub fn to_lane(lane: Arc<Lane>) -> Self {
        Self {
            target: Target::Lane(lane),
        }
    }

    /// Switch handle for a static pool held directly.
    pub fn to_static(pool: Arc<StaticPool>) -> Self {
        Self {
            target: Target::Static(pool),
        }
    }

    /// Switch handle for a dynamic pool held directly.
    pub fn to_dynamic(pool: Arc<DynamicPool>) -> Self {
        Self {
            target: Target::Dynamic(pool),
        }
    }

    /// Name of the lane or pool this switch dispatches to.
    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// Whether the calling thread is already executing on the target.
    ///
    /// Evaluated fresh on every call; a switch handle is reusable from any
    /// thread.
    pub fn is_on_target(&self) -> bool {
        match (current::current(), &self.target) {
            (Some(Slot::Lane(id)), Target::Lane(lane)) => id == lane.id(),
            (Some(Slot::StaticPool(id)), Target::Static(pool)) => id == pool.id(),
            (Some(Slot::DynamicPool(id)), Target::Dynamic(pool)) => id == pool.id(),
            _ => false,
        }
    }

    /// Run `action` on the target. Inline if already there, queued
    /// otherwise.
    pub fn dispatch(&self, action: impl FnOnce() + Send + 'static) -> Result<CompletionHandle> {
        self.dispatch_boxed(None, Box::new(action))
    }

    /// Like [`dispatch`](Self::dispatch), but the action is skipped
    /// (completing as cancelled) if `token` is signalled before it starts.
    pub fn dispatch_cancellable(
        &self,
        token: &CancellationToken,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CompletionHandle> {
        self.dispatch_boxed(Some(token.clone()), Box::new(action))
    }

    /// Run `action` on the target once `delay` has elapsed. The returned
    /// handle settles when the delayed action does; if the target is torn
    /// down before the deadline, it settles as faulted and the fault hook
    /// fires.
    pub fn dispatch_after(
        &self,
        delay: Duration,
        action: impl FnOnce() + Send + 'static,
    ) -> CompletionHandle {
        let handle = CompletionHandle::new();
        let chained = handle.clone();
        let switch = self.clone();
        let action: Job = Box::new(action);
        timer::schedule(
            delay,
            Box::new(move || match switch.dispatch_boxed(None, action) {
                Ok(inner) => {
                    inner.on_completed(move |outcome| {
                        chained.complete(outcome.clone());
                    });
                }
                Err(err) => {
                    let fault = Fault::new(switch.target_name(), err.to_string());
                    hook::notify(&fault);
                    chained.complete(Outcome::Faulted(fault));
                }
            }),
        );
        handle
    }

    pub(crate) fn dispatch_boxed(
        &self,
        token: Option<CancellationToken>,
        action: Job,
    ) -> Result<CompletionHandle> {
        if self.is_on_target() {
            let handle = CompletionHandle::new();
            if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                handle.complete(Outcome::Cancelled);
                return Ok(handle);
            }
            match catch_unwind(AssertUnwindSafe(action)) {
                Ok(()) => {
                    handle.complete(Outcome::Completed);
                }
                Err(payload) => {
                    let fault = Fault::from_panic(self.target.name(), payload);
                    hook::notify(&fault);
                    handle.complete(Outcome::Faulted(fault));
                }
            }
            return Ok(handle);
        }

        match &self.target {
            Target::Lane(lane) => lane.post_boxed(token, action),
            Target::Static(pool) => pool.queue_boxed(token, action),
            Target::Dynamic(pool) => pool.queue_boxed(token, action),
        }
    }
}

impl std::fmt::Debug for Switch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Switch")
            .field("target", &self.target.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_not_on_target_from_plain_thread() {
        let lane = Lane::new("sw-plain");
        let switch = Switch::to_lane(lane.clone());
        assert!(!switch.is_on_target());
        lane.dispose();
    }

    #[test]
    fn test_dispatch_moves_to_lane_worker() {
        let lane = Lane::new("sw-move");
        let switch = Switch::to_lane(lane.clone());

        let caller = thread::current().id();
        let handle = switch
            .dispatch(move || assert_ne!(thread::current().id(), caller))
            .unwrap();
        assert!(handle.wait().is_completed());
        lane.dispose();
    }

    #[test]
    fn test_dispatch_on_target_runs_inline() {
        let lane = Lane::new("sw-inline");
        let switch = Switch::to_lane(lane.clone());

        let inner = switch.clone();
        let outer = lane
            .post(move || {
                assert!(inner.is_on_target());
                let ran = Arc::new(AtomicBool::new(false));
                let flag = ran.clone();
                let handle = inner.dispatch(move || flag.store(true, Ordering::SeqCst)).unwrap();
                // Inline dispatch completes before returning.
                assert!(ran.load(Ordering::SeqCst));
                assert!(handle.outcome().is_some_and(|o| o.is_completed()));
            })
            .unwrap();
        assert!(outer.wait().is_completed());
        lane.dispose();
    }

    #[test]
    fn test_inline_dispatch_checks_cancellation() {
        let lane = Lane::new("sw-inline-cancel");
        let switch = Switch::to_lane(lane.clone());
        let source = crate::cancel::CancellationSource::new();
        source.cancel();
        let token = source.token();

        let inner = switch.clone();
        lane.post(move || {
            let handle = inner
                .dispatch_cancellable(&token, || panic!("should not run"))
                .unwrap();
            assert!(handle.outcome().is_some_and(|o| o.is_cancelled()));
        })
        .unwrap()
        .wait();
        lane.dispose();
    }

    #[test]
    fn test_dispatch_after_lands_on_target() {
        use std::time::Instant;

        let lane = Lane::new("sw-after");
        let switch = Switch::to_lane(lane.clone());
        let lane_id = lane.id();

        let start = Instant::now();
        let handle = switch.dispatch_after(Duration::from_millis(30), move || {
            assert_eq!(crate::registry::current_lane_id(), Some(lane_id));
        });

        assert!(handle.wait().is_completed());
        assert!(start.elapsed() >= Duration::from_millis(30));
        lane.dispose();
    }

    #[test]
    fn test_dispatch_after_disposed_target_faults() {
        let lane = Lane::new("sw-after-gone");
        let switch = Switch::to_lane(lane.clone());
        lane.dispose();

        let handle = switch.dispatch_after(Duration::from_millis(10), || panic!("should not run"));
        assert!(handle.wait().is_faulted());
    }

    #[test]
    fn test_pool_switch_targets_distinguish_pools() {
        let a = StaticPool::new("sw-pool-a", 1);
        let b = StaticPool::new("sw-pool-b", 1);
        let switch_b = Switch::to_static(b.clone());

        // Running on pool A is not "on target" for a switch to pool B.
        let probe = switch_b.clone();
        a.queue_task(move || assert!(!probe.is_on_target()))
            .unwrap()
            .wait();

        let probe = switch_b.clone();
        b.queue_task(move || assert!(probe.is_on_target()))
            .unwrap()
            .wait();

        a.dispose();
        b.dispose();
    }
}
