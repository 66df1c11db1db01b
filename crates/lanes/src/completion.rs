//! Completion handles for posted actions
//!
//! Every `post`/`queue_task`/`dispatch` returns a [`CompletionHandle`] that
//! transitions to exactly one terminal [`Outcome`]. Continuations can be
//! registered before or after completion; blocking `wait` helpers exist for
//! synchronous callers (tests, shutdown paths), and the handle is also a
//! `Future` so external executors can await it.

use crate::error::{LaneError, Result};
use crate::hook::Fault;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Terminal state of a posted action.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The action ran to completion.
    Completed,
    /// The action was cancelled before it ran.
    Cancelled,
    /// The action panicked; carries the captured fault.
    Faulted(Fault),
}

impl Outcome {
    /// Whether this is the success outcome.
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    /// Whether the action was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// Whether the action faulted.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Outcome::Faulted(_))
    }

    /// Convert to a `Result`, propagating cancellation and faults.
    pub fn into_result(self) -> Result<()> {
        match self {
            Outcome::Completed => Ok(()),
            Outcome::Cancelled => Err(LaneError::Cancelled),
            Outcome::Faulted(fault) => Err(LaneError::Faulted(fault)),
        }
    }
}

type Continuation = Box<dyn FnOnce(&Outcome) + Send>;

struct Slot {
    outcome: Option<Outcome>,
    continuations: Vec<Continuation>,
    wakers: Vec<Waker>,
}

struct Shared {
    slot: Mutex<Slot>,
    done: Condvar,
}

/// Handle observing the completion of one posted action.
///
/// Clones share the same underlying state; the action's terminal state is
/// set exactly once no matter how many clones exist.
#[derive(Clone)]
pub struct CompletionHandle {
    shared: Arc<Shared>,
}

impl CompletionHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    outcome: None,
                    continuations: Vec::new(),
                    wakers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Transition to a terminal state. Returns false if already terminal;
    /// at most one call ever wins.
    pub(crate) fn complete(&self, outcome: Outcome) -> bool {
        let (continuations, wakers) = {
            let mut slot = self.shared.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            slot.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut slot.continuations),
                std::mem::take(&mut slot.wakers),
            )
        };
        self.shared.done.notify_all();
        for continuation in continuations {
            continuation(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Whether the action has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.shared.slot.lock().outcome.is_some()
    }

    /// The terminal outcome, if already reached.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared.slot.lock().outcome.clone()
    }

    /// Register a continuation. Runs inline immediately if the handle is
    /// already terminal, otherwise runs on whichever thread completes it.
    pub fn on_completed(&self, f: impl FnOnce(&Outcome) + Send + 'static) {
        let outcome = {
            let mut slot = self.shared.slot.lock();
            match &slot.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    slot.continuations.push(Box::new(f));
                    return;
                }
            }
        };
        f(&outcome);
    }

    /// Block the calling thread until the action reaches a terminal state.
    ///
    /// Synchronous helper for tests and shutdown paths. Must not be called
    /// from the target's own worker while that worker is the one expected to
    /// run the action.
    pub fn wait(&self) -> Outcome {
        let mut slot = self.shared.slot.lock();
        while slot.outcome.is_none() {
            self.shared.done.wait(&mut slot);
        }
        slot.outcome.clone().unwrap()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut slot = self.shared.slot.lock();
        if slot.outcome.is_none() {
            self.shared.done.wait_for(&mut slot, timeout);
        }
        slot.outcome.clone()
    }

    /// Block until terminal and convert to a `Result`, propagating the
    /// fault or cancellation to the caller.
    pub fn join(&self) -> Result<()> {
        self.wait().into_result()
    }
}

impl Future for CompletionHandle {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if let Some(outcome) = &slot.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("outcome", &self.outcome())
            .finish()
    }
}
