//! Bounded thread pools
//!
//! Two flavours share one job model. [`StaticPool`] spawns its full worker
//! complement up front and keeps it for the pool's lifetime; it suits
//! steady CPU-bound load. [`DynamicPool`] starts with no workers, grows one
//! at a time up to a hard cap as jobs arrive, and lets idle workers retire;
//! it suits bursty or blocking work.
//!
//! Neither pool preempts or steals. Jobs are taken in FIFO order from a
//! single shared queue; which worker runs a given job is unspecified.

mod elastic;
mod fixed;

pub use elastic::DynamicPool;
pub use fixed::StaticPool;

use crate::cancel::CancellationToken;
use crate::completion::{CompletionHandle, Outcome};
use crate::current::{Guard, Slot};
use crate::hook::{self, Fault};
use crate::lane::Job;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique pool identifier, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A queued pool job. The handle is carried alongside the prepared body so
/// teardown can cancel jobs that will never run.
pub(crate) struct PoolJob {
    pub body: Job,
    pub handle: CompletionHandle,
}

/// Wrap a raw action with target tagging, the pre-run cancellation check,
/// panic capture and completion signalling. Pool workers run the result
/// as-is.
pub(crate) fn wrap(
    slot: Slot,
    pool_name: &str,
    token: Option<CancellationToken>,
    action: Job,
    handle: CompletionHandle,
) -> Job {
    let name = pool_name.to_string();
    Box::new(move || {
        let _guard = Guard::enter(slot);
        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            handle.complete(Outcome::Cancelled);
            return;
        }
        match catch_unwind(AssertUnwindSafe(action)) {
            Ok(()) => {
                handle.complete(Outcome::Completed);
            }
            Err(payload) => {
                let fault = Fault::from_panic(&name, payload);
                // Hook first, so the fault is already reported when
                // waiters wake.
                hook::notify(&fault);
                handle.complete(Outcome::Faulted(fault));
            }
        }
    })
}
