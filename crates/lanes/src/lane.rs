//! Named single-threaded execution lanes
//!
//! A lane owns one FIFO queue and, normally, one dedicated worker thread
//! that drains it. All actions posted to a lane run on that worker in
//! arrival order, which makes lane-confined state safe without locks.
//!
//! A lane can instead be created with a [`Dispatcher`], in which case no
//! worker is spawned and each prepared job is handed to the dispatcher for
//! the host to run wherever it wants (a UI event loop, a game tick, a test
//! harness draining manually).
//!
//! Lifecycle is counted: a lane starts with one outstanding operation held
//! by the owner, every post adds one, every finished action removes one,
//! and `dispose` releases the owner's. When the count hits zero the queue
//! seals and the worker drains whatever remains, then exits.

use crate::cancel::CancellationToken;
use crate::completion::{CompletionHandle, Outcome};
use crate::current::{Guard, Slot};
use crate::error::{LaneError, Result};
use crate::hook::{self, Fault};
use crate::queue::BlockingQueue;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unique lane identifier, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneId(u64);

impl LaneId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A prepared unit of work. Already wrapped with target tagging, panic
/// capture and completion signalling; the runner just calls it.
pub type Job = Box<dyn FnOnce() + Send>;

/// Host-supplied execution for a dispatcher lane.
///
/// Implementations must eventually run every job they are handed, each one
/// exactly once, in the order received if the lane's FIFO guarantee is to
/// hold.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

// Gauge counting lane and pool worker threads currently alive. Lets tests
// and shutdown paths confirm workers actually exit.
pub(crate) static LIVE_WORKERS: AtomicUsize = AtomicUsize::new(0);

/// Number of lane and pool worker threads currently running.
pub fn live_worker_count() -> usize {
    LIVE_WORKERS.load(Ordering::SeqCst)
}

/// A named, single-threaded execution context.
pub struct Lane {
    name: String,
    id: LaneId,
    queue: Arc<BlockingQueue<Job>>,
    /// Operations in flight plus the owner's unit, held until dispose.
    outstanding: AtomicUsize,
    disposed: AtomicBool,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Lane {
    /// Create a lane with a dedicated worker thread.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_stack_size(name, None)
    }

    /// Create a lane whose worker uses a specific stack size.
    pub fn with_stack_size(name: impl Into<String>, stack_size: Option<usize>) -> Arc<Self> {
        let lane = Arc::new(Self::build(name, None));

        let queue = lane.queue.clone();
        let mut builder = thread::Builder::new().name(format!("lane-{}", lane.name));
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || {
                LIVE_WORKERS.fetch_add(1, Ordering::SeqCst);
                while let Some(job) = queue.take() {
                    job();
                }
                LIVE_WORKERS.fetch_sub(1, Ordering::SeqCst);
            })
            .expect("Failed to spawn lane worker thread");
        *lane.worker.lock() = Some(handle);

        lane
    }

    /// Create a lane without a worker. Prepared jobs go to `dispatcher`
    /// and run wherever the host executes them.
    pub fn with_dispatcher(name: impl Into<String>, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        Arc::new(Self::build(name, Some(dispatcher)))
    }

    fn build(name: impl Into<String>, dispatcher: Option<Arc<dyn Dispatcher>>) -> Self {
        Self {
            name: name.into(),
            id: LaneId::next(),
            queue: Arc::new(BlockingQueue::new()),
            outstanding: AtomicUsize::new(1),
            disposed: AtomicBool::new(false),
            dispatcher,
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> LaneId {
        self.id
    }

    /// Actions queued but not yet picked up by the worker.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Post an action to run on this lane.
    pub fn post(
        self: &Arc<Self>,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CompletionHandle> {
        self.post_boxed(None, Box::new(action))
    }

    /// Post an action that is skipped (completing as cancelled) if `token`
    /// is signalled before it starts.
    pub fn post_cancellable(
        self: &Arc<Self>,
        token: &CancellationToken,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CompletionHandle> {
        self.post_boxed(Some(token.clone()), Box::new(action))
    }

    pub(crate) fn post_boxed(
        self: &Arc<Self>,
        token: Option<CancellationToken>,
        action: Job,
    ) -> Result<CompletionHandle> {
        if self.is_disposed() {
            return Err(LaneError::Disposed(self.name.clone()));
        }

        let handle = CompletionHandle::new();
        if token.as_ref().is_some_and(|t| t.is_cancelled()) {
            handle.complete(Outcome::Cancelled);
            return Ok(handle);
        }

        self.operation_started();
        let job = self.wrap(token, action, handle.clone());

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(job);
        } else if self.queue.add(job).is_err() {
            // Lost the race with dispose; the queue already sealed.
            self.operation_completed();
            return Err(LaneError::Disposed(self.name.clone()));
        }
        Ok(handle)
    }

    /// Wrap a raw action with target tagging, the pre-run cancellation
    /// check, panic capture and lifecycle accounting.
    fn wrap(
        self: &Arc<Self>,
        token: Option<CancellationToken>,
        action: Job,
        handle: CompletionHandle,
    ) -> Job {
        let lane = self.clone();
        Box::new(move || {
            {
                let _guard = Guard::enter(Slot::Lane(lane.id));
                if token.as_ref().is_some_and(|t| t.is_cancelled()) {
                    handle.complete(Outcome::Cancelled);
                } else {
                    match catch_unwind(AssertUnwindSafe(action)) {
                        Ok(()) => {
                            handle.complete(Outcome::Completed);
                        }
                        Err(payload) => {
                            let fault = Fault::from_panic(&lane.name, payload);
                            // Hook first, so the fault is already reported
                            // when waiters wake.
                            hook::notify(&fault);
                            handle.complete(Outcome::Faulted(fault));
                        }
                    }
                }
            }
            lane.operation_completed();
        })
    }

    fn operation_started(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    fn operation_completed(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.complete_adding();
        }
    }

    /// Release the owner's lifecycle unit. New posts are rejected; already
    /// queued actions still run, then the worker exits. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.operation_completed();
        }
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        self.dispose();
        if let Some(handle) = self.worker.lock().take() {
            // The last Arc can drop inside the worker itself (a queued job
            // held it); a self-join would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("queued", &self.queue.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
