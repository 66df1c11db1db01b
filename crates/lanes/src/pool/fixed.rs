//! Fixed-size thread pool

use super::{wrap, PoolId, PoolJob};
use crate::cancel::CancellationToken;
use crate::completion::{CompletionHandle, Outcome};
use crate::current::Slot;
use crate::error::{LaneError, Result};
use crate::lane::{Job, LIVE_WORKERS};
use crate::queue::BlockingQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Thread pool with a fixed worker complement, all spawned at construction.
///
/// Workers block on the shared queue when idle; the pool never grows or
/// shrinks. `dispose` seals the queue, lets the workers finish whatever is
/// already queued, and joins them.
pub struct StaticPool {
    name: String,
    id: PoolId,
    max: usize,
    queue: Arc<BlockingQueue<PoolJob>>,
    executing: Arc<AtomicUsize>,
    disposed: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StaticPool {
    /// Create a pool with `size` workers. `size == 0` means one worker per
    /// logical CPU.
    pub fn new(name: impl Into<String>, size: usize) -> Arc<Self> {
        let name = name.into();
        let max = if size == 0 { num_cpus::get() } else { size };

        let pool = Arc::new(Self {
            name,
            id: PoolId::next(),
            max,
            queue: Arc::new(BlockingQueue::new()),
            executing: Arc::new(AtomicUsize::new(0)),
            disposed: AtomicBool::new(false),
            workers: Mutex::new(Vec::with_capacity(max)),
        });

        let mut workers = pool.workers.lock();
        for i in 0..max {
            let queue = pool.queue.clone();
            let executing = pool.executing.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", pool.name, i))
                .spawn(move || {
                    LIVE_WORKERS.fetch_add(1, Ordering::SeqCst);
                    while let Some(job) = queue.take() {
                        executing.fetch_add(1, Ordering::SeqCst);
                        (job.body)();
                        executing.fetch_sub(1, Ordering::SeqCst);
                    }
                    LIVE_WORKERS.fetch_sub(1, Ordering::SeqCst);
                })
                .expect("Failed to spawn pool worker thread");
            workers.push(handle);
        }
        drop(workers);

        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> PoolId {
        self.id
    }

    /// The fixed number of workers.
    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    /// Jobs queued but not yet picked up.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Jobs currently running on a worker.
    pub fn executing_count(&self) -> usize {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Queue a job for execution on any worker.
    pub fn queue_task(&self, action: impl FnOnce() + Send + 'static) -> Result<CompletionHandle> {
        self.queue_boxed(None, Box::new(action))
    }

    /// Queue a job that is skipped (completing as cancelled) if `token` is
    /// signalled before it starts.
    pub fn queue_cancellable(
        &self,
        token: &CancellationToken,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CompletionHandle> {
        self.queue_boxed(Some(token.clone()), Box::new(action))
    }

    pub(crate) fn queue_boxed(
        &self,
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

        let body = wrap(
            Slot::StaticPool(self.id),
            &self.name,
            token,
            action,
            handle.clone(),
        );
        let job = PoolJob {
            body,
            handle: handle.clone(),
        };
        if self.queue.add(job).is_err() {
            return Err(LaneError::Disposed(self.name.clone()));
        }
        Ok(handle)
    }

    /// Stop accepting jobs, finish everything already queued, and join the
    /// workers. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.complete_adding();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for StaticPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for StaticPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPool")
            .field("name", &self.name)
            .field("max", &self.max)
            .field("queued", &self.queue.len())
            .field("executing", &self.executing_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
