//! Growing thread pool with a hard cap

use super::{wrap, PoolId, PoolJob};
use crate::cancel::CancellationToken;
use crate::completion::{CompletionHandle, Outcome};
use crate::current::Slot;
use crate::error::{LaneError, Result};
use crate::lane::{Job, LIVE_WORKERS};
use crate::queue::BlockingQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Thread pool that starts empty, grows one worker at a time as jobs
/// arrive, and lets idle workers retire.
///
/// The live-worker count is raised with a compare-exchange before each
/// spawn, so the cap is never overshot even under concurrent submission.
/// Workers never block on the queue; a worker that finds it empty retires
/// immediately.
pub struct DynamicPool {
    name: String,
    id: PoolId,
    max: usize,
    queue: Arc<BlockingQueue<PoolJob>>,
    /// Workers currently alive for this pool. Bounded by `max`.
    live: AtomicUsize,
    executing: AtomicUsize,
    disposed: AtomicBool,
    worker_seq: AtomicUsize,
}

impl DynamicPool {
    /// Create a pool that may grow up to `cap` workers. `cap == 0` means
    /// one worker per logical CPU.
    pub fn new(name: impl Into<String>, cap: usize) -> Arc<Self> {
        let max = if cap == 0 { num_cpus::get() } else { cap };
        Arc::new(Self {
            name: name.into(),
            id: PoolId::next(),
            max,
            queue: Arc::new(BlockingQueue::new()),
            live: AtomicUsize::new(0),
            executing: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            worker_seq: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> PoolId {
        self.id
    }

    /// The hard cap on simultaneous workers.
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

    /// Workers currently alive.
    pub fn worker_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Queue a job for execution, growing the pool if below the cap.
    pub fn queue_task(
        self: &Arc<Self>,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CompletionHandle> {
        self.queue_boxed(None, Box::new(action))
    }

    /// Queue a job that is skipped (completing as cancelled) if `token` is
    /// signalled before it starts.
    pub fn queue_cancellable(
        self: &Arc<Self>,
        token: &CancellationToken,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<CompletionHandle> {
        self.queue_boxed(Some(token.clone()), Box::new(action))
    }

    pub(crate) fn queue_boxed(
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

        let body = wrap(
            Slot::DynamicPool(self.id),
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
        self.try_grow();
        Ok(handle)
    }

    /// Spawn one worker if the live count is below the cap. The count is
    /// raised with a compare-exchange first, so concurrent callers can
    /// never overshoot.
    fn try_grow(self: &Arc<Self>) {
        loop {
            let current = self.live.load(Ordering::Acquire);
            if current >= self.max {
                return;
            }
            if self
                .live
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.spawn_worker();
                return;
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let pool = self.clone();
        let seq = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("{}-{}", self.name, seq))
            .spawn(move || pool.drain_loop())
            .expect("Failed to spawn pool worker thread");
    }

    fn drain_loop(self: Arc<Self>) {
        LIVE_WORKERS.fetch_add(1, Ordering::SeqCst);
        loop {
            match self.queue.try_take() {
                Some(job) => {
                    self.executing.fetch_add(1, Ordering::SeqCst);
                    (job.body)();
                    self.executing.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    self.live.fetch_sub(1, Ordering::AcqRel);
                    #[cfg(debug_assertions)]
                    eprintln!("{}: worker retiring", self.name);
                    // A job enqueued between our last try_take and the
                    // decrement saw this worker as live and skipped its
                    // spawn; cover it.
                    if !self.queue.is_empty() && !self.is_disposed() {
                        self.try_grow();
                    }
                    break;
                }
            }
        }
        LIVE_WORKERS.fetch_sub(1, Ordering::SeqCst);
    }

    /// Stop accepting jobs and cancel everything still queued. Running jobs
    /// finish; workers retire on their own. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.complete_adding();
        while let Some(job) = self.queue.try_take() {
            job.handle.complete(Outcome::Cancelled);
        }
    }
}

impl Drop for DynamicPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DynamicPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicPool")
            .field("name", &self.name)
            .field("cap", &self.max)
            .field("live", &self.worker_count())
            .field("queued", &self.queue.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_and_complete() {
        let pool = DynamicPool::new("dp-run", 4);
        let count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let count = count.clone();
                pool.queue_task(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            assert!(handle.wait().is_completed());
        }
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_starts_with_no_workers() {
        let pool = DynamicPool::new("dp-empty", 4);
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn test_workers_retire_when_idle() {
        let pool = DynamicPool::new("dp-retire", 4);
        pool.queue_task(|| {}).unwrap().wait();

        // The worker exits shortly after the queue drains.
        for _ in 0..100 {
            if pool.worker_count() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("idle worker did not retire");
    }

    #[test]
    fn test_cap_never_overshot() {
        let pool = DynamicPool::new("dp-cap", 3);
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..30)
            .map(|_| {
                let peak = peak.clone();
                let running = running.clone();
                pool.queue_task(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.worker_count() <= 3);
    }

    #[test]
    fn test_no_job_stranded_by_retiring_worker() {
        // Hammer the enqueue-vs-retire race; every handle must still
        // complete.
        let pool = DynamicPool::new("dp-race", 1);
        for _ in 0..200 {
            let handle = pool.queue_task(|| {}).unwrap();
            assert!(handle
                .wait_timeout(Duration::from_secs(5))
                .is_some_and(|o| o.is_completed()));
        }
    }

    #[test]
    fn test_dispose_cancels_queued_jobs() {
        let pool = DynamicPool::new("dp-dispose", 1);

        let gate = Arc::new(AtomicBool::new(false));
        let open = gate.clone();
        let blocker = pool
            .queue_task(move || {
                while !open.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .unwrap();
        let stuck = pool.queue_task(|| panic!("should not run")).unwrap();

        pool.dispose();
        gate.store(true, Ordering::SeqCst);

        assert!(blocker.wait().is_completed());
        assert!(stuck.wait().is_cancelled());
        assert!(matches!(pool.queue_task(|| {}), Err(LaneError::Disposed(_))));
    }
}
