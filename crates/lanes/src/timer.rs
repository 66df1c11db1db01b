//! Shared timer thread for delayed dispatch
//!
//! One lazily started thread owns a min-heap of pending entries, sleeps
//! until the earliest deadline, and fires callbacks as they come due.
//! Callbacks run briefly on the timer thread; `delay` uses them only to
//! hand the real action off to its target.

use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::{Duration, Instant};

struct TimerEntry {
    at: Instant,
    /// Insertion order tiebreak for identical deadlines.
    seq: u64,
    fire: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerThread {
    pending: Mutex<BinaryHeap<TimerEntry>>,
    notify: Condvar,
    seq: AtomicU64,
}

impl TimerThread {
    fn schedule(&self, at: Instant, fire: Box<dyn FnOnce() + Send>) {
        let entry = TimerEntry {
            at,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            fire,
        };
        self.pending.lock().push(entry);
        self.notify.notify_one();
    }

    fn run_loop(&self) {
        loop {
            let mut due = Vec::new();
            {
                let mut pending = self.pending.lock();
                loop {
                    let now = Instant::now();
                    match pending.peek() {
                        Some(entry) if entry.at <= now => {
                            if let Some(entry) = pending.pop() {
                                due.push(entry.fire);
                            }
                        }
                        Some(entry) => {
                            if !due.is_empty() {
                                break;
                            }
                            let wait = entry.at - now;
                            self.notify.wait_for(&mut pending, wait);
                        }
                        None => {
                            if !due.is_empty() {
                                break;
                            }
                            self.notify.wait(&mut pending);
                        }
                    }
                }
            }
            // Fired outside the lock so callbacks can schedule more.
            for fire in due {
                fire();
            }
        }
    }
}

static TIMER: LazyLock<Arc<TimerThread>> = LazyLock::new(|| {
    let timer = Arc::new(TimerThread {
        pending: Mutex::new(BinaryHeap::new()),
        notify: Condvar::new(),
        seq: AtomicU64::new(0),
    });
    let runner = timer.clone();
    thread::Builder::new()
        .name("lanes-timer".to_string())
        .spawn(move || runner.run_loop())
        .expect("Failed to spawn timer thread");
    timer
});

/// Run `fire` on the shared timer thread once `delay` has elapsed.
pub(crate) fn schedule(delay: Duration, fire: Box<dyn FnOnce() + Send>) {
    TIMER.schedule(Instant::now() + delay, fire);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let start = Instant::now();
        schedule(
            Duration::from_millis(30),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        while !fired.load(Ordering::SeqCst) {
            assert!(start.elapsed() < Duration::from_secs(5), "timer never fired");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_earlier_deadline_fires_first() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        schedule(
            Duration::from_millis(80),
            Box::new(move || log.lock().push("late")),
        );
        let log = order.clone();
        schedule(
            Duration::from_millis(20),
            Box::new(move || log.lock().push("early")),
        );

        thread::sleep(Duration::from_millis(200));
        assert_eq!(*order.lock(), vec!["early", "late"]);
    }

    #[test]
    fn test_zero_delay_fires_promptly() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        schedule(
            Duration::ZERO,
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        let start = Instant::now();
        while !fired.load(Ordering::SeqCst) {
            assert!(start.elapsed() < Duration::from_secs(5), "timer never fired");
            thread::sleep(Duration::from_millis(1));
        }
    }
}
