//! Background timer driving `after` and friends.
//!
//! A single thread sleeps on a condition variable until the earliest deadline in
//! a min-heap of `(deadline, job)` entries, then runs every expired job.

use crate::queue::{run_job, Job, Queue};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, trace};

struct TimerEntry {
    deadline: Instant,
    generation: u64,
    job: Job,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    next_generation: u64,
}

impl TimerHeap {
    fn insert(&mut self, deadline: Instant, job: Job) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            job,
        });
    }

    fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.deadline)
    }

    fn pop_expired(&mut self, now: Instant) -> Vec<Job> {
        let mut expired = Vec::new();
        while self.peek_deadline().is_some_and(|deadline| deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                expired.push(entry.job);
            }
        }
        expired
    }
}

/// Stand-in deadline for delays the clock cannot add.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

pub(crate) struct Timer {
    heap: Mutex<TimerHeap>,
    wakeup: Condvar,
    /// Jobs whose deadline can never be reached. Kept alive, never run.
    parked: Mutex<Vec<Job>>,
}

static GLOBAL: Lazy<Option<Arc<Timer>>> = Lazy::new(|| match Timer::start("promise-timer") {
    Ok(timer) => Some(timer),
    Err(err) => {
        error!(error = %err, "failed to start timer thread");
        None
    }
});

/// Runs `job` on the timer thread once `delay` has elapsed.
pub(crate) fn schedule(delay: Duration, job: Job) {
    match GLOBAL.as_ref() {
        Some(timer) => timer.schedule(delay, job),
        None => Queue::background().dispatch(move || {
            thread::sleep(delay);
            job()
        }),
    }
}

impl Timer {
    pub(crate) fn start(name: &str) -> io::Result<Arc<Self>> {
        let timer = Arc::new(Self {
            heap: Mutex::new(TimerHeap::default()),
            wakeup: Condvar::new(),
            parked: Mutex::new(Vec::new()),
        });
        let worker = timer.clone();
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker.run())?;
        Ok(timer)
    }

    pub(crate) fn schedule(&self, delay: Duration, job: Job) {
        let now = Instant::now();
        let Some(deadline) = now.checked_add(delay).or_else(|| now.checked_add(FAR_FUTURE)) else {
            // Past what the clock can represent: park the job so it never fires.
            trace!(?delay, "timer deadline out of range, parked");
            self.parked.lock().push(job);
            return;
        };
        let mut heap = self.heap.lock();
        let earliest = heap.peek_deadline().map_or(true, |d| deadline < d);
        heap.insert(deadline, job);
        drop(heap);
        trace!(?delay, "timer scheduled");
        if earliest {
            self.wakeup.notify_one();
        }
    }

    fn run(&self) {
        let mut heap = self.heap.lock();
        loop {
            let expired = heap.pop_expired(Instant::now());
            if !expired.is_empty() {
                drop(heap);
                for job in expired {
                    run_job(job);
                }
                heap = self.heap.lock();
                continue;
            }
            match heap.peek_deadline() {
                Some(deadline) => {
                    self.wakeup.wait_until(&mut heap, deadline);
                }
                None => self.wakeup.wait(&mut heap),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_heap_pops_earliest_first() {
        let mut heap = TimerHeap::default();
        let base = Instant::now();
        let (tx, rx) = channel();
        for ms in [30u64, 10, 20] {
            let tx = tx.clone();
            heap.insert(
                base + Duration::from_millis(ms),
                Box::new(move || tx.send(ms).unwrap()),
            );
        }
        assert_eq!(heap.peek_deadline(), Some(base + Duration::from_millis(10)));
        let expired = heap.pop_expired(base + Duration::from_millis(20));
        assert_eq!(expired.len(), 2);
        for job in expired {
            job();
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![10, 20]);
        assert_eq!(heap.peek_deadline(), Some(base + Duration::from_millis(30)));
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let mut heap = TimerHeap::default();
        let deadline = Instant::now();
        let (tx, rx) = channel();
        for n in 0..5 {
            let tx = tx.clone();
            heap.insert(deadline, Box::new(move || tx.send(n).unwrap()));
        }
        for job in heap.pop_expired(deadline) {
            job();
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_timer_thread_fires_in_deadline_order() {
        let timer = Timer::start("test-timer").unwrap();
        let (tx, rx) = channel();
        for ms in [60u64, 20, 40] {
            let tx = tx.clone();
            timer.schedule(
                Duration::from_millis(ms),
                Box::new(move || tx.send(ms).unwrap()),
            );
        }
        let fired: Vec<u64> = rx.iter().take(3).collect();
        assert_eq!(fired, vec![20, 40, 60]);
    }

    #[test]
    fn test_unreachable_deadlines_never_fire() {
        let timer = Timer::start("test-timer-max").unwrap();
        let (tx, rx) = channel();
        let never = tx.clone();
        timer.schedule(Duration::MAX, Box::new(move || never.send("max").unwrap()));
        timer.schedule(
            Duration::from_millis(5),
            Box::new(move || tx.send("soon").unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("soon"));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_timer_does_not_fire_early() {
        let timer = Timer::start("test-timer-early").unwrap();
        let (tx, rx) = channel();
        let started = Instant::now();
        timer.schedule(
            Duration::from_millis(30),
            Box::new(move || tx.send(Instant::now()).unwrap()),
        );
        let fired = rx.recv().unwrap();
        assert!(fired - started >= Duration::from_millis(30));
    }
}
