//! Execution contexts for continuations.
//!
//! A [`Queue`] wraps any [`Dispatcher`]. The serial and concurrent queues are
//! backed by a multi-producer channel: the queue handle owns the sender and the
//! worker threads drain the receiver, so jobs start in submission order.
//! Dropping the last handle of a queue closes the channel and lets its workers
//! exit once the backlog is drained.
//!
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc,
    },
    thread,
};
use tracing::{error, trace, warn};

/// A unit of work submitted to a [`Dispatcher`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Anything that can run jobs: a thread, a pool, a host event loop.
///
/// Jobs submitted to the same dispatcher should run in submission order
/// if the dispatcher is serial; different dispatchers may run concurrently.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, job: Job);

    fn label(&self) -> &str {
        "anonymous"
    }
}

/// A cloneable handle to an execution context.
#[derive(Clone)]
pub struct Queue {
    dispatcher: Arc<dyn Dispatcher>,
}

static BACKGROUND: Lazy<Queue> = Lazy::new(|| {
    let workers = thread::available_parallelism().map_or(4, |n| n.get());
    Queue::concurrent("promise-background", workers).unwrap_or_else(|err| {
        error!(error = %err, "failed to start background queue, running inline");
        Queue::current_thread()
    })
});

impl Queue {
    /// One named worker thread; jobs run one at a time in submission order.
    pub fn serial(label: impl Into<String>) -> io::Result<Self> {
        let label = label.into();
        let (sender, receiver) = channel::<Job>();
        thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                for job in receiver {
                    run_job(job);
                }
            })?;
        Ok(Self::from_dispatcher(ChannelQueue {
            label,
            sender: Mutex::new(sender),
        }))
    }

    /// `workers` threads sharing one FIFO; jobs start in submission order
    /// but may run concurrently.
    pub fn concurrent(label: impl Into<String>, workers: usize) -> io::Result<Self> {
        let label = label.into();
        let (sender, receiver) = channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        for n in 0..workers.max(1) {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{label}-{n}"))
                .spawn(move || drain_shared(&receiver))?;
        }
        Ok(Self::from_dispatcher(ChannelQueue {
            label,
            sender: Mutex::new(sender),
        }))
    }

    /// Runs every job inline on the dispatching thread.
    pub fn current_thread() -> Self {
        Self::from_dispatcher(CurrentThread)
    }

    /// The shared concurrent queue used by `then_in_background`.
    pub fn background() -> Self {
        BACKGROUND.clone()
    }

    pub fn from_dispatcher<D: Dispatcher>(dispatcher: D) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        trace!(queue = self.label(), "dispatching job");
        self.dispatcher.dispatch(Box::new(f));
    }

    pub fn label(&self) -> &str {
        self.dispatcher.label()
    }

    /// Whether both handles refer to the same context.
    pub fn same_as(&self, other: &Queue) -> bool {
        Arc::ptr_eq(&self.dispatcher, &other.dispatcher)
    }
}

impl Default for Queue {
    /// The configured default queue, see [`crate::config::default_queue`].
    fn default() -> Self {
        crate::config::default_queue()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("label", &self.label()).finish()
    }
}

struct ChannelQueue {
    label: String,
    sender: Mutex<Sender<Job>>,
}

impl Dispatcher for ChannelQueue {
    fn dispatch(&self, job: Job) {
        if self.sender.lock().send(job).is_err() {
            // The dropped job releases its resolver, which rejects the promise.
            warn!(queue = %self.label, "queue workers are gone, job dropped");
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

struct CurrentThread;

thread_local! {
    /// Jobs dispatched inline while this thread is already running one.
    static INLINE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Clears the inline backlog when the outermost inline job returns or unwinds.
struct InlineDrain;

impl Drop for InlineDrain {
    fn drop(&mut self) {
        // Taken out first: dropping a leftover job may dispatch again.
        let leftover = INLINE.with(|inline| inline.borrow_mut().take());
        drop(leftover);
    }
}

impl Dispatcher for CurrentThread {
    /// Runs `job` now, unless this thread is already inside an inline job. A
    /// nested job is queued and run by the outermost call once the current one
    /// returns, so chains of inline resolutions never grow the stack.
    fn dispatch(&self, job: Job) {
        let job = INLINE.with(|inline| {
            let mut inline = inline.borrow_mut();
            match inline.as_mut() {
                Some(backlog) => {
                    backlog.push_back(job);
                    None
                }
                None => {
                    *inline = Some(VecDeque::new());
                    Some(job)
                }
            }
        });
        let Some(job) = job else { return };
        let _drain = InlineDrain;
        job();
        while let Some(job) =
            INLINE.with(|inline| inline.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        {
            job();
        }
    }

    fn label(&self) -> &str {
        "current-thread"
    }
}

fn drain_shared(receiver: &Mutex<Receiver<Job>>) {
    loop {
        let job = receiver.lock().recv();
        match job {
            Ok(job) => run_job(job),
            Err(_) => break,
        }
    }
}

/// Runs `job`, logging instead of unwinding if it panics.
pub(crate) fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(
            thread = thread::current().name().unwrap_or("unnamed"),
            "job panicked on queue worker"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_serial_queue_preserves_submission_order() {
        let queue = Queue::serial("test-serial").unwrap();
        let (tx, rx) = channel();
        for n in 0..100 {
            let tx = tx.clone();
            queue.dispatch(move || tx.send(n).unwrap());
        }
        let seen: Vec<i32> = rx.iter().take(100).collect();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_serial_queue_runs_on_its_named_thread() {
        let queue = Queue::serial("named-worker").unwrap();
        let (tx, rx) = channel();
        queue.dispatch(move || {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-worker"));
        assert_eq!(queue.label(), "named-worker");
    }

    #[test]
    fn test_concurrent_queue_runs_jobs_in_parallel() {
        let queue = Queue::concurrent("test-pool", 2).unwrap();
        let (tx, rx) = channel();
        let (release_tx, release_rx) = channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        // The first job blocks until the second one has run.
        {
            let tx = tx.clone();
            let release_rx = release_rx.clone();
            queue.dispatch(move || {
                release_rx.lock().recv_timeout(Duration::from_secs(5)).unwrap();
                tx.send("first").unwrap();
            });
        }
        queue.dispatch(move || {
            tx.send("second").unwrap();
            release_tx.send(()).unwrap();
        });
        let order: Vec<&str> = rx.iter().take(2).collect();
        assert_eq!(order, vec!["second", "first"]);
    }

    #[test]
    fn test_a_panicking_job_does_not_kill_the_worker() {
        let queue = Queue::serial("test-panics").unwrap();
        queue.dispatch(|| panic!("job failure"));
        let (tx, rx) = channel();
        queue.dispatch(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn test_current_thread_defers_nested_jobs() {
        let queue = Queue::current_thread();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (outer, nested) = (order.clone(), order.clone());
        let inner_queue = queue.clone();
        queue.dispatch(move || {
            inner_queue.dispatch(move || nested.lock().push("nested"));
            outer.lock().push("outer");
        });
        assert_eq!(*order.lock(), vec!["outer", "nested"]);
    }

    #[test]
    fn test_current_thread_nesting_does_not_grow_the_stack() {
        fn relay(queue: Queue, left: usize, done: Arc<Mutex<usize>>) {
            if left == 0 {
                return;
            }
            *done.lock() += 1;
            queue.clone().dispatch(move || relay(queue, left - 1, done));
        }
        let done = Arc::new(Mutex::new(0));
        relay(Queue::current_thread(), 200_000, done.clone());
        assert_eq!(*done.lock(), 200_000);
    }

    #[test]
    fn test_current_thread_runs_inline() {
        let queue = Queue::current_thread();
        let flag = Arc::new(Mutex::new(false));
        let inner = flag.clone();
        queue.dispatch(move || *inner.lock() = true);
        assert!(*flag.lock());
        assert!(queue.same_as(&queue.clone()));
        assert!(!queue.same_as(&Queue::current_thread()));
    }
}
