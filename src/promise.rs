//! The `Promise` handle and its chaining operations.
//!
//! Every chaining operation registers a handler on the receiver's cell and
//! returns a new dependent promise. Continuations always run on a [`Queue`]:
//! the configured default queue unless an explicit one is passed to an `*_on`
//! variant. Handlers registered after resolution are still dispatched, never
//! run inline on the registering thread.

use crate::cell::{Cell, Handler};
use crate::combinator::{after, all};
use crate::config::{self, CatchPolicy};
use crate::error::{Error, ErrorCode};
use crate::manifold::Manifold;
use crate::queue::Queue;
use crate::resolution::IntoResolution;
use crate::resolver::Resolver;
use crate::{Outcome, Value};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// A handle to the eventual outcome of an asynchronous operation.
///
/// Handles are cheap to clone; all clones observe the same resolution.
///
/// # Examples
///
/// ```
/// use promise_kit::Promise;
/// let promise = Promise::fulfilled(1)
///     .map(|x| x + 1)
///     .then(|x| Ok(x * 10));
/// assert_eq!(promise.wait().unwrap(), 20);
/// ```
pub struct Promise<T: Value> {
    cell: Arc<Cell<T>>,
}

/// Runs `f`, turning a panic into an unhandled-exception rejection.
pub(crate) fn catch_panic<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Error::from_panic)
}

impl<T: Value> Promise<T> {
    /// Starts an operation, handing it the resolver of the returned promise.
    ///
    /// `body` runs synchronously on the calling thread. A panic inside it
    /// rejects the promise.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let (promise, resolver) = Self::pending();
        let guard = resolver.clone();
        if let Err(error) = catch_panic(move || body(resolver)) {
            guard.reject(error);
        }
        promise
    }

    /// A pending promise and the resolver that settles it.
    pub fn pending() -> (Self, Resolver<T>) {
        let cell = Arc::new(Cell::pending());
        let resolver = Resolver::new(cell.clone());
        (Self { cell }, resolver)
    }

    pub fn fulfilled(value: T) -> Self {
        Self::from_outcome(Ok(value))
    }

    pub fn rejected(error: impl Into<Error>) -> Self {
        Self::from_outcome(Err(error.into()))
    }

    pub fn from_outcome(outcome: Outcome<T>) -> Self {
        Self {
            cell: Arc::new(Cell::resolved(outcome)),
        }
    }

    /// Runs `f` on the default queue and settles with whatever it returns.
    pub fn spawn<R, F>(f: F) -> Self
    where
        R: IntoResolution<T>,
        F: FnOnce() -> R + Send + 'static,
    {
        Self::spawn_on(&config::default_queue(), f)
    }

    pub fn spawn_on<R, F>(queue: &Queue, f: F) -> Self
    where
        R: IntoResolution<T>,
        F: FnOnce() -> R + Send + 'static,
    {
        let (promise, resolver) = Self::pending();
        queue.dispatch(move || resolver.settle(catch_panic(f)));
        promise
    }

    pub(crate) fn cell(&self) -> &Arc<Cell<T>> {
        &self.cell
    }

    pub fn is_pending(&self) -> bool {
        self.cell.is_pending()
    }

    pub fn is_resolved(&self) -> bool {
        !self.cell.is_pending()
    }

    pub fn is_fulfilled(&self) -> bool {
        self.cell.is_fulfilled()
    }

    pub fn is_rejected(&self) -> bool {
        self.cell.is_rejected()
    }

    /// The fulfilled value, `None` while pending or if rejected.
    pub fn value(&self) -> Option<T> {
        self.cell.outcome().and_then(Result::ok)
    }

    /// The rejection, if any. Reading it counts as handling it.
    pub fn error(&self) -> Option<Error> {
        let error = self.cell.outcome().and_then(Result::err);
        if error.is_some() {
            self.cell.mark_observed();
        }
        error
    }

    /// The outcome once resolved. Like [`error`](Self::error), reading a
    /// rejection this way counts as handling it.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        let outcome = self.cell.outcome();
        if matches!(outcome, Some(Err(_))) {
            self.cell.mark_observed();
        }
        outcome
    }

    /// Blocks the calling thread until the promise resolves.
    ///
    /// Meant for tests and debugging. Calling it from the context that must run
    /// the continuation resolving this promise deadlocks.
    pub fn wait(&self) -> Outcome<T> {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        let (tx, rx) = channel();
        self.cell.register(Handler::inline(move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx.recv().unwrap_or_else(|_| {
            Err(Error::with_message(
                ErrorCode::Unexpected,
                "promise dropped its handlers without resolving",
            ))
        })
    }

    /// Runs `f` with the value once fulfilled; rejections pass through.
    pub fn then<U, R, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        R: IntoResolution<U>,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.then_on(&config::default_queue(), f)
    }

    pub fn then_in_background<U, R, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        R: IntoResolution<U>,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.then_on(&Queue::background(), f)
    }

    pub fn then_on<U, R, F>(&self, queue: &Queue, f: F) -> Promise<U>
    where
        U: Value,
        R: IntoResolution<U>,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.chain(queue, move |outcome, next| match outcome {
            Ok(value) => next.settle(catch_panic(move || f(value))),
            Err(error) => next.reject(error),
        })
    }

    /// Like [`then`](Self::then) for continuations that cannot fail.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_on(&config::default_queue(), f)
    }

    pub fn map_on<U, F>(&self, queue: &Queue, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then_on(queue, move |value| Ok::<U, Error>(f(value)))
    }

    /// Consumes the value at the end of a chain; rejections pass through.
    pub fn done<F>(&self, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.done_on(&config::default_queue(), f)
    }

    pub fn done_on<F>(&self, queue: &Queue, f: F) -> Promise<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.map_on(queue, f)
    }

    /// Inspects the fulfilled value, then passes it on unchanged.
    pub fn get<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.get_on(&config::default_queue(), f)
    }

    pub fn get_on<F>(&self, queue: &Queue, f: F) -> Promise<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.map_on(queue, move |value| {
            f(&value);
            value
        })
    }

    /// Inspects the outcome, whichever it is, then passes it on unchanged.
    ///
    /// The dependent promise carries a rejection further, so tapping does not
    /// count as handling it.
    pub fn tap<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.tap_on(&config::default_queue(), f)
    }

    pub fn tap_on<F>(&self, queue: &Queue, f: F) -> Promise<T>
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        self.chain(queue, move |outcome, next| match catch_panic(|| f(&outcome)) {
            Ok(()) => next.resolve(outcome),
            Err(error) => next.reject(error),
        })
    }

    /// Runs `f` with the rejection, settling the dependent promise with its
    /// result; values pass through. Uses the configured [`CatchPolicy`].
    pub fn recover<R, F>(&self, f: F) -> Promise<T>
    where
        R: IntoResolution<T>,
        F: FnOnce(Error) -> R + Send + 'static,
    {
        self.recover_with(config::catch_policy(), &config::default_queue(), f)
    }

    pub fn recover_on<R, F>(&self, queue: &Queue, f: F) -> Promise<T>
    where
        R: IntoResolution<T>,
        F: FnOnce(Error) -> R + Send + 'static,
    {
        self.recover_with(config::catch_policy(), queue, f)
    }

    pub fn recover_with<R, F>(&self, policy: CatchPolicy, queue: &Queue, f: F) -> Promise<T>
    where
        R: IntoResolution<T>,
        F: FnOnce(Error) -> R + Send + 'static,
    {
        self.chain(queue, move |outcome, next| match outcome {
            Ok(value) => next.fulfill(value),
            Err(error) if policy.handles(&error) => next.settle(catch_panic(move || f(error))),
            Err(error) => next.reject(error),
        })
    }

    /// Handles a rejection at the end of a chain.
    ///
    /// The returned promise fulfills with `()` once the receiver fulfills or
    /// `f` has run. Errors the policy skips are forwarded.
    pub fn catch<F>(&self, f: F) -> Promise<()>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.catch_with(config::catch_policy(), &config::default_queue(), f)
    }

    pub fn catch_on<F>(&self, queue: &Queue, f: F) -> Promise<()>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.catch_with(config::catch_policy(), queue, f)
    }

    pub fn catch_with<F>(&self, policy: CatchPolicy, queue: &Queue, f: F) -> Promise<()>
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.chain(queue, move |outcome, next| match outcome {
            Ok(_) => next.fulfill(()),
            Err(error) if policy.handles(&error) => {
                next.resolve(catch_panic(move || f(error)));
            }
            Err(error) => next.reject(error),
        })
    }

    /// Runs `f` whatever the outcome, then forwards that outcome.
    pub fn ensure<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_on(&config::default_queue(), f)
    }

    pub fn ensure_on<F>(&self, queue: &Queue, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.chain(queue, move |outcome, next| match catch_panic(f) {
            Ok(()) => next.resolve(outcome),
            Err(error) => next.reject(error),
        })
    }

    /// Waits `duration` after fulfillment, then fulfills with the value and the
    /// time actually paused.
    pub fn pause(&self, duration: Duration) -> Promise<Manifold<T, Duration>> {
        self.then_on(&Queue::current_thread(), move |value| {
            after(duration).map_on(&Queue::current_thread(), move |elapsed| {
                Manifold::pair(value, elapsed)
            })
        })
    }

    /// Drops the value, keeping only success or failure.
    pub fn discard(&self) -> Promise<()> {
        self.map_on(&Queue::current_thread(), |_| ())
    }

    /// Forwards the outcome into `resolver` as soon as it is known.
    pub(crate) fn pipe_to(&self, resolver: Resolver<T>) {
        self.subscribe(move |outcome| resolver.resolve(outcome));
    }

    /// Internal observer run on the resolving thread.
    pub(crate) fn subscribe<F>(&self, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.cell.register(Handler::inline(f));
    }

    pub(crate) fn subscribe_on<F>(&self, queue: &Queue, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.cell.register(Handler::new(queue.clone(), f));
    }

    fn chain<U, F>(&self, queue: &Queue, body: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(Outcome<T>, Resolver<U>) + Send + 'static,
    {
        let (next, resolver) = Promise::pending();
        self.subscribe_on(queue, move |outcome| body(outcome, resolver));
        next
    }
}

/// Element-wise operations on a promised sequence.
impl<T: Value> Promise<Vec<T>> {
    /// Transforms every element.
    pub fn map_values<U, F>(&self, f: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.map_values_on(&config::default_queue(), f)
    }

    pub fn map_values_on<U, F>(&self, queue: &Queue, f: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T) -> U + Send + 'static,
    {
        self.map_on(queue, move |values| values.into_iter().map(f).collect())
    }

    /// Starts one promise per element and fulfills with all their values, in
    /// order, like [`all`](crate::combinator::all).
    pub fn then_map<U, F>(&self, f: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T) -> Promise<U> + Send + 'static,
    {
        self.then_map_on(&config::default_queue(), f)
    }

    pub fn then_map_on<U, F>(&self, queue: &Queue, f: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T) -> Promise<U> + Send + 'static,
    {
        self.then_on(queue, move |values| {
            all::<U, _>(values.into_iter().map(f).collect::<Vec<_>>())
        })
    }

    /// Transforms every element, dropping those mapped to `None`.
    pub fn compact_map<U, F>(&self, f: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        self.compact_map_on(&config::default_queue(), f)
    }

    pub fn compact_map_on<U, F>(&self, queue: &Queue, f: F) -> Promise<Vec<U>>
    where
        U: Value,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        self.map_on(queue, move |values| values.into_iter().filter_map(f).collect())
    }

    /// Keeps the elements matching `keep`.
    pub fn filter_values<F>(&self, keep: F) -> Promise<Vec<T>>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.filter_values_on(&config::default_queue(), keep)
    }

    pub fn filter_values_on<F>(&self, queue: &Queue, keep: F) -> Promise<Vec<T>>
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        self.map_on(queue, move |values| values.into_iter().filter(keep).collect())
    }
}

impl<A, B, C> Promise<Manifold<A, B, C>>
where
    Manifold<A, B, C>: Value,
{
    /// The first component of a fulfilled manifold.
    pub fn primary_value(&self) -> Option<A> {
        self.value().map(Manifold::into_primary)
    }
}

impl<T: Value> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Value> From<Outcome<T>> for Promise<T> {
    fn from(outcome: Outcome<T>) -> Self {
        Self::from_outcome(outcome)
    }
}

impl<T: Value> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("cell", &self.cell).finish()
    }
}

impl<T: Value> Future for Promise<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.cell.poll(cx.waker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_utils::init_test_logging;
    use futures::executor::block_on;
    use std::thread;

    #[test]
    fn test_chained_values_flow_through() {
        init_test_logging();
        let p = Promise::fulfilled(1).then(|x| Ok(x + 1)).then(|x| Ok(x * 10));
        assert_eq!(p.wait().unwrap(), 20);
    }

    #[test]
    fn test_then_flattens_returned_promises() {
        init_test_logging();
        let p = Promise::fulfilled(1)
            .then(|x| after(Duration::from_millis(10)).map(move |_| x + 100));
        assert_eq!(p.wait().unwrap(), 101);
    }

    #[test]
    fn test_rejection_skips_then_and_reaches_recover() {
        init_test_logging();
        let (tx, rx) = channel();
        let p = Promise::<i32>::rejected(ErrorCode::AccessDenied)
            .then(move |x| {
                tx.send(x).unwrap();
                Ok(x)
            })
            .recover(|e| {
                assert_eq!(e.code(), ErrorCode::AccessDenied);
                Ok(-1)
            });
        assert_eq!(p.wait().unwrap(), -1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_recover_passes_values_forward() {
        let p = Promise::fulfilled("kept").recover(|_| Ok("replaced"));
        assert_eq!(p.wait().unwrap(), "kept");
    }

    #[test]
    fn test_panicking_continuation_rejects_dependent() {
        init_test_logging();
        let p = Promise::fulfilled(3).then(|_| -> Outcome<i32> { panic!("bad input") });
        let error = p.wait().unwrap_err();
        assert_eq!(error.code(), ErrorCode::UNHANDLED_EXCEPTION);
        assert_eq!(error.underlying_exception(), Some("bad input"));
    }

    #[test]
    fn test_panicking_body_rejects_promise() {
        let p = Promise::<()>::new(|_| panic!("start failed"));
        assert_eq!(p.error().unwrap().underlying_exception(), Some("start failed"));
    }

    #[test]
    fn test_continuations_never_run_inline() {
        let queue = Queue::serial("not-inline").unwrap();
        let caller = thread::current().id();
        let p = Promise::fulfilled(()).then_on(&queue, move |_| {
            Ok(thread::current().id() != caller)
        });
        assert!(p.wait().unwrap());
    }

    #[test]
    fn test_default_queue_is_used_when_none_given() {
        let p = Promise::fulfilled(()).map(|_| thread::current().name().map(str::to_owned));
        let expected = config::default_queue().label().to_owned();
        assert_eq!(p.wait().unwrap().as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_ensure_runs_on_both_outcomes() {
        let (tx, rx) = channel();
        let tx2 = tx.clone();
        let ok = Promise::fulfilled(1).ensure(move || tx.send("ok").unwrap());
        let err = Promise::<i32>::rejected(ErrorCode::TaskError)
            .ensure(move || tx2.send("err").unwrap());
        assert_eq!(ok.wait().unwrap(), 1);
        assert_eq!(err.wait().unwrap_err().code(), ErrorCode::TaskError);
        let mut ran: Vec<&str> = rx.try_iter().collect();
        ran.sort_unstable();
        assert_eq!(ran, vec!["err", "ok"]);
    }

    #[test]
    fn test_catch_skips_cancellation_by_default() {
        let (tx, rx) = channel();
        let done = Promise::<()>::rejected(Error::cancelled()).catch(move |e| tx.send(e).unwrap());
        assert!(done.wait().unwrap_err().is_cancelled());
        assert!(rx.try_recv().is_err());

        let (tx, rx) = channel();
        let done = Promise::<()>::rejected(Error::cancelled()).catch_with(
            CatchPolicy::AllErrors,
            &Queue::background(),
            move |e| tx.send(e).unwrap(),
        );
        done.wait().unwrap();
        assert!(rx.recv().unwrap().is_cancelled());
    }

    #[test]
    fn test_pause_pipes_value_and_duration() {
        let p = Promise::fulfilled("v").pause(Duration::from_millis(15));
        let Manifold(value, paused, ()) = p.wait().unwrap();
        assert_eq!(value, "v");
        assert!(paused >= Duration::from_millis(15));
        assert_eq!(p.primary_value(), Some("v"));
    }

    #[test]
    fn test_spawn_runs_on_requested_queue() {
        let queue = Queue::serial("spawned").unwrap();
        let p = Promise::spawn_on(&queue, || {
            Ok::<_, Error>(thread::current().name().map(str::to_owned))
        });
        assert_eq!(p.wait().unwrap().as_deref(), Some("spawned"));
        let failed = Promise::<()>::spawn(|| Error::new(ErrorCode::TaskError));
        assert_eq!(failed.wait().unwrap_err().code(), ErrorCode::TaskError);
    }

    #[test]
    fn test_promise_is_a_future() {
        let (promise, resolver) = Promise::<String>::pending();
        let waiter = promise.clone();
        let task = thread::spawn(move || block_on(waiter));
        resolver.fulfill("🍓".into());
        assert_eq!(task.join().expect("The task thread has panicked").unwrap(), "🍓");
        assert_eq!(block_on(promise).unwrap(), "🍓");
    }

    #[test]
    fn test_done_get_and_tap_pass_outcomes_along() {
        let (tx, rx) = channel();
        let seen = tx.clone();
        let p = Promise::fulfilled(6)
            .get(move |v| seen.send(format!("get {v}")).unwrap())
            .tap(move |o| tx.send(format!("tap {o:?}")).unwrap());
        assert_eq!(p.wait().unwrap(), 6);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["get 6", "tap Ok(6)"]);

        let (tx, rx) = channel();
        let tapped = Promise::<i32>::rejected(ErrorCode::TaskError)
            .tap(move |o| tx.send(o.is_err()).unwrap());
        assert_eq!(tapped.wait().unwrap_err().code(), ErrorCode::TaskError);
        assert_eq!(rx.recv().unwrap(), true);

        let (tx, rx) = channel();
        Promise::fulfilled("last").done(move |v| tx.send(v).unwrap()).wait().unwrap();
        assert_eq!(rx.recv().unwrap(), "last");
        let skipped = Promise::<&str>::rejected(ErrorCode::Unknown).done(|_| unreachable!());
        assert_eq!(skipped.wait().unwrap_err().code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_sequence_helpers_work_element_wise() {
        let numbers = Promise::fulfilled(vec![1, 2, 3, 4]);
        assert_eq!(numbers.map_values(|n| n * 2).wait().unwrap(), vec![2, 4, 6, 8]);
        assert_eq!(numbers.filter_values(|n| n % 2 == 0).wait().unwrap(), vec![2, 4]);
        let odd_halves = numbers.compact_map(|n| (n % 2 == 1).then(|| n * 10));
        assert_eq!(odd_halves.wait().unwrap(), vec![10, 30]);
        let delayed = numbers.then_map(|n| after(Duration::from_millis(5)).map(move |_| n + 1));
        assert_eq!(delayed.wait().unwrap(), vec![2, 3, 4, 5]);

        let failing = numbers.then_map(|n| {
            if n == 3 {
                Promise::rejected(ErrorCode::OperationFailed)
            } else {
                Promise::fulfilled(n)
            }
        });
        assert_eq!(failing.wait().unwrap_err().failing_index(), Some(2));
    }

    #[test]
    fn test_long_flattened_chains_do_not_overflow() {
        fn count(n: u64) -> Promise<u64> {
            if n == 0 {
                after(Duration::from_millis(20)).map(|_| 0)
            } else {
                Promise::fulfilled(n).then(move |n| count(n - 1))
            }
        }
        assert_eq!(count(100_000).wait().unwrap(), 0);
    }

    #[test]
    fn test_queries_reflect_state() {
        let (p, r) = Promise::<u8>::pending();
        assert!(p.is_pending() && !p.is_resolved());
        assert_eq!(p.value(), None);
        r.fulfill(9);
        assert!(p.is_fulfilled() && !p.is_rejected() && p.is_resolved());
        assert_eq!(p.value(), Some(9));
        assert_eq!(p.outcome(), Some(Ok(9)));
        assert!(format!("{p:?}").contains("fulfilled"));
    }
}
