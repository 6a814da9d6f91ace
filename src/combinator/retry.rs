use crate::combinator::all;
use crate::config;
use crate::error::Error;
use crate::promise::{catch_panic, Promise};
use crate::queue::Queue;
use crate::resolution::{collect_promises, IntoResolution, Resolution, Thenable};
use crate::resolver::Resolver;
use crate::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

struct Retry<A, D> {
    attempt: A,
    decide: D,
    round: usize,
}

/// Repeats `attempt` until every promise of one round fulfills.
///
/// After a failed round, `decide` gets the error (tagged with the failing
/// index) and picks what happens next:
///
/// * `Ok(())` starts the next round right away;
/// * a `Promise<()>` starts it once that promise fulfills, and gives up if
///   it rejects;
/// * an `Err` or a bare [`Error`] gives up, rejecting with that error.
///
/// Rounds run on the default queue. There is no built-in attempt limit.
///
/// ```
/// use promise_kit::combinator::{delay, retry_until};
/// use promise_kit::Promise;
/// use std::time::Duration;
/// let mut left = 2;
/// let p = retry_until(
///     move || {
///         left -= 1;
///         vec![if left == 0 {
///             Promise::fulfilled("done")
///         } else {
///             Promise::rejected(promise_kit::ErrorCode::TaskError)
///         }]
///     },
///     |_| delay(Duration::from_millis(1)),
/// );
/// assert_eq!(p.wait().unwrap(), vec!["done"]);
/// ```
pub fn retry_until<T, I, A, R, D>(attempt: A, decide: D) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
    A: FnMut() -> I + Send + 'static,
    R: IntoResolution<()>,
    D: FnMut(Error) -> R + Send + 'static,
{
    retry_until_on::<T, I, A, R, D>(&config::default_queue(), attempt, decide)
}

pub fn retry_until_on<T, I, A, R, D>(queue: &Queue, attempt: A, decide: D) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
    A: FnMut() -> I + Send + 'static,
    R: IntoResolution<()>,
    D: FnMut(Error) -> R + Send + 'static,
{
    let (promise, resolver) = Promise::pending();
    let state = Arc::new(Mutex::new(Retry {
        attempt,
        decide,
        round: 0,
    }));
    schedule::<T, I, A, R, D>(queue.clone(), state, resolver);
    promise
}

fn schedule<T, I, A, R, D>(queue: Queue, state: Arc<Mutex<Retry<A, D>>>, resolver: Resolver<Vec<T>>)
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
    A: FnMut() -> I + Send + 'static,
    R: IntoResolution<()>,
    D: FnMut(Error) -> R + Send + 'static,
{
    queue.clone().dispatch(move || run_round::<T, I, A, R, D>(queue, state, resolver));
}

fn run_round<T, I, A, R, D>(queue: Queue, state: Arc<Mutex<Retry<A, D>>>, resolver: Resolver<Vec<T>>)
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
    A: FnMut() -> I + Send + 'static,
    R: IntoResolution<()>,
    D: FnMut(Error) -> R + Send + 'static,
{
    let started = catch_panic(|| {
        let mut state = state.lock();
        state.round += 1;
        trace!(round = state.round, "starting retry round");
        collect_promises::<T, I>((state.attempt)())
    });
    let promises = match started {
        Ok(promises) => promises,
        Err(error) => return resolver.reject(error),
    };
    let next = queue.clone();
    all::<T, _>(promises).subscribe_on(&queue, move |outcome| {
        let error = match outcome {
            Ok(values) => return resolver.fulfill(values),
            Err(error) => error,
        };
        let decision = catch_panic(|| (state.lock().decide)(error).into_resolution());
        match decision {
            Ok(Resolution::Fulfill(())) => schedule::<T, I, A, R, D>(next, state, resolver),
            Ok(Resolution::Follow(gate)) => {
                let queue = next.clone();
                gate.subscribe_on(&next, move |outcome| match outcome {
                    Ok(()) => schedule::<T, I, A, R, D>(queue, state, resolver),
                    Err(error) => resolver.reject(error),
                });
            }
            Ok(Resolution::Reject(error)) | Err(error) => resolver.reject(error),
        }
    });
}
