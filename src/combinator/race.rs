use crate::combinator::after;
use crate::error::{Error, ErrorCode, Info, UNDERLYING_ERRORS_KEY};
use crate::promise::Promise;
use crate::resolution::{collect_promises, Thenable};
use crate::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn empty_race<T: Value>() -> Promise<T> {
    Promise::rejected(Error::with_message(
        ErrorCode::InvalidUsage,
        "cannot race an empty set of promises",
    ))
}

/// Settles like whichever input settles first.
///
/// Inputs already settled when `race` is called are taken in input order.
pub fn race<T, I>(inputs: I) -> Promise<T>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
{
    let promises = collect_promises(inputs);
    if promises.is_empty() {
        return empty_race();
    }
    let (winner, resolver) = Promise::pending();
    for promise in &promises {
        promise.pipe_to(resolver.clone());
    }
    winner
}

/// Fulfills like the first input to fulfill.
///
/// Once every input has rejected, rejects with `NoWinner`; the individual
/// rejections are kept in input order under [`UNDERLYING_ERRORS_KEY`].
pub fn race_fulfilled<T, I>(inputs: I) -> Promise<T>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
{
    let promises = collect_promises(inputs);
    if promises.is_empty() {
        return empty_race();
    }
    let (winner, resolver) = Promise::pending();
    let failures = Arc::new(Mutex::new((vec![None; promises.len()], promises.len())));
    for (index, promise) in promises.iter().enumerate() {
        let failures = failures.clone();
        let resolver = resolver.clone();
        promise.subscribe(move |outcome| match outcome {
            Ok(value) => resolver.fulfill(value),
            Err(error) => {
                let mut failures = failures.lock();
                let (errors, remaining) = &mut *failures;
                errors[index] = Some(error);
                *remaining -= 1;
                if *remaining == 0 {
                    let errors: Vec<Error> = errors.drain(..).flatten().collect();
                    drop(failures);
                    resolver.reject(
                        Error::with_message(ErrorCode::NoWinner, "every raced promise rejected")
                            .with_info(UNDERLYING_ERRORS_KEY, Info::Errors(errors)),
                    );
                }
            }
        });
    }
    winner
}

/// Mirrors `promise`, unless `duration` passes first, in which case the
/// result rejects with `OperationCancelled`. `promise` itself is left running.
pub fn timeout<T: Value>(promise: &Promise<T>, duration: Duration) -> Promise<T> {
    let (guarded, resolver) = Promise::pending();
    promise.pipe_to(resolver.clone());
    after(duration).subscribe(move |_| {
        resolver.reject(Error::with_message(
            ErrorCode::OperationCancelled,
            format!("timed out after {duration:?}"),
        ))
    });
    guarded
}
