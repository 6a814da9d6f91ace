use crate::error::{Error, ErrorCode, Info, FAILING_INDEX_KEY};
use crate::promise::Promise;
use crate::queue::Queue;
use crate::resolution::{collect_promises, Thenable};
use crate::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

/// Fulfills with every input's value, in input order, once all have fulfilled.
///
/// Rejects as soon as any input rejects, with that input's error supplemented
/// with [`FAILING_INDEX_KEY`]. An empty input fulfills with an empty vector.
pub fn all<T, I>(inputs: I) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
{
    let promises = collect_promises(inputs);
    if promises.is_empty() {
        return Promise::fulfilled(Vec::new());
    }
    let (aggregate, resolver) = Promise::pending();
    let gather = Arc::new(Mutex::new(Gather {
        slots: vec![None; promises.len()],
        remaining: promises.len(),
    }));
    for (index, promise) in promises.iter().enumerate() {
        let gather = gather.clone();
        let resolver = resolver.clone();
        promise.subscribe(move |outcome| match outcome {
            Ok(value) => {
                let mut gather = gather.lock();
                gather.slots[index] = Some(value);
                gather.remaining -= 1;
                if gather.remaining == 0 {
                    let values = gather.slots.drain(..).flatten().collect();
                    drop(gather);
                    resolver.fulfill(values);
                }
            }
            Err(error) => resolver.reject(error.with_info(FAILING_INDEX_KEY, Info::Index(index))),
        });
    }
    aggregate
}

/// The single-input form of [`all`]: same semantics, unwrapped result.
pub fn when<T: Value>(input: impl Into<Thenable<T>>) -> Promise<T> {
    let (promise, resolver) = Promise::pending();
    input.into().into_promise().subscribe(move |outcome| {
        resolver.resolve(outcome.map_err(|e| e.with_info(FAILING_INDEX_KEY, Info::Index(0))))
    });
    promise
}

/// [`all`] over two promises of different types.
pub fn all2<A: Value, B: Value>(a: Promise<A>, b: Promise<B>) -> Promise<(A, B)> {
    let gate = all::<(), _>([a.discard(), b.discard()]);
    gate.then_on(&Queue::current_thread(), move |_| {
        Ok::<_, Error>((settled(&a)?, settled(&b)?))
    })
}

/// [`all`] over three promises of different types.
pub fn all3<A: Value, B: Value, C: Value>(
    a: Promise<A>,
    b: Promise<B>,
    c: Promise<C>,
) -> Promise<(A, B, C)> {
    let gate = all::<(), _>([a.discard(), b.discard(), c.discard()]);
    gate.then_on(&Queue::current_thread(), move |_| {
        Ok::<_, Error>((settled(&a)?, settled(&b)?, settled(&c)?))
    })
}

fn settled<T: Value>(promise: &Promise<T>) -> Outcome<T> {
    promise.outcome().unwrap_or_else(|| {
        Err(Error::with_message(
            ErrorCode::Unexpected,
            "aggregate input still pending after the gate fulfilled",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::after;
    use std::time::Duration;

    #[test]
    fn test_empty_input_fulfills_immediately() {
        let p = all::<i32, _>(Vec::<Promise<i32>>::new());
        assert!(p.is_fulfilled());
        assert_eq!(p.wait().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_results_keep_input_order() {
        let slow = after(Duration::from_millis(30)).map(|_| "slow");
        let fast = after(Duration::from_millis(1)).map(|_| "fast");
        let p = all::<&str, _>(vec![
            Thenable::from(slow),
            Thenable::Value("bare"),
            Thenable::from(fast),
        ]);
        assert_eq!(p.wait().unwrap(), vec!["slow", "bare", "fast"]);
    }

    #[test]
    fn test_first_rejection_is_tagged_with_its_index() {
        let error = Error::with_message(ErrorCode::AccessDenied, "E");
        let (pending, _keep) = Promise::<i32>::pending();
        let p = all::<i32, _>(vec![
            Promise::fulfilled(1),
            Promise::rejected(error.clone()),
            pending,
        ]);
        let rejection = p.wait().unwrap_err();
        assert_eq!(rejection, error.with_info(FAILING_INDEX_KEY, Info::Index(1)));
    }

    #[test]
    fn test_when_unwraps_single_input() {
        assert_eq!(when(Thenable::Value(7)).wait().unwrap(), 7);
        assert_eq!(when(Promise::fulfilled("x")).wait().unwrap(), "x");
        let error = when(Promise::<()>::rejected(ErrorCode::TaskError)).wait().unwrap_err();
        assert_eq!(error.failing_index(), Some(0));
    }

    #[test]
    fn test_heterogeneous_forms() {
        let p = all2(Promise::fulfilled(1u8), Promise::fulfilled("two"));
        assert_eq!(p.wait().unwrap(), (1, "two"));
        let p = all3(
            Promise::fulfilled(1u8),
            Promise::<String>::rejected(ErrorCode::OperationFailed),
            Promise::fulfilled(3.0f64),
        );
        let error = p.wait().unwrap_err();
        assert_eq!(error.code(), ErrorCode::OperationFailed);
        assert_eq!(error.failing_index(), Some(1));
    }
}
