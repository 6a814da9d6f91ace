use crate::error::{Error, ErrorCode, Info, JOIN_PROMISES_KEY};
use crate::manifold::Manifold;
use crate::promise::Promise;
use crate::queue::Queue;
use crate::resolution::{collect_promises, Thenable};
use crate::{Outcome, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Every outcome in input order, the fulfilled values, and the rejections if any.
pub type Joined<T> = Manifold<Vec<Outcome<T>>, Vec<T>, Option<Vec<Error>>>;

struct Settle<T> {
    slots: Vec<Option<Outcome<T>>>,
    remaining: usize,
}

fn settle_all<T: Value>(promises: Vec<Promise<T>>) -> Promise<Vec<Outcome<T>>> {
    if promises.is_empty() {
        return Promise::fulfilled(Vec::new());
    }
    let (aggregate, resolver) = Promise::pending();
    let settle = Arc::new(Mutex::new(Settle {
        slots: vec![None; promises.len()],
        remaining: promises.len(),
    }));
    for (index, promise) in promises.iter().enumerate() {
        let settle = settle.clone();
        let resolver = resolver.clone();
        promise.subscribe(move |outcome| {
            let mut settle = settle.lock();
            settle.slots[index] = Some(outcome);
            settle.remaining -= 1;
            if settle.remaining == 0 {
                let outcomes = settle.slots.drain(..).flatten().collect();
                drop(settle);
                resolver.fulfill(outcomes);
            }
        });
    }
    aggregate
}

/// Waits for every input to settle. Never rejects.
///
/// ```
/// use promise_kit::combinator::join;
/// use promise_kit::{ErrorCode, Manifold, Promise};
/// let Manifold(outcomes, values, errors) = join::<i32, _>(vec![
///     Promise::fulfilled(1),
///     Promise::rejected(ErrorCode::TaskError),
/// ])
/// .wait()
/// .unwrap();
/// assert_eq!(outcomes.len(), 2);
/// assert_eq!(values, vec![1]);
/// assert_eq!(errors.unwrap()[0].code(), ErrorCode::TaskError);
/// ```
pub fn join<T, I>(inputs: I) -> Promise<Joined<T>>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
{
    settle_all(collect_promises(inputs)).map_on(&Queue::current_thread(), |outcomes| {
        let mut values = Vec::new();
        let mut errors = Vec::new();
        for outcome in &outcomes {
            match outcome {
                Ok(value) => values.push(value.clone()),
                Err(error) => errors.push(error.clone()),
            }
        }
        let errors = (!errors.is_empty()).then_some(errors);
        Manifold(outcomes, values, errors)
    })
}

/// Waits for every input to settle, then fulfills with all values or rejects
/// with `JoinError` listing each input's rejection under [`JOIN_PROMISES_KEY`].
pub fn join_fulfilled<T, I>(inputs: I) -> Promise<Vec<T>>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
{
    settle_all(collect_promises(inputs)).then_on(&Queue::current_thread(), |outcomes| {
        if outcomes.iter().all(Result::is_ok) {
            return outcomes.into_iter().collect::<Outcome<Vec<T>>>();
        }
        let settled = outcomes.into_iter().map(Result::err).collect();
        Err(
            Error::with_message(ErrorCode::JoinError, "one or more joined promises rejected")
                .with_info(JOIN_PROMISES_KEY, Info::Settled(settled)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::after;
    use std::time::Duration;

    #[test]
    fn test_join_waits_for_slow_inputs_after_a_rejection() {
        let slow = after(Duration::from_millis(30)).map(|_| 2);
        let p = join::<i32, _>(vec![
            Promise::rejected(ErrorCode::AccessDenied),
            slow.clone(),
        ]);
        let Manifold(outcomes, values, errors) = p.wait().unwrap();
        assert!(slow.is_fulfilled());
        assert!(outcomes[0].is_err());
        assert_eq!(outcomes[1], Ok(2));
        assert_eq!(values, vec![2]);
        assert_eq!(errors.map(|e| e.len()), Some(1));
    }

    #[test]
    fn test_join_without_rejections_has_no_errors() {
        let p = join::<&str, _>(vec![Thenable::Value("a"), Thenable::Value("b")]);
        let Manifold(_, values, errors) = p.wait().unwrap();
        assert_eq!(values, vec!["a", "b"]);
        assert!(errors.is_none());
        let Manifold(outcomes, _, errors) = join::<u8, _>(Vec::<Promise<u8>>::new()).wait().unwrap();
        assert!(outcomes.is_empty() && errors.is_none());
    }

    #[test]
    fn test_join_fulfilled_reports_each_input() {
        let p = join_fulfilled::<i32, _>(vec![
            Promise::fulfilled(1),
            Promise::rejected(ErrorCode::OperationFailed),
        ]);
        let error = p.wait().unwrap_err();
        assert_eq!(error.code(), ErrorCode::JoinError);
        let settled = error.joined().unwrap();
        assert!(settled[0].is_none());
        assert_eq!(settled[1].as_ref().map(Error::code), Some(ErrorCode::OperationFailed));

        let ok = join_fulfilled::<i32, _>(vec![Promise::fulfilled(1), Promise::fulfilled(2)]);
        assert_eq!(ok.wait().unwrap(), vec![1, 2]);
    }
}
