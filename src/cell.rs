//! The resolution cell shared by a promise, its resolvers and its dependents.
//!
//! A cell is `Pending` until the first call to [`Cell::resolve`]; every later
//! call is ignored. While pending it keeps the ordered list of registered
//! handlers and the wakers of tasks awaiting it. On resolution the list is
//! drained in registration order, each handler dispatched onto its own queue.

use crate::config;
use crate::error::Error;
use crate::queue::Queue;
use crate::{Outcome, Value};
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::task::{Poll, Waker};
use tracing::{debug, trace};

/// A continuation plus the context it must run on.
pub(crate) struct Handler<T> {
    queue: Queue,
    body: Box<dyn FnOnce(Outcome<T>) + Send>,
}

impl<T: Value> Handler<T> {
    pub(crate) fn new<F>(queue: Queue, body: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Self {
            queue,
            body: Box::new(body),
        }
    }

    /// Runs on whichever thread resolves the cell. Only for plumbing whose
    /// work is bounded, never for user continuations.
    pub(crate) fn inline<F>(body: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Self::new(Queue::current_thread(), body)
    }

    fn dispatch(self, outcome: Outcome<T>) {
        let Handler { queue, body } = self;
        queue.dispatch(move || body(outcome));
    }
}

struct Waiters<T> {
    handlers: Vec<Handler<T>>,
    wakers: Vec<Waker>,
}

enum State<T> {
    Pending(Waiters<T>),
    Fulfilled(T),
    Rejected(Error),
}

impl<T: Value> State<T> {
    fn outcome(&self) -> Option<Outcome<T>> {
        match self {
            State::Pending(_) => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

struct Inner<T> {
    state: State<T>,
    /// Set once anything has taken responsibility for a rejection.
    observed: bool,
}

pub(crate) struct Cell<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Value> Cell<T> {
    pub(crate) fn pending() -> Self {
        Self::with_state(State::Pending(Waiters {
            handlers: Vec::new(),
            wakers: Vec::new(),
        }))
    }

    pub(crate) fn resolved(outcome: Outcome<T>) -> Self {
        Self::with_state(match outcome {
            Ok(value) => State::Fulfilled(value),
            Err(error) => State::Rejected(error),
        })
    }

    fn with_state(state: State<T>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                observed: false,
            }),
        }
    }

    /// Settles a pending cell. Returns `false`, changing nothing, if the cell
    /// was already resolved.
    pub(crate) fn resolve(&self, outcome: Outcome<T>) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Pending(_)) {
            debug!(
                rejected = outcome.is_err(),
                "ignoring resolution of an already resolved promise"
            );
            return false;
        }
        let next = match &outcome {
            Ok(value) => State::Fulfilled(value.clone()),
            Err(error) => State::Rejected(error.clone()),
        };
        let previous = mem::replace(&mut inner.state, next);
        drop(inner);

        if let State::Pending(waiters) = previous {
            trace!(
                handlers = waiters.handlers.len(),
                rejected = outcome.is_err(),
                "promise resolved"
            );
            for waker in waiters.wakers {
                waker.wake();
            }
            for handler in waiters.handlers {
                handler.dispatch(outcome.clone());
            }
        }
        true
    }

    /// Queues `handler`, or dispatches it right away if already resolved.
    pub(crate) fn register(&self, handler: Handler<T>) {
        let mut inner = self.inner.lock();
        inner.observed = true;
        if let State::Pending(waiters) = &mut inner.state {
            waiters.handlers.push(handler);
            return;
        }
        let outcome = inner.state.outcome();
        drop(inner);
        if let Some(outcome) = outcome {
            handler.dispatch(outcome);
        }
    }

    /// Future-style access: parks `waker` while pending.
    pub(crate) fn poll(&self, waker: &Waker) -> Poll<Outcome<T>> {
        let mut inner = self.inner.lock();
        inner.observed = true;
        if let State::Pending(waiters) = &mut inner.state {
            if !waiters.wakers.iter().any(|w| w.will_wake(waker)) {
                waiters.wakers.push(waker.clone());
            }
            return Poll::Pending;
        }
        match inner.state.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }

    pub(crate) fn outcome(&self) -> Option<Outcome<T>> {
        self.inner.lock().state.outcome()
    }

    pub(crate) fn mark_observed(&self) {
        self.inner.lock().observed = true;
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.inner.lock().state, State::Pending(_))
    }

    pub(crate) fn is_fulfilled(&self) -> bool {
        matches!(self.inner.lock().state, State::Fulfilled(_))
    }

    pub(crate) fn is_rejected(&self) -> bool {
        matches!(self.inner.lock().state, State::Rejected(_))
    }
}

impl<T> Drop for Cell<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let State::Rejected(error) = &inner.state {
            if !inner.observed {
                config::report_unhandled(error);
            }
        }
    }
}

impl<T> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner.lock().state {
            State::Pending(_) => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        };
        f.debug_struct("Cell").field("state", &state).finish()
    }
}
