use crate::cell::{Cell, Handler};
use crate::error::{Error, ErrorCode};
use crate::resolution::{IntoResolution, Resolution};
use crate::{Outcome, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// The write side of a [`Promise`](crate::Promise).
///
/// Clones share the right to settle the promise; only the first settlement has
/// any effect and may come from any thread. If every clone is dropped while the
/// promise is still pending, the promise is rejected with `OperationFailed`.
///
/// # Examples
///
/// ```
/// use promise_kit::Promise;
/// use std::thread;
/// let (promise, resolver) = Promise::<String>::pending();
/// let task = thread::spawn(move || resolver.fulfill("🍓".into()));
/// task.join().expect("The task thread has panicked");
/// assert_eq!(promise.wait().unwrap(), "🍓");
/// ```
pub struct Resolver<T: Value> {
    seal: Arc<Seal<T>>,
}

struct Seal<T: Value> {
    cell: Arc<Cell<T>>,
}

impl<T: Value> Resolver<T> {
    pub(crate) fn new(cell: Arc<Cell<T>>) -> Self {
        Self {
            seal: Arc::new(Seal { cell }),
        }
    }

    pub fn fulfill(&self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn reject(&self, error: impl Into<Error>) {
        self.resolve(Err(error.into()));
    }

    pub fn resolve(&self, outcome: Outcome<T>) {
        self.seal.cell.resolve(outcome);
    }

    /// Settles from anything a continuation may return, following promises.
    pub fn resolve_with<R: IntoResolution<T>>(&self, resolution: R) {
        match resolution.into_resolution() {
            Resolution::Fulfill(value) => self.fulfill(value),
            Resolution::Reject(error) => self.reject(error),
            Resolution::Follow(promise) if Arc::ptr_eq(promise.cell(), &self.seal.cell) => {
                self.reject(Error::with_message(
                    ErrorCode::InvalidUsage,
                    "a promise cannot be resolved with itself",
                ));
            }
            Resolution::Follow(promise) => {
                let resolver = self.clone();
                promise
                    .cell()
                    .register(Handler::inline(move |outcome| resolver.resolve(outcome)));
            }
        }
    }

    /// Settles from a continuation that may have panicked.
    pub(crate) fn settle<R: IntoResolution<T>>(&self, result: Result<R, Error>) {
        match result {
            Ok(resolution) => self.resolve_with(resolution),
            Err(error) => self.reject(error),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.seal.cell.is_pending()
    }
}

impl<T: Value> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            seal: self.seal.clone(),
        }
    }
}

impl<T: Value> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("cell", &self.seal.cell)
            .finish()
    }
}

impl<T: Value> Drop for Seal<T> {
    /// If this is an unresolved producer, reject rather than hang forever.
    fn drop(&mut self) {
        if self.cell.is_pending() {
            warn!("pending promise deallocated, every resolver dropped");
            self.cell.resolve(Err(Error::with_message(
                ErrorCode::OperationFailed,
                "resolver dropped before the promise was resolved",
            )));
        }
    }
}
