//! Shims for callback-style operations reporting `(value, error)`.
//!
//! Many asynchronous APIs finish by invoking a completion callback with a
//! value and an optional error. The functions here start such an operation and
//! return a promise for its result; the error, when present, always wins over
//! the value.
//!
//! ```
//! use promise_kit::adapter::adapt_bool;
//! use std::thread;
//!
//! let granted = adapt_bool(|adapter| {
//!     thread::spawn(move || adapter.complete(true, None));
//! });
//! assert!(granted.wait().unwrap());
//! ```

use crate::error::Error;
use crate::promise::Promise;
use crate::resolver::Resolver;
use crate::Value;

/// Completion handle given to the operation started by an adapter shim.
///
/// Only the first completion counts. Dropping every clone without
/// completing rejects the promise.
#[derive(Debug)]
pub struct Adapter<T: Value> {
    resolver: Resolver<T>,
}

impl<T: Value> Adapter<T> {
    pub fn complete(&self, value: T, error: Option<Error>) {
        match error {
            Some(error) => self.resolver.reject(error),
            None => self.resolver.fulfill(value),
        }
    }

    /// A plain completion callback, for APIs that want a closure.
    pub fn into_callback(self) -> impl FnOnce(T, Option<Error>) + Send + 'static {
        move |value, error| self.complete(value, error)
    }
}

impl<T: Value> Clone for Adapter<T> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

fn start_adapted<T, F>(start: F) -> Promise<T>
where
    T: Value,
    F: FnOnce(Adapter<T>),
{
    Promise::new(move |resolver| start(Adapter { resolver }))
}

/// The `(optional value, optional error)` convention.
///
/// Completing with neither a value nor an error fulfills with `None`.
pub fn adapt<T, F>(start: F) -> Promise<Option<T>>
where
    T: Value,
    F: FnOnce(Adapter<Option<T>>),
{
    start_adapted(start)
}

/// The `(bool, optional error)` convention.
pub fn adapt_bool<F>(start: F) -> Promise<bool>
where
    F: FnOnce(Adapter<bool>),
{
    start_adapted(start)
}

/// The `(integer, optional error)` convention.
pub fn adapt_integer<F>(start: F) -> Promise<i64>
where
    F: FnOnce(Adapter<i64>),
{
    start_adapted(start)
}
