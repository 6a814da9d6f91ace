//! Thread-safe promises with queue-dispatched continuations.
//!
//! A [`Promise`] is a write-once container for the outcome of an asynchronous
//! operation. It starts pending and is settled exactly once through its
//! [`Resolver`], either fulfilled with a value or rejected with an [`Error`].
//! Chaining operations (`then`, `map`, `recover`, `catch`, `ensure`) return new
//! dependent promises whose continuations run on a [`Queue`]. The
//! [`combinator`] module composes several promises into one.
//!
//! ```
//! use promise_kit::{combinator, Promise, Queue};
//!
//! let worker = Queue::serial("worker").unwrap();
//! let sum = combinator::all(vec![
//!     Promise::spawn_on(&worker, || Ok(20)),
//!     Promise::fulfilled(22),
//! ])
//! .map(|values| values.iter().sum::<i32>());
//! assert_eq!(sum.wait().unwrap(), 42);
//! ```
//!
//! A rejection nobody observed is handed to the unhandled-rejection handler of
//! the [`config`] when its promise is dropped. Promises also implement
//! [`Future`](std::future::Future), so `async` code can await them.

pub mod adapter;
mod cell;
pub mod combinator;
pub mod config;
pub mod error;
pub mod manifold;
pub mod promise;
pub mod queue;
pub mod resolution;
pub mod resolver;
mod timer;

#[cfg(test)]
mod test_utils;

pub use adapter::{adapt, adapt_bool, adapt_integer, Adapter};
pub use combinator::{
    after, after_seconds, all, all2, all3, delay, join, join_fulfilled, race, race_fulfilled,
    retry_until, retry_until_on, timeout, when, Joined,
};
pub use config::{CatchPolicy, Config};
pub use error::{
    Error, ErrorCode, Info, ERROR_DOMAIN, FAILING_INDEX_KEY, JOIN_PROMISES_KEY,
    UNDERLYING_ERRORS_KEY, UNDERLYING_EXCEPTION_KEY,
};
pub use manifold::Manifold;
pub use promise::Promise;
pub use queue::{Dispatcher, Job, Queue};
pub use resolution::{IntoResolution, Resolution, Thenable};
pub use resolver::Resolver;

/// Anything a promise can carry: cloned out to every observer, moved across
/// queue threads.
pub trait Value: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Value for T {}

/// The settled state of a promise.
pub type Outcome<T> = Result<T, Error>;
