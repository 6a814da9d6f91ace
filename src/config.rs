//! Process-wide configuration.
//!
//! Holds the default execution context for continuations, the default
//! [`CatchPolicy`] and the unhandled-rejection handler. Hosts install their own
//! values with [`replace`] early in the process lifetime; tests swap values in
//! and out with [`scoped`].
//!
//! ```
//! use promise_kit::config::{self, Config};
//! use promise_kit::Queue;
//!
//! let _guard = config::scoped(Config::new(Queue::current_thread()));
//! assert_eq!(config::default_queue().label(), "current-thread");
//! ```

use crate::error::Error;
use crate::queue::Queue;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Receives every rejection that reached the end of a chain unobserved.
pub type UnhandledRejectionHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Which rejections `catch` and `recover` hand to their continuation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CatchPolicy {
    AllErrors,
    /// Cancellations skip the continuation and keep propagating.
    #[default]
    AllErrorsExceptCancellation,
}

impl CatchPolicy {
    pub fn handles(self, error: &Error) -> bool {
        match self {
            CatchPolicy::AllErrors => true,
            CatchPolicy::AllErrorsExceptCancellation => !error.is_cancelled(),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub default_queue: Queue,
    pub catch_policy: CatchPolicy,
    pub unhandled_rejection: UnhandledRejectionHandler,
}

impl Config {
    pub fn new(default_queue: Queue) -> Self {
        Self {
            default_queue,
            catch_policy: CatchPolicy::default(),
            unhandled_rejection: Arc::new(log_unhandled_rejection),
        }
    }

    #[must_use]
    pub fn with_catch_policy(mut self, policy: CatchPolicy) -> Self {
        self.catch_policy = policy;
        self
    }

    #[must_use]
    pub fn with_unhandled_rejection<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.unhandled_rejection = Arc::new(handler);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(MAIN.clone())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("default_queue", &self.default_queue)
            .field("catch_policy", &self.catch_policy)
            .finish_non_exhaustive()
    }
}

static MAIN: Lazy<Queue> = Lazy::new(|| {
    Queue::serial("promise-main").unwrap_or_else(|err| {
        error!(error = %err, "failed to start the default queue, running inline");
        Queue::current_thread()
    })
});

static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

/// The default handler: logs through `tracing`, ignoring cancellations.
pub fn log_unhandled_rejection(error: &Error) {
    if error.is_cancelled() {
        debug!(%error, "unhandled cancellation");
        return;
    }
    error!(
        domain = error.domain(),
        code = error.code().as_i64(),
        %error,
        "unhandled promise rejection"
    );
}

/// A snapshot of the current configuration.
pub fn current() -> Config {
    CONFIG.read().clone()
}

/// Installs `config`, returning the one it replaced.
pub fn replace(config: Config) -> Config {
    std::mem::replace(&mut *CONFIG.write(), config)
}

/// Restores the built-in defaults, returning the configuration it replaced.
pub fn reset() -> Config {
    replace(Config::default())
}

pub fn default_queue() -> Queue {
    CONFIG.read().default_queue.clone()
}

pub fn catch_policy() -> CatchPolicy {
    CONFIG.read().catch_policy
}

/// Swaps the unhandled-rejection handler, returning the previous one.
pub fn set_unhandled_rejection_handler<F>(handler: F) -> UnhandledRejectionHandler
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    std::mem::replace(&mut CONFIG.write().unhandled_rejection, Arc::new(handler))
}

pub(crate) fn report_unhandled(error: &Error) {
    // Cloned out so the handler may itself touch the configuration.
    let handler = CONFIG.read().unhandled_rejection.clone();
    handler(error);
}

/// Installs `config` until the returned guard is dropped.
pub fn scoped(config: Config) -> ScopedConfig {
    ScopedConfig {
        previous: Some(replace(config)),
    }
}

#[must_use = "the previous configuration is restored when the guard drops"]
pub struct ScopedConfig {
    previous: Option<Config>,
}

impl Drop for ScopedConfig {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            replace(previous);
        }
    }
}
