use crate::promise::Promise;
use crate::queue::Queue;
use crate::timer;
use std::time::{Duration, Instant};

/// Fulfills with the time actually elapsed, once `duration` has passed.
///
/// ```
/// use promise_kit::combinator::after;
/// use std::time::Duration;
/// let elapsed = after(Duration::from_millis(5)).wait().unwrap();
/// assert!(elapsed >= Duration::from_millis(5));
/// ```
pub fn after(duration: Duration) -> Promise<Duration> {
    let (promise, resolver) = Promise::pending();
    let started = Instant::now();
    timer::schedule(
        duration,
        Box::new(move || resolver.fulfill(started.elapsed())),
    );
    promise
}

/// Fulfills with `()` once `duration` has passed.
pub fn delay(duration: Duration) -> Promise<()> {
    after(duration).map_on(&Queue::current_thread(), |_| ())
}

/// [`after`] taking fractional seconds.
///
/// Negative and NaN values wait zero; values too large for a [`Duration`],
/// infinity included, wait forever.
pub fn after_seconds(seconds: f64) -> Promise<Duration> {
    let duration = if seconds.is_nan() || seconds <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    };
    after(duration)
}
