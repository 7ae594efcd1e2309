//! Rate limiting for expensive refresh paths.
//!
//! A [`RateLimiter`] lets a call through at most once per period. Calls that
//! arrive too early are dropped on the floor: nothing is queued, nothing is
//! deferred. [`Throttled`] wraps a handler with its own limiter, so two
//! wraps of the same handler never share a clock.
//!
//! Time is read from `tokio::time::Instant`, which behaves like
//! `std::time::Instant` at runtime and follows the paused clock in tests.

use std::time::Duration;
use tokio::time::Instant;

/// Lets at most one call through per `period`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    period: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// Limiter with an explicit period. A zero period never drops.
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Limiter allowing `fps` calls per second; `0` means unlimited.
    pub fn per_second(fps: u32) -> Self {
        if fps == 0 {
            Self::unlimited()
        } else {
            Self::new(Duration::from_nanos(1_000_000_000 / u64::from(fps)))
        }
    }

    /// Limiter that never drops a call.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Change the period. The time of the last permitted call is kept.
    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Returns `true` and records the call if the period has elapsed since
    /// the last permitted call. The first call is always permitted.
    pub fn permit(&mut self) -> bool {
        let now = Instant::now();
        let allowed = self
            .last
            .map(|t| now.duration_since(t) >= self.period)
            .unwrap_or(true);
        if allowed {
            self.last = Some(now);
        }
        allowed
    }
}

/// A handler that runs at most once per period.
///
/// ```
/// use std::time::Duration;
/// use beam_viewer::throttle::throttle;
///
/// let mut hits = 0;
/// let mut bump = throttle(|n: i32| hits += n, Duration::from_secs(60));
/// assert_eq!(bump.call(1), Some(()));
/// assert_eq!(bump.call(1), None);
/// drop(bump);
/// assert_eq!(hits, 1);
/// ```
pub struct Throttled<F> {
    handler: F,
    limiter: RateLimiter,
}

/// Wrap `handler` so it executes at most once per `period`.
pub fn throttle<F>(handler: F, period: Duration) -> Throttled<F> {
    Throttled {
        handler,
        limiter: RateLimiter::new(period),
    }
}

impl<F> Throttled<F> {
    /// Invoke the handler if the limiter permits it.
    ///
    /// Returns `None` when the call was dropped.
    pub fn call<A, R>(&mut self, args: A) -> Option<R>
    where
        F: FnMut(A) -> R,
    {
        if self.limiter.permit() {
            Some((self.handler)(args))
        } else {
            None
        }
    }

    /// Access the underlying limiter, e.g. to change the period.
    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }
}

impl<F> std::fmt::Debug for Throttled<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttled")
            .field("limiter", &self.limiter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drops_calls_inside_period() {
        let mut count = 0;
        let mut wrapped = throttle(|_: ()| count += 1, Duration::from_millis(100));

        assert!(wrapped.call(()).is_some());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(wrapped.call(()).is_none());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(wrapped.call(()).is_some());

        drop(wrapped);
        assert_eq!(count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wraps_do_not_share_a_clock() {
        let mut a = RateLimiter::new(Duration::from_secs(1));
        let mut b = RateLimiter::new(Duration::from_secs(1));
        assert!(a.permit());
        assert!(b.permit());
        assert!(!a.permit());
        assert!(!b.permit());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_does_not_reset_clock() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100));
        assert!(limiter.permit());
        tokio::time::advance(Duration::from_millis(90)).await;
        assert!(!limiter.permit());
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(limiter.permit());
    }

    #[test]
    fn zero_fps_is_unlimited() {
        let mut limiter = RateLimiter::per_second(0);
        assert_eq!(limiter.period(), Duration::ZERO);
        assert!(limiter.permit());
        assert!(limiter.permit());
        assert!(limiter.permit());
    }

    #[test]
    fn per_second_period() {
        let limiter = RateLimiter::per_second(10);
        assert_eq!(limiter.period(), Duration::from_millis(100));
    }
}
