//! Last-result-wins tracking for on-demand fetches.
//!
//! Frames and BPM results follow the same lifecycle: a push announces that
//! something new exists, a fetch is issued if the rate limiter allows it,
//! and the fetch completes later on another task. [`LatestFetch`] hands out a
//! [`Ticket`] per issued fetch and only accepts the completion of the newest
//! ticket. A slow fetch that is overtaken by a newer one is discarded when
//! it finally lands, so the displayed value never goes backwards.

use std::time::Duration;

use crate::error::AppResult;
use crate::throttle::RateLimiter;

/// Identifies one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    frame_id: i64,
}

impl Ticket {
    /// Frame the fetch was issued for
    pub fn frame_id(&self) -> i64 {
        self.frame_id
    }
}

/// What happened to a completed fetch.
#[derive(Debug, PartialEq)]
pub enum FetchOutcome {
    /// The result replaced the current value
    Applied,
    /// A newer fetch was issued meanwhile; the result was dropped
    Superseded,
    /// The fetch failed; the current value is unchanged
    Failed,
}

/// Tracks the newest fetch of one stream and holds its latest value.
#[derive(Debug)]
pub struct LatestFetch<T> {
    stream: &'static str,
    limiter: RateLimiter,
    generation: u64,
    in_flight: Option<Ticket>,
    current: Option<T>,
}

impl<T> LatestFetch<T> {
    /// New tracker for `stream` (used in log fields), limited to `fps`.
    pub fn new(stream: &'static str, fps: u32) -> Self {
        Self {
            stream,
            limiter: RateLimiter::per_second(fps),
            generation: 0,
            in_flight: None,
            current: None,
        }
    }

    /// Change the rate limit (0 = unlimited).
    pub fn set_max_rate(&mut self, fps: u32) {
        self.limiter.set_period(RateLimiter::per_second(fps).period());
    }

    /// Current refresh period
    pub fn period(&self) -> Duration {
        self.limiter.period()
    }

    /// Ask to fetch `frame_id`.
    ///
    /// Returns a ticket when the fetch should be issued, `None` when the
    /// rate limiter dropped the request.
    pub fn request(&mut self, frame_id: i64) -> Option<Ticket> {
        if !self.limiter.permit() {
            tracing::trace!(stream = self.stream, frame_id, "fetch throttled");
            return None;
        }
        self.generation += 1;
        let ticket = Ticket {
            generation: self.generation,
            frame_id,
        };
        if let Some(previous) = self.in_flight.replace(ticket) {
            tracing::debug!(
                stream = self.stream,
                superseded = previous.frame_id,
                frame_id,
                "newer fetch issued before previous completed"
            );
        }
        Some(ticket)
    }

    /// Deliver the completion of `ticket`.
    pub fn complete(&mut self, ticket: Ticket, result: AppResult<T>) -> FetchOutcome {
        if ticket.generation != self.generation {
            tracing::debug!(
                stream = self.stream,
                frame_id = ticket.frame_id,
                "discarding superseded fetch result"
            );
            return FetchOutcome::Superseded;
        }
        self.in_flight = None;
        match result {
            Ok(value) => {
                self.current = Some(value);
                FetchOutcome::Applied
            }
            Err(err) => {
                tracing::warn!(
                    stream = self.stream,
                    frame_id = ticket.frame_id,
                    error = %err,
                    "fetch failed, keeping previous value"
                );
                FetchOutcome::Failed
            }
        }
    }

    /// Forget the current value and invalidate every outstanding ticket.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.in_flight = None;
        self.current = None;
    }

    /// Latest applied value
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Whether a fetch is outstanding
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }
}
