//! Lock-free token bucket.
//!
//! The bucket is stored as a single "theoretical arrival time" (TAT) in
//! nanoseconds since the limiter's epoch. Each token costs one emission
//! interval `T = window / capacity`; a consume is allowed while the new TAT
//! stays within `capacity * T` of now. Refill, clamping and consumption are
//! folded into one compare-and-swap on the TAT, so concurrent callers can
//! never credit the same elapsed interval twice.

use super::RateLimitRule;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Token bucket for one `(rule, entity)` pair.
#[derive(Debug)]
pub struct TokenBucket {
    tat: AtomicU64,
    touched: AtomicU64,
    /// Nanoseconds per token.
    interval: u64,
    /// Nanoseconds covered by a full bucket.
    span: u64,
    capacity: u32,
}

impl TokenBucket {
    /// A full bucket as of `now` (offset from the limiter epoch).
    pub fn new(rule: &RateLimitRule, now: Duration) -> Self {
        let capacity = rule.capacity().max(1);
        let window = nanos(rule.window()).max(1);
        let interval = window.div_ceil(u64::from(capacity));
        let now = nanos(now);
        Self {
            tat: AtomicU64::new(now),
            touched: AtomicU64::new(now),
            interval,
            span: interval.saturating_mul(u64::from(capacity)),
            capacity,
        }
    }

    /// Takes one token, or returns how long until one is available.
    pub fn try_consume(&self, now: Duration) -> Result<(), Duration> {
        let now = nanos(now);
        self.touched.fetch_max(now, Ordering::Relaxed);

        let mut current = self.tat.load(Ordering::Acquire);
        loop {
            let next = current.max(now).saturating_add(self.interval);
            let ahead = next - now;
            if ahead > self.span {
                return Err(Duration::from_nanos(ahead - self.span));
            }
            match self
                .tat
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Whole tokens available at `now`.
    pub fn available(&self, now: Duration) -> u32 {
        let now = nanos(now);
        let used = self.tat.load(Ordering::Acquire).saturating_sub(now);
        let free = self.span.saturating_sub(used) / self.interval;
        u32::try_from(free).map_or(self.capacity, |free| free.min(self.capacity))
    }

    /// Whether the bucket was last touched more than `idle` before `now`.
    pub fn is_idle(&self, now: Duration, idle: Duration) -> bool {
        let touched = self.touched.load(Ordering::Relaxed);
        nanos(now).saturating_sub(touched) > nanos(idle)
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
