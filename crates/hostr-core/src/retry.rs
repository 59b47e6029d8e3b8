//! Retry delays for failed writes.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::BridgeSettings;
use crate::error::FailureClass;

/// Maps a failure class and attempt count to a delay.
///
/// By default the delay is a fixed cooldown per class. With a cap set,
/// delays grow along a Fibonacci sequence of the base cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Cooldown after connection resets and timeouts
    pub transient: Duration,
    /// Cooldown after the backend reports its own spacing rule
    pub rate_limited: Duration,
    /// Upper bound for growing delays; `None` keeps them fixed
    pub cap: Option<Duration>,
}

impl RetryPolicy {
    /// Fixed cooldowns.
    pub fn fixed(transient: Duration, rate_limited: Duration) -> Self {
        Self {
            transient,
            rate_limited,
            cap: None,
        }
    }

    /// Hive writes: rate limits wait out the node spacing.
    pub fn for_platform(settings: &BridgeSettings) -> Self {
        Self::fixed(settings.transient_cooldown(), settings.min_post_spacing())
    }

    /// Relay writes: relays have no spacing rule, so both use the cooldown.
    pub fn for_relay(settings: &BridgeSettings) -> Self {
        Self::fixed(settings.transient_cooldown(), settings.transient_cooldown())
    }

    /// Grow delays with each attempt, never beyond `cap`.
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = Some(cap);
        self
    }

    /// Delay before retry number `attempt` (1-based); `None` means give up.
    pub fn delay_for(&self, class: FailureClass, attempt: u32) -> Option<Duration> {
        let base = match class {
            FailureClass::Transient => self.transient,
            FailureClass::RateLimited => self.rate_limited,
            FailureClass::Permanent => return None,
        };
        Some(match self.cap {
            None => base,
            Some(cap) => {
                let factor = fibonacci(attempt.saturating_sub(1)).min(u32::MAX as u64) as u32;
                base.saturating_mul(factor).min(cap)
            }
        })
    }

    /// Instant before which the item must not be retried.
    pub fn not_before(&self, class: FailureClass, attempt: u32, now: Instant) -> Option<Instant> {
        self.delay_for(class, attempt).map(|d| now + d)
    }
}

/// F(0) = 1, F(1) = 1, F(n) = F(n-1) + F(n-2)
fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n.max(1) {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n == 0 {
        1
    } else {
        b
    }
}
