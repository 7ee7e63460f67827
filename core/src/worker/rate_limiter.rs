//! Provider call pacing

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Token-bucket limiter shared by every pool task so that fan-out never
/// exceeds the provider's API rate.
pub struct ApiRateLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    calls_per_second: Option<f64>,
}

impl ApiRateLimiter {
    /// Create a limiter. `None` or a non-positive rate disables pacing;
    /// fractional rates round up to whole calls per second.
    pub fn new(calls_per_second: Option<f64>) -> Self {
        let limiter = calls_per_second.and_then(|cps| {
            if cps <= 0.0 {
                return None;
            }
            let per_second = NonZeroU32::new((cps.ceil() as u32).max(1))?;
            Some(RateLimiter::direct(Quota::per_second(per_second)))
        });

        Self {
            limiter,
            calls_per_second,
        }
    }

    /// No pacing
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait for a call slot
    pub async fn wait(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Whether pacing is active
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured rate
    pub fn calls_per_second(&self) -> Option<f64> {
        self.calls_per_second
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("calls_per_second", &self.calls_per_second)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
