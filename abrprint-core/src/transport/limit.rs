use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

// Replenishment period standing in for a zero-rate override.
const ZERO_LIMIT_PERIOD: Duration = Duration::from_secs(60 * 60 * 24 * 365);

// Restrictive defaults for known services, keyed by hostname.
// (requests per second, burst)
const DEFAULT_LIMITS: [(&str, u32); 4] = [
    ("www.amazon.com", 2),
    ("www.primevideo.com", 2),
    ("default.any-any.prd.api.max.com", 10),
    ("video.svt.se", 10),
];

/// Per-host token buckets. Built once at startup; looked up on every
/// outbound request.
#[derive(Default)]
pub struct HostLimits {
    limiters: HashMap<String, Arc<DefaultDirectRateLimiter>>,
}

impl HostLimits {
    pub fn with_defaults() -> Self {
        let mut limits = Self::default();
        for (host, per_second) in DEFAULT_LIMITS {
            limits.set(host, per_second);
        }
        limits
    }

    /// Apply user overrides. A negative limit removes the host's limiter
    /// entirely; zero installs a limiter that never replenishes.
    pub fn apply_overrides<'a, I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        for (host, limit) in overrides {
            if limit < 0 {
                self.limiters.remove(host);
                continue;
            }
            self.set(host, limit.min(u32::MAX as i64) as u32);
        }
    }

    pub fn get(&self, host: &str) -> Option<&Arc<DefaultDirectRateLimiter>> {
        self.limiters.get(host)
    }

    fn set(&mut self, host: &str, per_second: u32) {
        let quota = match NonZeroU32::new(per_second) {
            Some(rate) => Quota::per_second(rate).allow_burst(rate),
            // Quotas cannot be zero; one cell per year is the closest
            // degenerate stand-in.
            None => {
                let Some(quota) = Quota::with_period(ZERO_LIMIT_PERIOD) else {
                    return;
                };
                quota
            }
        };
        self.limiters
            .insert(host.to_string(), Arc::new(RateLimiter::direct(quota)));
    }
}
