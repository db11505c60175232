//! Rate limiting for flood protection.
//!
//! Each connection owns a `governor` direct rate limiter sized from
//! `RateLimitConfig`, plus a strike counter that decides when a flooding
//! client is disconnected.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Result of a flood check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodCheck {
    Ok,
    /// Over the limit; the frame is dropped and a strike recorded.
    RateLimited { strikes: u8 },
    /// Strike limit reached.
    Disconnect,
}

/// Per-connection flood guard.
pub struct FloodGuard {
    limiter: DefaultDirectRateLimiter,
    strikes: u8,
    max_strikes: u8,
}

impl FloodGuard {
    pub fn new(config: &RateLimitConfig) -> Self {
        let rate = NonZeroU32::new(config.messages_per_second).unwrap_or(nonzero!(10u32));
        let burst = NonZeroU32::new(config.burst).unwrap_or(rate);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            strikes: 0,
            max_strikes: config.max_violations.max(1),
        }
    }

    pub fn check(&mut self) -> FloodCheck {
        if self.limiter.check().is_ok() {
            return FloodCheck::Ok;
        }
        self.strikes = self.strikes.saturating_add(1);
        debug!(strikes = self.strikes, "message rate limit exceeded");
        if self.strikes >= self.max_strikes {
            FloodCheck::Disconnect
        } else {
            FloodCheck::RateLimited {
                strikes: self.strikes,
            }
        }
    }
}
