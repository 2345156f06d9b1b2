//! Per-channel token bucket rate limiter
//!
//! Two independent buckets gate outbound sends: one for the mesh radio
//! (airtime-limited) and one for the chat API (per-bot caps). Tokens
//! refill continuously based on elapsed time using integer arithmetic.
//! `allow` never blocks and never discards; when it returns `false` the
//! caller queues the item and tries again later.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{BucketConfig, RateLimitConfig};

/// Outbound channel gated by the rate limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Toward the mesh radio
    Mesh,
    /// Toward the chat API
    Chat,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Mesh => write!(f, "mesh"),
            Channel::Chat => write!(f, "chat"),
        }
    }
}

/// Token state for one channel
#[derive(Debug)]
struct Bucket {
    /// Current number of available tokens
    tokens: u32,
    /// Bucket capacity (burst size)
    burst: u32,
    /// Time to refill one token
    refill_interval: Duration,
    /// Timestamp of the last refill computation
    last_refill: Instant,
}

impl Bucket {
    fn new(config: &BucketConfig, now: Instant) -> Self {
        Self {
            tokens: config.burst,
            burst: config.burst,
            refill_interval: config.refill_interval,
            last_refill: now,
        }
    }

    /// Refill tokens based on elapsed time since the last refill.
    ///
    /// Integer-only: `refill = elapsed_ms / interval_ms`. The refill
    /// timestamp only advances by whole intervals so fractional credit
    /// is never lost. A full bucket earns no credit for idle time.
    fn refill(&mut self, now: Instant) {
        if self.tokens == self.burst {
            self.last_refill = now;
            return;
        }

        let interval_ms = self.refill_interval.as_millis().max(1) as u64;
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as u64;
        let refill = elapsed_ms / interval_ms;
        if refill == 0 {
            return;
        }

        self.tokens = (self.tokens as u64)
            .saturating_add(refill)
            .min(self.burst as u64) as u32;
        self.last_refill += Duration::from_millis(refill * interval_ms);
        if self.tokens == self.burst {
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Token-bucket gate shared across outbound sends
#[derive(Debug)]
pub struct RateLimiter {
    mesh: Mutex<Bucket>,
    chat: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter from per-channel configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        let now = Instant::now();
        Self {
            mesh: Mutex::new(Bucket::new(&config.mesh, now)),
            chat: Mutex::new(Bucket::new(&config.chat, now)),
        }
    }

    /// Consume one token from the channel's bucket if available.
    ///
    /// Returns `false` without blocking when the bucket is empty; the
    /// caller must queue rather than drop.
    pub fn allow(&self, channel: Channel) -> bool {
        let now = Instant::now();
        match channel {
            Channel::Mesh => self.mesh.lock().try_take(now),
            Channel::Chat => self.chat.lock().try_take(now),
        }
    }

    /// Tokens currently available on a channel (after refill)
    pub fn remaining(&self, channel: Channel) -> u32 {
        let now = Instant::now();
        let mut bucket = match channel {
            Channel::Mesh => self.mesh.lock(),
            Channel::Chat => self.chat.lock(),
        };
        bucket.refill(now);
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn limiter(burst: u32, refill: Duration) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            mesh: BucketConfig {
                burst,
                refill_interval: refill,
            },
            chat: BucketConfig {
                burst,
                refill_interval: refill,
            },
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_burst() {
        let limiter = limiter(3, Duration::from_secs(5));
        assert!(limiter.allow(Channel::Mesh));
        assert!(limiter.allow(Channel::Mesh));
        assert!(limiter.allow(Channel::Mesh));
        assert!(!limiter.allow(Channel::Mesh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let limiter = limiter(1, Duration::from_secs(5));
        assert!(limiter.allow(Channel::Mesh));
        assert!(!limiter.allow(Channel::Mesh));

        // Chat bucket untouched by mesh exhaustion
        assert!(limiter.allow(Channel::Chat));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_one_token_per_interval() {
        let limiter = limiter(3, Duration::from_secs(5));
        for _ in 0..3 {
            assert!(limiter.allow(Channel::Mesh));
        }
        assert!(!limiter.allow(Channel::Mesh));

        // One interval elapses: exactly one token back
        advance(Duration::from_secs(5)).await;
        assert!(limiter.allow(Channel::Mesh));
        assert!(!limiter.allow(Channel::Mesh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_burst() {
        let limiter = limiter(3, Duration::from_secs(1));
        for _ in 0..3 {
            assert!(limiter.allow(Channel::Chat));
        }

        // Long idle: bucket refills to capacity, not beyond
        advance(Duration::from_secs(3600)).await;
        assert_eq!(limiter.remaining(Channel::Chat), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_interval_earns_nothing() {
        let limiter = limiter(1, Duration::from_secs(10));
        assert!(limiter.allow(Channel::Mesh));

        advance(Duration::from_secs(9)).await;
        assert!(!limiter.allow(Channel::Mesh));

        advance(Duration::from_secs(1)).await;
        assert!(limiter.allow(Channel::Mesh));
    }
}
