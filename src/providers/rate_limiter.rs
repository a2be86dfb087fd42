//! # Rate Limiter
//!
//! Token bucket for outbound provider calls.
//!
//! ## How it works:
//! - The bucket starts full with `capacity` tokens (a `tokio::sync::Semaphore`'s permits).
//! - `acquire` takes one token and *forgets* the permit, so it is not returned on drop.
//! - A background task adds one token back every `interval / capacity`, never exceeding
//!   `capacity`.
//!
//! Waiting for a token is bounded by the caller's [`RequestContext`]: when its deadline
//! passes or it is cancelled, `acquire` fails with `RateLimitExceeded`.

use crate::context::{CancelToken, RequestContext};
use crate::error::SpeechError;
use crate::tasks;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    tokens: Semaphore,
    capacity: usize,
    interval: Duration,
}

impl RateLimiter {
    /// `capacity` requests per `interval`. A zero capacity is treated as one.
    pub fn new(name: impl Into<String>, capacity: usize, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            tokens: Semaphore::new(capacity),
            capacity,
            interval,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Time between two refills.
    pub fn refill_period(&self) -> Duration {
        self.interval / self.capacity as u32
    }

    /// Take one token, waiting until one is refilled or `ctx` ends.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<(), SpeechError> {
        tokio::select! {
            biased;
            permit = self.tokens.acquire() => {
                let permit = permit.map_err(|_| {
                    SpeechError::Internal(format!("rate limiter '{}' is closed", self.name))
                })?;
                permit.forget();
                Ok(())
            }
            _ = ctx.done() => {
                debug!(limiter = %self.name, "Gave up waiting for a rate limit token");
                Err(SpeechError::RateLimitExceeded(format!(
                    "no '{}' token available before the request deadline",
                    self.name
                )))
            }
        }
    }

    /// Add one token if the bucket is not full. One manual tick of the refill task.
    pub fn refill_once(&self) {
        if self.tokens.available_permits() < self.capacity {
            self.tokens.add_permits(1);
        }
    }

    /// Start the background refill task. It stops when `token` is cancelled.
    pub fn spawn_refill(self: &Arc<Self>, token: CancelToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tasks::spawn_periodic("rate-limiter-refill", self.refill_period(), token, move || {
            let limiter = Arc::clone(&limiter);
            async move { limiter.refill_once() }
        })
    }
}
