//! # Background Tasks
//!
//! The engine owns two long-lived jobs: the session-expiry sweep and the rate-limiter
//! refill. Both are started through [`spawn_periodic`] so they share one shape:
//! a `tokio::time::interval`, a job closure, and a [`CancelToken`] that stops the loop.
//!
//! Tests don't need this module to exercise the jobs: each job is also a plain method
//! (`SessionStore::cleanup_expired_sessions`, `RateLimiter::refill_once`) that can be called
//! as a manual tick.

use crate::context::CancelToken;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Run `job` every `period` until `token` is cancelled.
///
/// The first run happens one full period after spawning, not immediately.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancelToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => job().await,
            }
        }

        info!(task = name, "Background task stopped");
    })
}
