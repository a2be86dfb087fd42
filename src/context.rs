//! # Request Context: Deadlines and Cancellation
//!
//! Every slow operation in the engine (provider calls, transcoding, waiting for a rate-limit
//! token) runs under a [`RequestContext`]. The context carries:
//!
//! - an optional **deadline** shared by every step of the request, so retries never reset it;
//! - a **cancellation token** that can be fired from anywhere (client disconnect, shutdown).
//!
//! ## Rust Concepts:
//! - **tokio::sync::watch**: a single-value channel; every receiver sees the latest value.
//!   We use it as a broadcast "cancelled" flag that async code can wait on.
//! - **tokio::select!**: races the real work against the deadline and the token.

use crate::error::SpeechError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Cloneable cancellation flag. Cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token has been cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of the token, so this only errors
        // if every clone is gone, at which point nobody is left to cancel us.
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline + cancellation for one logical request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    token: CancelToken,
}

impl RequestContext {
    /// A context with no deadline and a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            token: CancelToken::new(),
        }
    }

    /// Same token, tighter deadline. The earlier of the two deadlines wins.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.clone(),
        }
    }

    /// Attach an externally owned token (e.g. the server shutdown token).
    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Resolves when the deadline passes or the token fires, whichever is first.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = self.token.cancelled() => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Run `fut` under this context.
    ///
    /// Returns `Timeout` or `Cancelled` (naming `operation`) if the context finishes first.
    /// The inner future is dropped in that case, so anything it owns (child processes with
    /// `kill_on_drop`, HTTP requests, semaphore waits) is released promptly.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T, SpeechError>
    where
        F: Future<Output = Result<T, SpeechError>>,
    {
        if self.token.is_cancelled() {
            return Err(SpeechError::Cancelled(operation.to_string()));
        }

        let sleep = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SpeechError::Cancelled(operation.to_string())),
            result = fut => result,
            _ = sleep => Err(SpeechError::Timeout(operation.to_string())),
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, operation: &str, duration: Duration) -> Result<(), SpeechError> {
        self.run(operation, async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
