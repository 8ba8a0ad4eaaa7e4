//! Retry of transient `open()` failures with jittered backoff.

pub use crate::config::{RetryPolicy, RetryState};

use crate::error::{ErrorClass, PlaybackError, Result};
use crate::traits::{close_quietly, DataSource, DataSpec, TransferListener};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&PlaybackError) -> bool + Send + Sync>;

/// Statuses that are never retried, whatever the predicate says.
pub const TERMINAL_STATUSES: [u16; 4] = [401, 403, 404, 410];

/// Statuses retried by the default predicate.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Default predicate: network timeouts, DNS/connect failures and
/// 429/500/502/503/504 responses.
pub fn is_retryable_by_default(error: &PlaybackError) -> bool {
    error.is_network_failure()
        || error
            .http_status()
            .is_some_and(|status| RETRYABLE_STATUSES.contains(&status))
}

/// The default predicate as a [`RetryPredicate`].
pub fn default_predicate() -> RetryPredicate {
    Arc::new(is_retryable_by_default)
}

/// Returns `true` for failures that must end the retry loop immediately.
pub fn is_terminal(error: &PlaybackError) -> bool {
    error.is_cancelled()
        || error
            .http_status()
            .is_some_and(|status| TERMINAL_STATUSES.contains(&status))
        || matches!(
            error.class(),
            ErrorClass::NeedsStreamRefresh | ErrorClass::Unrecoverable
        )
}

/// Bookkeeping for one retrying `open()`.
#[derive(Debug, Default)]
pub struct RetryContext {
    /// Attempts made so far.
    pub attempt: u32,
    pub last_error: Option<PlaybackError>,
}

/// Decorator that retries `open()` of its inner source.
///
/// ```text
/// Idle -> Attempting -> Success
///             |  ^
///             v  |
///           Retrying        (after backoff(attempt))
///             |
///             v
///           Fatal           (terminal error, predicate refused, or attempts exhausted)
/// ```
pub struct RetryDataSource {
    inner: Box<dyn DataSource>,
    policy: RetryPolicy,
    predicate: RetryPredicate,
    state: RetryState,
    attempts: u32,
}

impl RetryDataSource {
    pub fn new(inner: Box<dyn DataSource>, policy: RetryPolicy) -> Self {
        Self::with_predicate(inner, policy, default_predicate())
    }

    pub fn with_predicate(
        inner: Box<dyn DataSource>,
        policy: RetryPolicy,
        predicate: RetryPredicate,
    ) -> Self {
        Self {
            inner,
            policy,
            predicate,
            state: RetryState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Attempts made by the last `open()`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn should_retry(&self, error: &PlaybackError, ctx: &RetryContext) -> bool {
        ctx.attempt <= self.policy.max_retries && !is_terminal(error) && (self.predicate)(error)
    }
}

#[async_trait]
impl DataSource for RetryDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        let mut ctx = RetryContext::default();
        self.state = RetryState::Attempting;

        loop {
            if spec.cancel.is_cancelled() {
                self.state = RetryState::Fatal;
                return Err(PlaybackError::Cancelled);
            }

            ctx.attempt += 1;
            self.attempts = ctx.attempt;
            if let Some(previous) = &ctx.last_error {
                debug!(attempt = ctx.attempt, previous = %previous, "Retrying open");
            }

            let error = match self.inner.open(spec).await {
                Ok(length) => {
                    self.state = RetryState::Success;
                    return Ok(length);
                }
                Err(e) => e,
            };

            if !self.should_retry(&error, &ctx) {
                debug!(attempt = ctx.attempt, error = %error, "Giving up on open");
                self.state = RetryState::Fatal;
                return Err(error);
            }

            close_quietly(self.inner.as_mut()).await;

            let delay = self.policy.backoff(ctx.attempt);
            warn!(
                attempt = ctx.attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Open failed, backing off"
            );
            ctx.last_error = Some(error);
            self.state = RetryState::Retrying;

            tokio::select! {
                biased;
                _ = spec.cancel.cancelled() => {
                    self.state = RetryState::Fatal;
                    return Err(PlaybackError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            self.state = RetryState::Attempting;
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        self.state = RetryState::Idle;
        self.inner.close().await
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.inner.add_transfer_listener(listener);
    }

    fn uri(&self) -> Option<&str> {
        self.inner.uri()
    }
}
