//! # Retry Configuration
//!
//! Backoff policy and state machine for the retrying data source.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for `open()` failures.
///
/// The delay before retry `n` (starting at 1) is
/// `base_delay * 2^(n-1) + jitter` in exponential mode and
/// `flat_delay + jitter` otherwise, with `jitter` drawn uniformly from
/// `[0, base_delay / 4)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    ///
    /// Default: 3 (4 attempts in total).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential schedule and of the jitter window.
    ///
    /// Default: 1000 ms.
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,

    /// Delay used when exponential mode is off.
    ///
    /// Default: 2500 ms.
    #[serde(default = "default_flat_delay")]
    pub flat_delay: Duration,

    /// Double the delay on every retry.
    ///
    /// Default: true.
    #[serde(default = "default_exponential")]
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            flat_delay: default_flat_delay(),
            exponential: default_exponential(),
        }
    }
}

impl RetryPolicy {
    /// Policy with the flat 2500 ms schedule.
    pub fn flat() -> Self {
        Self {
            exponential: false,
            ..Default::default()
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_flat_delay(mut self, delay: Duration) -> Self {
        self.flat_delay = delay;
        self
    }

    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Upper (exclusive) bound of the random jitter.
    pub fn jitter_bound(&self) -> Duration {
        self.base_delay / 4
    }

    /// Deterministic part of the delay before retry `attempt`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        if self.exponential {
            let exponent = attempt.saturating_sub(1).min(16);
            self.base_delay.saturating_mul(1u32 << exponent)
        } else {
            self.flat_delay
        }
    }

    /// Full delay before retry `attempt`, jitter included.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let bound = self.jitter_bound().as_millis() as u64;
        let jitter = if bound == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..bound)
        };
        self.base_backoff(attempt) + Duration::from_millis(jitter)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.exponential && self.base_delay.is_zero() && self.max_retries > 0 {
            return Err("base_delay must be > 0 in exponential mode".to_string());
        }

        if self.max_retries > 16 {
            return Err("max_retries cannot exceed 16".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_flat_delay() -> Duration {
    Duration::from_millis(2500)
}

fn default_exponential() -> bool {
    true
}

// ============================================================================
// Retry State
// ============================================================================

/// State of one retrying `open()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    /// No open in progress.
    #[default]
    Idle,
    /// An attempt is running.
    Attempting,
    /// Waiting out the backoff before the next attempt.
    Retrying,
    /// The last open succeeded.
    Success,
    /// Gave up; the last error was returned.
    Fatal,
}

impl RetryState {
    /// Returns `true` while an open is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Attempting | Self::Retrying)
    }

    /// Returns `true` if the last open finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fatal)
    }
}
