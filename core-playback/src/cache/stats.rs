//! Cache accounting and statistics

use crate::cache::config::CacheLimit;
use serde::{Deserialize, Serialize};

/// Byte accounting owned by one store.
///
/// Created when the store opens and dropped with it; there is no process-wide copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStoreState {
    /// Sum of the lengths of all live spans
    pub total_bytes_used: u64,

    /// Current budget
    pub max_bytes: CacheLimit,

    /// Eviction passes that stopped short of the budget because spans were pinned
    pub evictions_deferred: u64,

    /// Spans removed by eviction since the store opened
    pub evicted_spans: u64,
}

impl CacheStoreState {
    pub fn new(max_bytes: CacheLimit) -> Self {
        Self {
            total_bytes_used: 0,
            max_bytes,
            evictions_deferred: 0,
            evicted_spans: 0,
        }
    }

    /// Returns `true` if usage exceeds the budget.
    pub fn is_over_budget(&self) -> bool {
        self.max_bytes.is_exceeded_by(self.total_bytes_used)
    }

    /// Bytes that must be freed to get back under the budget.
    pub fn overflow(&self) -> u64 {
        match self.max_bytes.max_bytes() {
            Some(max) => self.total_bytes_used.saturating_sub(max),
            None => 0,
        }
    }
}

/// Snapshot of the store, for settings screens and diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of distinct resource keys with at least one span
    pub key_count: usize,

    /// Number of live spans
    pub span_count: usize,

    /// Total bytes used by live spans
    pub total_bytes: u64,

    /// Budget in bytes, `None` when unlimited
    pub max_bytes: Option<u64>,

    /// Spans currently held open by readers
    pub pinned_spans: usize,

    /// Spans removed by eviction since the store opened
    pub evicted_spans: u64,

    /// Eviction passes deferred because of pinned spans
    pub evictions_deferred: u64,

    /// Timestamp (unix millis) when stats were calculated
    pub calculated_at: i64,
}

impl CacheStats {
    /// Cache usage as a percentage of the budget (0 when unlimited).
    pub fn usage_percentage(&self) -> f64 {
        match self.max_bytes {
            Some(max) if max > 0 => (self.total_bytes as f64 / max as f64) * 100.0,
            _ => 0.0,
        }
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self) -> bool {
        self.max_bytes.is_some_and(|max| self.total_bytes >= max)
    }

    /// Bytes above the budget.
    pub fn space_needed(&self) -> u64 {
        match self.max_bytes {
            Some(max) => self.total_bytes.saturating_sub(max),
            None => 0,
        }
    }

    /// Usage formatted for display, e.g. `"12.5 MB"`.
    pub fn size_string(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

/// Format a byte count as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
