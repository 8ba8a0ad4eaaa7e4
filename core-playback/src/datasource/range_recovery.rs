//! Recovery from upstreams that reject or cannot satisfy range requests.

use crate::error::{PlaybackError, Result};
use crate::traits::{close_quietly, DataSource, DataSpec, TransferListener};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// HTTP 416 Range Not Satisfiable.
pub const RANGE_NOT_SATISFIABLE: u16 = 416;

/// Returns `true` for failures that a request without `Range` may avoid.
pub fn is_range_failure(error: &PlaybackError) -> bool {
    error.is_end_of_stream() || error.http_status() == Some(RANGE_NOT_SATISFIABLE)
}

/// Decorator that retries a failed open once with the `Range` header removed
/// and the length unbounded.
///
/// Strictly one retry; the second failure propagates as is.
pub struct RangeRecoveryDataSource {
    inner: Box<dyn DataSource>,
    recoveries: u32,
}

impl RangeRecoveryDataSource {
    pub fn new(inner: Box<dyn DataSource>) -> Self {
        Self {
            inner,
            recoveries: 0,
        }
    }

    /// Number of opens that needed the unranged retry.
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }
}

#[async_trait]
impl DataSource for RangeRecoveryDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        match self.inner.open(spec).await {
            Ok(length) => Ok(length),
            Err(e) if is_range_failure(&e) && !spec.cancel.is_cancelled() => {
                debug!(error = %e, position = spec.position, "Retrying open without Range");
                close_quietly(self.inner.as_mut()).await;
                self.recoveries += 1;
                self.inner.open(&spec.without_range()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.inner.add_transfer_listener(listener);
    }

    fn uri(&self) -> Option<&str> {
        self.inner.uri()
    }
}
