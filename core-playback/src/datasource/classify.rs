//! Maps transport failures into [`ErrorClass`].

use crate::error::{ErrorClass, PlaybackError, Result};
use crate::traits::{DataSource, DataSpec, TransferListener};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Class of an HTTP status, `None` when the status carries no classification.
pub fn class_for_status(status: u16) -> Option<ErrorClass> {
    match status {
        403 | 404 | 410 => Some(ErrorClass::NeedsStreamRefresh),
        429 | 500..=599 => Some(ErrorClass::Transient),
        _ => None,
    }
}

/// Tag `error` with its class.
///
/// Errors without a richer classification are returned unchanged, so their
/// class stays [`ErrorClass::Unknown`].
pub fn classify(error: PlaybackError) -> PlaybackError {
    if matches!(error, PlaybackError::Classified { .. }) || error.is_cancelled() {
        return error;
    }

    let class = match error.http_status() {
        Some(status) => class_for_status(status),
        None if error.is_network_failure() => Some(ErrorClass::Transient),
        None => None,
    };

    match class {
        Some(class) => {
            debug!(?class, error = %error, "Classified transport failure");
            PlaybackError::classified(class, error)
        }
        None => error,
    }
}

/// Decorator that classifies every failure of its inner source.
pub struct ErrorClassifyingDataSource {
    inner: Box<dyn DataSource>,
}

impl ErrorClassifyingDataSource {
    pub fn new(inner: Box<dyn DataSource>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DataSource for ErrorClassifyingDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        self.inner.open(spec).await.map_err(classify)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.inner.read(buf).await.map_err(classify)
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
