//! Secondary transport used when the primary cannot open.

use crate::error::{PlaybackError, Result};
use crate::traits::{close_quietly, DataSource, DataSpec, TransferListener};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSource {
    Primary,
    Fallback,
}

/// Opens `primary`, and on failure `fallback` with the same spec.
///
/// When both fail the primary's error is returned.
pub struct FallbackDataSource {
    primary: Box<dyn DataSource>,
    fallback: Box<dyn DataSource>,
    active: Option<ActiveSource>,
}

impl FallbackDataSource {
    pub fn new(primary: Box<dyn DataSource>, fallback: Box<dyn DataSource>) -> Self {
        Self {
            primary,
            fallback,
            active: None,
        }
    }

    /// Source serving the current open, if any.
    pub fn active(&self) -> Option<ActiveSource> {
        self.active
    }

    fn current(&mut self) -> Result<&mut Box<dyn DataSource>> {
        match self.active {
            Some(ActiveSource::Primary) => Ok(&mut self.primary),
            Some(ActiveSource::Fallback) => Ok(&mut self.fallback),
            None => Err(PlaybackError::IllegalState(
                "read on a fallback source that is not open".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DataSource for FallbackDataSource {
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        let primary_error = match self.primary.open(spec).await {
            Ok(length) => {
                self.active = Some(ActiveSource::Primary);
                return Ok(length);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };

        close_quietly(self.primary.as_mut()).await;
        info!(error = %primary_error, "Primary transport failed, trying fallback");

        match self.fallback.open(spec).await {
            Ok(length) => {
                self.active = Some(ActiveSource::Fallback);
                Ok(length)
            }
            Err(fallback_error) => {
                warn!(
                    primary = %primary_error,
                    fallback = %fallback_error,
                    "Fallback transport failed as well"
                );
                close_quietly(self.fallback.as_mut()).await;
                Err(primary_error)
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.current()?.read(buf).await
    }

    async fn close(&mut self) -> Result<()> {
        match self.active.take() {
            Some(ActiveSource::Primary) => self.primary.close().await,
            Some(ActiveSource::Fallback) => self.fallback.close().await,
            None => Ok(()),
        }
    }

    fn add_transfer_listener(&mut self, listener: Arc<dyn TransferListener>) {
        self.primary.add_transfer_listener(Arc::clone(&listener));
        self.fallback.add_transfer_listener(listener);
    }

    fn uri(&self) -> Option<&str> {
        match self.active {
            Some(ActiveSource::Primary) => self.primary.uri(),
            Some(ActiveSource::Fallback) => self.fallback.uri(),
            None => None,
        }
    }
}
