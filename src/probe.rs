//! Clock and size probe.
//!
//! Pairs the stream admin's byte count with the caller's wall-clock time,
//! producing the same observation shape a push notification carries. The
//! clock is a seam so cadence-sensitive behavior stays testable.

use std::sync::Arc;

use crate::errors::ProbeError;
use crate::ids::StreamId;
use crate::services::SizeNotification;
use crate::services::StreamAdmin;
use crate::utils::time::now_millis;

/// Millisecond wall-clock source.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// System wall clock. The default outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_millis()
    }
}

/// A `(size, ts)` snapshot of one stream, from either a notification or a
/// poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeObservation {
    /// Persistent byte count of the stream.
    pub size: u64,
    /// Wall-clock milliseconds at which the size was observed.
    pub ts: u64,
}

impl From<SizeNotification> for SizeObservation {
    fn from(notification: SizeNotification) -> Self {
        Self {
            size: notification.size_bytes,
            ts: notification.timestamp_ms,
        }
    }
}

/// Queries the current stream size through the admin contract.
#[derive(Clone)]
pub struct SizeProbe {
    admin: Arc<dyn StreamAdmin>,
    clock: Arc<dyn Clock>,
}

impl SizeProbe {
    pub fn new(admin: Arc<dyn StreamAdmin>) -> Self {
        Self::with_clock(admin, Arc::new(SystemClock))
    }

    pub fn with_clock(
        admin: Arc<dyn StreamAdmin>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { admin, clock }
    }

    /// Snapshot of the stream's current size and the wall clock.
    ///
    /// The stream config is re-fetched on every call; its generation may
    /// change at any moment.
    pub async fn probe(
        &self,
        stream: &StreamId,
    ) -> Result<SizeObservation, ProbeError> {
        let config = self.admin.get_config(stream).await?;
        let size = self.admin.fetch_stream_size(&config).await?;
        Ok(SizeObservation {
            size,
            ts: self.clock.now_millis(),
        })
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}
