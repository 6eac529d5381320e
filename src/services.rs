//! Contracts of the external collaborators.
//!
//! The scheduler core never talks to a transport, a filesystem or a program
//! runtime directly; it consumes these traits. Implementations must be
//! thread-safe: every method may be called concurrently from subscriber
//! workers and registry callers.

use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::FeedError;
use crate::errors::ProbeError;
use crate::errors::StoreError;
use crate::errors::TaskExecutionError;
use crate::ids::ProgramRef;
use crate::ids::ProgramType;
use crate::ids::ScheduleId;
use crate::ids::StreamId;

/// Feed category of stream size notifications.
pub const STREAM_FEED_CATEGORY: &str = "stream";

/// Argument keys handed to the program dispatcher.
pub const ARG_SCHEDULE_NAME: &str = "scheduleName";
pub const ARG_LOGICAL_START_TIME: &str = "logicalStartTime";
pub const ARG_RUN_DATA_SIZE: &str = "runDataSize";
pub const ARG_PAST_RUN_LOGICAL_START_TIME: &str = "pastRunLogicalStartTime";
pub const ARG_PAST_RUN_DATA_SIZE: &str = "pastRunDataSize";

/// Size event published on a stream's notification feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeNotification {
    pub timestamp_ms: u64,
    pub size_bytes: u64,
}

/// Identity of a notification feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationFeed {
    pub namespace: String,
    pub category: &'static str,
    pub name: String,
}

impl NotificationFeed {
    /// The per-stream size feed: `{streamName}Size` in the stream's namespace.
    pub fn stream_size(stream: &StreamId) -> Self {
        Self {
            namespace: stream.namespace.clone(),
            category: STREAM_FEED_CATEGORY,
            name: format!("{}Size", stream.name),
        }
    }
}

impl std::fmt::Display for NotificationFeed {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.category, self.name)
    }
}

/// Live subscription to a notification feed.
///
/// Events arrive on the embedded channel; dropping the subscription ends it.
/// The transport observes the closed channel on its next send and releases
/// the server-side registration.
pub struct NotificationSubscription {
    events: mpsc::Receiver<SizeNotification>,
}

impl NotificationSubscription {
    pub fn new(events: mpsc::Receiver<SizeNotification>) -> Self {
        Self { events }
    }

    pub fn events_mut(&mut self) -> &mut mpsc::Receiver<SizeNotification> {
        &mut self.events
    }
}

/// Notification transport.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationService: Send + Sync + 'static {
    async fn subscribe(
        &self,
        feed: &NotificationFeed,
    ) -> Result<NotificationSubscription, FeedError>;
}

/// Opaque handle to a stream's current configuration. The generation may roll
/// at any moment, so callers re-fetch it before every size query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub stream: StreamId,
    pub generation: u64,
}

/// Admin interface of the stream storage layer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamAdmin: Send + Sync + 'static {
    async fn get_config(
        &self,
        stream: &StreamId,
    ) -> Result<StreamConfig, ProbeError>;

    /// Current persistent byte count of the stream.
    async fn fetch_stream_size(
        &self,
        config: &StreamConfig,
    ) -> Result<u64, ProbeError>;
}

/// Task state as persisted across restarts. The concrete storage format is
/// the store's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedTaskState {
    pub base_size: u64,
    pub base_ts: u64,
    pub active: bool,
}

/// Durable schedule store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScheduleStore: Send + Sync + 'static {
    async fn upsert(
        &self,
        id: &ScheduleId,
        state: &PersistedTaskState,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        id: &ScheduleId,
    ) -> Result<(), StoreError>;
}

/// Arguments of one program run triggered by a firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArguments {
    pub schedule_name: String,
    pub logical_start_time: u64,
    pub run_data_size: u64,
    pub past_run_logical_start_time: u64,
    pub past_run_data_size: u64,
}

impl RunArguments {
    /// String map handed across the dispatcher boundary.
    pub fn into_args(self) -> HashMap<String, String> {
        HashMap::from([
            (ARG_SCHEDULE_NAME.to_string(), self.schedule_name),
            (
                ARG_LOGICAL_START_TIME.to_string(),
                self.logical_start_time.to_string(),
            ),
            (
                ARG_RUN_DATA_SIZE.to_string(),
                self.run_data_size.to_string(),
            ),
            (
                ARG_PAST_RUN_LOGICAL_START_TIME.to_string(),
                self.past_run_logical_start_time.to_string(),
            ),
            (
                ARG_PAST_RUN_DATA_SIZE.to_string(),
                self.past_run_data_size.to_string(),
            ),
        ])
    }
}

/// Launches program runs. A successful return means the run was accepted;
/// execution outcome stays with the dispatcher.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProgramDispatcher: Send + Sync + 'static {
    async fn run(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        args: RunArguments,
    ) -> Result<(), TaskExecutionError>;
}
