//! Error hierarchy of the stream-size scheduler.
//!
//! Registry operations surface [`ScheduleError`]. Subscription failures are
//! fatal for the affected subscriber and surface as [`FeedError`]. Probe
//! failures surface only from the seeding paths (add/resume); the polling
//! loop logs and drops them. Dispatch failures never leave a task.

use crate::ids::ScheduleId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registry-level failures: unknown schedules, wrong schedule kinds
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// Notification feed subscription failures
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// Stream size query failures
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The schedule is not registered
    #[error("schedule not found: {0}")]
    NotFound(ScheduleId),

    /// The supplied definition is not a stream-size schedule
    #[error("schedule {name} is not a stream-size schedule")]
    InvalidArgument { name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The notification feed does not exist
    #[error("notification feed not found: {feed}")]
    NotFound { feed: String },

    /// Subscribing to the feed failed
    #[error("notification feed subscription failed for {feed}: {message}")]
    Subscribe { feed: String, message: String },
}

/// Stream size query failed. Carries the stream identity for log context.
#[derive(Debug, thiserror::Error)]
#[error("size probe failed for stream {stream}: {message}")]
pub struct ProbeError {
    pub stream: String,
    pub message: String,
}

/// Schedule store failure. Logged and swallowed by the core.
#[derive(Debug, thiserror::Error)]
#[error("schedule store operation failed: {0}")]
pub struct StoreError(pub String);

/// Program dispatch failure. `refire_immediately` asks the task to retry the
/// same firing without advancing its watermark again.
#[derive(Debug, thiserror::Error)]
#[error("program dispatch failed: {message}")]
pub struct TaskExecutionError {
    pub refire_immediately: bool,
    pub message: String,
}
