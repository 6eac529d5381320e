//! Schedule definitions and lifecycle states.

use serde::Deserialize;
use serde::Serialize;

/// The two schedule kinds the platform knows. This scheduler only executes
/// [`ScheduleDef::StreamSize`]; time-based schedules belong to a different
/// scheduler and are rejected at the façade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleDef {
    StreamSize(StreamSizeSchedule),
    TimeBased(TimeSchedule),
}

impl ScheduleDef {
    pub fn name(&self) -> &str {
        match self {
            ScheduleDef::StreamSize(schedule) => &schedule.name,
            ScheduleDef::TimeBased(schedule) => &schedule.name,
        }
    }
}

/// A schedule that triggers once a stream accumulates `trigger_mb` megabytes
/// of new data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSizeSchedule {
    pub name: String,
    pub stream_name: String,
    /// Data trigger in megabytes, at least 1.
    pub trigger_mb: u32,
}

impl StreamSizeSchedule {
    pub fn new(
        name: impl Into<String>,
        stream_name: impl Into<String>,
        trigger_mb: u32,
    ) -> Self {
        debug_assert!(trigger_mb >= 1, "trigger_mb must be at least 1");
        Self {
            name: name.into(),
            stream_name: stream_name.into(),
            trigger_mb,
        }
    }

    /// Trigger threshold in bytes.
    pub fn trigger_bytes(&self) -> u64 {
        u64::from(self.trigger_mb) << 20
    }
}

/// Cron-style schedule. Declared for completeness of the taxonomy; never
/// executed by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSchedule {
    pub name: String,
    pub cron: String,
}

/// Answer of the registry's state query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    NotFound,
    Scheduled,
    Suspended,
}

/// How a newly added task seeds its watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialState {
    /// Probe the stream and use that snapshot. First-time scheduling.
    FreshProbe,
    /// Use the supplied pair without probing. Recovery from the store.
    Watermark { base_size: u64, base_ts: u64 },
}

/// A predicted upcoming run of a schedule. Stream-size schedules never
/// produce these; the type exists for the façade's query surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRuntime {
    pub schedule: crate::ids::ScheduleId,
    pub time_ms: u64,
}
