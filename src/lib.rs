//! # stream-sched
//!
//! Triggers program executions when named data streams accumulate a
//! configured amount of new bytes.
//!
//! The scheduler fuses an event-driven notification subscription with an
//! adaptive polling fallback: each stream in active use gets one subscriber
//! that joins both sources into a single monotone size/time signal and fans
//! it out to the schedules targeting that stream. Each schedule tracks a `(base_size, base_ts)` watermark and
//! dispatches a program run whenever an observation crosses
//! `base_size + trigger`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌─────────────────────────┐
//! │ NotificationService  │      │ StreamAdmin (size probe)│
//! └──────────┬───────────┘      └───────────┬─────────────┘
//!            │ push                         │ pull (fallback poll)
//!            ▼                              ▼
//!        ┌───────────────────────────────────────┐
//!        │ StreamSubscriber (one per stream)     │
//!        │   strictly-greater ts filter          │
//!        │   delivery worker (serialized fan-out)│
//!        └──────────┬────────────────────────────┘
//!                   ▼
//!        ┌───────────────────────┐     ┌────────────────────┐
//!        │ ScheduleTask          │ ──> │ ProgramDispatcher  │
//!        │   watermark + firing  │     └────────────────────┘
//!        └───────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use stream_sched::{
//!     ProgramRef, ProgramType, ScheduleDef, SchedulerConfig, StreamSizeSchedule,
//!     StreamSizeScheduler,
//! };
//!
//! let config = SchedulerConfig::new()?;
//! let scheduler = StreamSizeScheduler::new(&config, notifications, admin, store, dispatcher)?;
//!
//! let program = ProgramRef::new("default", "purchases", "report");
//! let schedule = StreamSizeSchedule::new("hourly-volume", "purchase-events", 16);
//! scheduler
//!     .schedule(&program, ProgramType::Workflow, ScheduleDef::StreamSize(schedule))
//!     .await?;
//! ```
//!
//! External collaborators (notification transport, stream admin, durable
//! schedule store, program dispatcher) are consumed as traits; see
//! [`services`].

pub mod config;
pub mod services;

mod errors;
mod ids;
mod probe;
mod schedule;
mod scheduler;
mod subscriber;
mod task;
mod utils;

pub use config::SchedulerConfig;
pub use errors::*;
pub use ids::*;
pub use probe::Clock;
pub use probe::SizeObservation;
pub use probe::SizeProbe;
pub use probe::SystemClock;
pub use schedule::*;
pub use scheduler::RestoredSchedule;
pub use scheduler::StreamSizeScheduler;


#[cfg(test)]
pub mod test_utils;
