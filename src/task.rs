//! Per-schedule task: watermark state and firing logic.
//!
//! A task carries the `(base_size, base_ts)` watermark of its schedule and
//! fires a program run whenever an observation crosses
//! `base_size + trigger_bytes`. The watermark advances before the dispatch so
//! a duplicate delivery of the same observation measures from the new
//! baseline and cannot fire twice.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::ids::ProgramRef;
use crate::ids::ProgramType;
use crate::ids::ScheduleId;
use crate::probe::SizeObservation;
use crate::schedule::StreamSizeSchedule;
use crate::services::PersistedTaskState;
use crate::services::ProgramDispatcher;
use crate::services::RunArguments;

#[derive(Debug, Clone, Copy)]
struct Watermark {
    base_size: u64,
    base_ts: u64,
}

/// In-memory state of one stream-size schedule.
pub(crate) struct ScheduleTask {
    id: ScheduleId,
    program: ProgramRef,
    program_type: ProgramType,
    schedule: StreamSizeSchedule,
    /// None until the task is seeded; observations delivered before seeding
    /// are dropped.
    watermark: Mutex<Option<Watermark>>,
    active: AtomicBool,
    dispatcher: Arc<dyn ProgramDispatcher>,
}

impl ScheduleTask {
    pub(crate) fn new(
        id: ScheduleId,
        program: ProgramRef,
        program_type: ProgramType,
        schedule: StreamSizeSchedule,
        active: bool,
        dispatcher: Arc<dyn ProgramDispatcher>,
    ) -> Self {
        Self {
            id,
            program,
            program_type,
            schedule,
            watermark: Mutex::new(None),
            active: AtomicBool::new(active),
            dispatcher,
        }
    }

    pub(crate) fn id(&self) -> &ScheduleId {
        &self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Installs the initial watermark.
    pub(crate) fn seed(
        &self,
        base_size: u64,
        base_ts: u64,
    ) {
        debug!(
            schedule = %self.id,
            base_size,
            base_ts,
            active = self.is_active(),
            "schedule task seeded"
        );
        *self.watermark.lock() = Some(Watermark { base_size, base_ts });
    }

    /// Returns true iff the task transitioned ACTIVE -> SUSPENDED.
    pub(crate) fn suspend(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Returns true iff the task transitioned SUSPENDED -> ACTIVE.
    pub(crate) fn resume(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Snapshot for the schedule store. None while unseeded.
    pub(crate) fn persisted_state(&self) -> Option<PersistedTaskState> {
        (*self.watermark.lock()).map(|watermark| PersistedTaskState {
            base_size: watermark.base_size,
            base_ts: watermark.base_ts,
            active: self.is_active(),
        })
    }

    /// Handles one observation: rebases on truncation, fires once the
    /// threshold is crossed, otherwise does nothing.
    pub(crate) async fn received(
        &self,
        observation: SizeObservation,
    ) {
        if !self.is_active() {
            return;
        }

        let past;
        {
            let mut guard = self.watermark.lock();
            let Some(watermark) = guard.as_mut() else {
                return;
            };

            if observation.size < watermark.base_size {
                // The stream was truncated: the old base is unreachable, so
                // rebase on the observed size without firing.
                debug!(
                    schedule = %self.id,
                    size = observation.size,
                    ts = observation.ts,
                    "stream truncated, watermark rebased"
                );
                watermark.base_size = observation.size;
                watermark.base_ts = observation.ts;
                return;
            }

            if observation.size < watermark.base_size + self.schedule.trigger_bytes() {
                return;
            }

            // Advance before dispatching so a concurrent delivery of the same
            // observation measures from the new baseline.
            past = *watermark;
            watermark.base_size = observation.size;
            watermark.base_ts = observation.ts;
            debug!(
                schedule = %self.id,
                base_size = observation.size,
                base_ts = observation.ts,
                "watermark advanced"
            );
        }

        self.fire(observation, past).await;
    }

    async fn fire(
        &self,
        observation: SizeObservation,
        past: Watermark,
    ) {
        let args = RunArguments {
            schedule_name: self.schedule.name.clone(),
            logical_start_time: observation.ts,
            run_data_size: observation.size,
            past_run_logical_start_time: past.base_ts,
            past_run_data_size: past.base_size,
        };

        loop {
            info!(schedule = %self.id, program = %self.program, "starting program run");
            match self
                .dispatcher
                .run(&self.program, self.program_type, args.clone())
                .await
            {
                Ok(()) => break,
                Err(err) if err.refire_immediately => {
                    warn!(schedule = %self.id, error = %err, "dispatch failed, refiring immediately");
                }
                Err(err) => {
                    error!(schedule = %self.id, error = %err, "dispatch failed, firing dropped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
impl ScheduleTask {
    pub(crate) fn watermark_for_test(&self) -> Option<(u64, u64)> {
        (*self.watermark.lock()).map(|watermark| (watermark.base_size, watermark.base_ts))
    }
}
