//! Scheduler registry: the public façade over streams, subscribers and
//! tasks.
//!
//! Two maps make up the registry state: `streams` (one subscriber per
//! stream in active use) and `schedules` (ordered by `ScheduleId`, so
//! per-program queries are range scans). A single async mutex guards both
//! maps, but it is never held across a blocking call: subscribing to a
//! feed and the seeding probe both run unlocked. A delete of the last task
//! on a stream can therefore race an add joining the same stream, so the
//! add publishes its schedule under the lock only after re-validating that
//! its subscriber is still the registered one, and retries from scratch if
//! a concurrent teardown won. Losing a creation race costs one extra
//! subscription that is cancelled immediately. Observation handling,
//! polling and firing all run outside the lock on the subscribers' own
//! workers.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::config::SchedulerConfig;
use crate::errors::Result;
use crate::errors::ScheduleError;
use crate::ids::ProgramRef;
use crate::ids::ProgramType;
use crate::ids::ScheduleId;
use crate::ids::StreamId;
use crate::ids::ID_DELIMITER;
use crate::probe::Clock;
use crate::probe::SizeProbe;
use crate::probe::SystemClock;
use crate::schedule::InitialState;
use crate::schedule::ScheduleDef;
use crate::schedule::ScheduleState;
use crate::schedule::ScheduledRuntime;
use crate::schedule::StreamSizeSchedule;
use crate::services::NotificationService;
use crate::services::ProgramDispatcher;
use crate::services::ScheduleStore;
use crate::services::StreamAdmin;
use crate::subscriber::StreamSubscriber;
use crate::task::ScheduleTask;

struct RegistryState {
    streams: HashMap<StreamId, Arc<StreamSubscriber>>,
    schedules: BTreeMap<ScheduleId, Arc<StreamSubscriber>>,
}

impl RegistryState {
    /// Ids of every schedule of one program, in `ScheduleId` order. The scan
    /// runs from `prefix + ':'` (inclusive) to `prefix + ';'` (exclusive),
    /// `';'` being the delimiter's successor byte.
    fn range_ids(
        &self,
        prefix: &str,
    ) -> Vec<ScheduleId> {
        let start = ScheduleId::raw(format!("{prefix}{ID_DELIMITER}"));
        let end_delimiter = (ID_DELIMITER as u8 + 1) as char;
        let end = ScheduleId::raw(format!("{prefix}{end_delimiter}"));
        self.schedules
            .range(start..end)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// A schedule entry replayed from the durable store during recovery.
#[derive(Debug, Clone)]
pub struct RestoredSchedule {
    pub program: ProgramRef,
    pub program_type: ProgramType,
    pub schedule: StreamSizeSchedule,
    pub active: bool,
    pub initial: InitialState,
}

/// Triggers program executions when streams accumulate a configured amount
/// of new bytes.
pub struct StreamSizeScheduler {
    polling_delay: Duration,
    notifications: Arc<dyn NotificationService>,
    admin: Arc<dyn StreamAdmin>,
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<dyn ProgramDispatcher>,
    clock: Arc<dyn Clock>,
    registry: Mutex<RegistryState>,
}

impl StreamSizeScheduler {
    pub fn new(
        config: &SchedulerConfig,
        notifications: Arc<dyn NotificationService>,
        admin: Arc<dyn StreamAdmin>,
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<dyn ProgramDispatcher>,
    ) -> Result<Self> {
        Self::with_clock(
            config,
            notifications,
            admin,
            store,
            dispatcher,
            Arc::new(SystemClock),
        )
    }

    /// Like [`StreamSizeScheduler::new`] with an explicit wall-clock source.
    pub fn with_clock(
        config: &SchedulerConfig,
        notifications: Arc<dyn NotificationService>,
        admin: Arc<dyn StreamAdmin>,
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<dyn ProgramDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            polling_delay: config.polling_delay(),
            notifications,
            admin,
            store,
            dispatcher,
            clock,
            registry: Mutex::new(RegistryState {
                streams: HashMap::new(),
                schedules: BTreeMap::new(),
            }),
        })
    }

    /// Registers a new schedule, probing the stream for the initial
    /// watermark and persisting the task.
    ///
    /// Fails with [`ScheduleError::InvalidArgument`] for any definition that
    /// is not a stream-size schedule.
    pub async fn schedule(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        def: ScheduleDef,
    ) -> Result<()> {
        let schedule = match def {
            ScheduleDef::StreamSize(schedule) => schedule,
            other => {
                return Err(ScheduleError::InvalidArgument {
                    name: other.name().to_string(),
                }
                .into());
            }
        };
        self.schedule_with_state(
            program,
            program_type,
            schedule,
            true,
            InitialState::FreshProbe,
            true,
        )
        .await
    }

    /// Registers several schedules in input order. Not atomic: a later
    /// failure leaves earlier successes in place.
    pub async fn schedule_many(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        defs: Vec<ScheduleDef>,
    ) -> Result<()> {
        for def in defs {
            self.schedule(program, program_type, def).await?;
        }
        Ok(())
    }

    /// Registers a schedule with explicit initial state. Used directly by
    /// recovery; [`StreamSizeScheduler::schedule`] is the common entry.
    ///
    /// `persist=false` skips the store write, so restoring a task does not
    /// re-persist it.
    pub async fn schedule_with_state(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        schedule: StreamSizeSchedule,
        active: bool,
        initial: InitialState,
        persist: bool,
    ) -> Result<()> {
        let stream = StreamId::new(program.namespace.clone(), schedule.stream_name.clone());
        let id = ScheduleId::new(program, program_type, &schedule.name);

        loop {
            let (subscriber, created) = self.subscriber_for_stream(&stream, &id).await?;

            let task = Arc::new(ScheduleTask::new(
                id.clone(),
                program.clone(),
                program_type,
                schedule.clone(),
                active,
                Arc::clone(&self.dispatcher),
            ));

            match subscriber.add_task(task, initial, persist).await {
                Ok(true) => {
                    // Publish under the lock, re-validating that a concurrent
                    // delete of the stream's last task did not tear the
                    // subscriber down while the seeding ran unlocked.
                    let mut registry = self.registry.lock().await;
                    let registered = registry
                        .streams
                        .get(&stream)
                        .is_some_and(|current| Arc::ptr_eq(current, &subscriber));
                    if registered {
                        registry.schedules.insert(id.clone(), subscriber);
                        info!(schedule = %id, stream = %stream, "schedule registered");
                        return Ok(());
                    }
                    drop(registry);
                    subscriber.discard_task(&id);
                    continue;
                }
                Ok(false) => {
                    // Replacing an existing schedule is not supported; leave it be.
                    debug!(schedule = %id, "schedule already exists");
                    return Ok(());
                }
                Err(err) => {
                    if created {
                        let mut registry = self.registry.lock().await;
                        let registered = registry
                            .streams
                            .get(&stream)
                            .is_some_and(|current| Arc::ptr_eq(current, &subscriber));
                        if registered && subscriber.is_empty() {
                            subscriber.cancel();
                            registry.streams.remove(&stream);
                        }
                    }
                    return Err(err.into());
                }
            }
        }
    }

    /// Finds the stream's registered subscriber or starts a new one. The
    /// subscribe call runs outside the registry lock; when a concurrent
    /// creator wins the race, the fresh subscriber is cancelled and the
    /// registered one is used.
    async fn subscriber_for_stream(
        &self,
        stream: &StreamId,
        id: &ScheduleId,
    ) -> Result<(Arc<StreamSubscriber>, bool)> {
        {
            let registry = self.registry.lock().await;
            if let Some(existing) = registry.streams.get(stream) {
                return Ok((Arc::clone(existing), false));
            }
        }

        let probe = SizeProbe::with_clock(Arc::clone(&self.admin), Arc::clone(&self.clock));
        let fresh = StreamSubscriber::start(
            stream.clone(),
            self.polling_delay,
            &self.notifications,
            probe,
            Arc::clone(&self.store),
        )
        .await
        .map_err(|err| {
            error!(stream = %stream, schedule = %id, error = %err, "notification feed subscription failed");
            err
        })?;

        let mut registry = self.registry.lock().await;
        match registry.streams.get(stream) {
            Some(existing) => {
                fresh.cancel();
                Ok((Arc::clone(existing), false))
            }
            None => {
                registry.streams.insert(stream.clone(), Arc::clone(&fresh));
                Ok((fresh, true))
            }
        }
    }

    /// Replays persisted schedules, typically at startup. Per-entry failures
    /// are logged and skipped so one bad entry cannot block recovery.
    pub async fn restore(
        &self,
        entries: impl IntoIterator<Item = RestoredSchedule>,
    ) {
        for entry in entries {
            let name = entry.schedule.name.clone();
            if let Err(err) = self
                .schedule_with_state(
                    &entry.program,
                    entry.program_type,
                    entry.schedule,
                    entry.active,
                    entry.initial,
                    false,
                )
                .await
            {
                error!(schedule = %name, error = %err, "failed to restore schedule");
            }
        }
    }

    /// Suspends a schedule. Idempotent once the schedule exists.
    pub async fn suspend(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        schedule_name: &str,
    ) -> Result<()> {
        let id = ScheduleId::new(program, program_type, schedule_name);
        let subscriber = self.lookup(&id).await?;
        subscriber.suspend_task(&id)?;
        Ok(())
    }

    /// Resumes a schedule. Idempotent; never re-fires triggers for growth
    /// that happened while suspended.
    pub async fn resume(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        schedule_name: &str,
    ) -> Result<()> {
        let id = ScheduleId::new(program, program_type, schedule_name);
        let subscriber = self.lookup(&id).await?;
        subscriber.resume_task(&id).await
    }

    /// Deletes a schedule. An emptied subscriber is cancelled and removed
    /// from the registry.
    pub async fn delete(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        schedule_name: &str,
    ) -> Result<()> {
        let id = ScheduleId::new(program, program_type, schedule_name);
        let mut registry = self.registry.lock().await;
        let subscriber = registry
            .schedules
            .remove(&id)
            .ok_or_else(|| ScheduleError::NotFound(id.clone()))?;
        subscriber.delete_task(&id).await?;
        if subscriber.is_empty() {
            subscriber.cancel();
            registry.streams.remove(subscriber.stream());
            debug!(stream = %subscriber.stream(), "last schedule removed, subscriber cancelled");
        }
        info!(schedule = %id, "schedule deleted");
        Ok(())
    }

    /// Deletes every schedule of the given program.
    pub async fn delete_all(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
    ) -> Result<()> {
        let prefix = ScheduleId::program_prefix(program, program_type);
        let ids = {
            let registry = self.registry.lock().await;
            registry.range_ids(&prefix)
        };
        for id in ids {
            if id.as_str().len() <= prefix.len() + 1 {
                warn!(schedule = %id, "malformed schedule id, skipping");
                continue;
            }
            let name = id.schedule_name().to_string();
            self.delete(program, program_type, &name).await?;
        }
        Ok(())
    }

    /// Ids of every schedule of the given program, in natural order.
    pub async fn list_ids(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
    ) -> Vec<ScheduleId> {
        let prefix = ScheduleId::program_prefix(program, program_type);
        let registry = self.registry.lock().await;
        registry.range_ids(&prefix)
    }

    /// Current state of one schedule.
    pub async fn state(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        schedule_name: &str,
    ) -> ScheduleState {
        let id = ScheduleId::new(program, program_type, schedule_name);
        let registry = self.registry.lock().await;
        match registry.schedules.get(&id) {
            None => ScheduleState::NotFound,
            Some(subscriber) => subscriber.task_state(&id),
        }
    }

    /// Size-triggered schedules have no predictable next run time.
    pub async fn next_runtimes(
        &self,
        _program: &ProgramRef,
        _program_type: ProgramType,
    ) -> Vec<ScheduledRuntime> {
        Vec::new()
    }

    /// Cancels every subscriber and clears the registry.
    pub async fn stop(&self) {
        let mut registry = self.registry.lock().await;
        for subscriber in registry.streams.values() {
            subscriber.cancel();
        }
        registry.streams.clear();
        registry.schedules.clear();
        info!("stream size scheduler stopped");
    }

    async fn lookup(
        &self,
        id: &ScheduleId,
    ) -> Result<Arc<StreamSubscriber>> {
        let registry = self.registry.lock().await;
        registry
            .schedules
            .get(id)
            .cloned()
            .ok_or_else(|| ScheduleError::NotFound(id.clone()).into())
    }
}

#[cfg(test)]
impl StreamSizeScheduler {
    pub(crate) async fn subscriber_for_test(
        &self,
        stream: &StreamId,
    ) -> Option<Arc<StreamSubscriber>> {
        self.registry.lock().await.streams.get(stream).cloned()
    }

    /// Checks the cross-map invariant: every schedule entry's subscriber is
    /// the one registered for its stream.
    pub(crate) async fn registry_is_consistent(&self) -> bool {
        let registry = self.registry.lock().await;
        registry.schedules.values().all(|subscriber| {
            registry
                .streams
                .get(subscriber.stream())
                .is_some_and(|registered| Arc::ptr_eq(registered, subscriber))
        }) && registry
            .streams
            .values()
            .all(|subscriber| !subscriber.is_empty())
    }
}
