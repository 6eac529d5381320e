//! Shared fixtures for unit and scenario tests: a manual clock, an
//! in-memory notification hub, a scripted stream admin, and recording
//! dispatcher/store doubles.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::SchedulerConfig;
use crate::errors::FeedError;
use crate::errors::ProbeError;
use crate::errors::StoreError;
use crate::errors::TaskExecutionError;
use crate::ids::ProgramRef;
use crate::ids::ProgramType;
use crate::ids::ScheduleId;
use crate::ids::StreamId;
use crate::probe::Clock;
use crate::schedule::StreamSizeSchedule;
use crate::scheduler::StreamSizeScheduler;
use crate::services::NotificationFeed;
use crate::services::NotificationService;
use crate::services::NotificationSubscription;
use crate::services::PersistedTaskState;
use crate::services::ProgramDispatcher;
use crate::services::RunArguments;
use crate::services::ScheduleStore;
use crate::services::SizeNotification;
use crate::services::StreamAdmin;
use crate::services::StreamConfig;

/// Wall clock under test control. Observation timestamps come from here, so
/// tests can decouple them from tokio's virtual time.
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Arc<Self> {
        Arc::new(Self {
            millis: AtomicU64::new(start),
        })
    }

    pub fn set(
        &self,
        millis: u64,
    ) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Stream admin double with per-stream scripted sizes.
#[derive(Default)]
pub struct FakeStreamAdmin {
    sizes: Mutex<HashMap<String, u64>>,
    fail: AtomicBool,
    probes: AtomicUsize,
}

impl FakeStreamAdmin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_size(
        &self,
        stream_name: &str,
        size: u64,
    ) {
        self.sizes.lock().insert(stream_name.to_string(), size);
    }

    pub fn fail_probes(
        &self,
        fail: bool,
    ) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamAdmin for FakeStreamAdmin {
    async fn get_config(
        &self,
        stream: &StreamId,
    ) -> Result<StreamConfig, ProbeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProbeError {
                stream: stream.to_string(),
                message: "stream admin unreachable".into(),
            });
        }
        Ok(StreamConfig {
            stream: stream.clone(),
            generation: 0,
        })
    }

    async fn fetch_stream_size(
        &self,
        config: &StreamConfig,
    ) -> Result<u64, ProbeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProbeError {
                stream: config.stream.to_string(),
                message: "stream admin unreachable".into(),
            });
        }
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .sizes
            .lock()
            .get(&config.stream.name)
            .copied()
            .unwrap_or(0))
    }
}

/// In-memory notification transport. Tests publish size events by feed name.
#[derive(Default)]
pub struct FeedHub {
    senders: Mutex<HashMap<String, mpsc::Sender<SizeNotification>>>,
    fail_next: Mutex<Option<FeedError>>,
}

impl FeedHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_subscribe(
        &self,
        err: FeedError,
    ) {
        *self.fail_next.lock() = Some(err);
    }

    /// Publishes a size event on the `{stream_name}Size` feed.
    pub async fn publish(
        &self,
        stream_name: &str,
        timestamp_ms: u64,
        size_bytes: u64,
    ) {
        let sender = self.senders.lock().get(&format!("{stream_name}Size")).cloned();
        if let Some(sender) = sender {
            let _ = sender
                .send(SizeNotification {
                    timestamp_ms,
                    size_bytes,
                })
                .await;
        }
    }

    pub fn has_subscription(
        &self,
        stream_name: &str,
    ) -> bool {
        self.senders
            .lock()
            .get(&format!("{stream_name}Size"))
            .is_some_and(|sender| !sender.is_closed())
    }
}

#[async_trait]
impl NotificationService for FeedHub {
    async fn subscribe(
        &self,
        feed: &NotificationFeed,
    ) -> Result<NotificationSubscription, FeedError> {
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        let (sender, receiver) = mpsc::channel(16);
        self.senders.lock().insert(feed.name.clone(), sender);
        Ok(NotificationSubscription::new(receiver))
    }
}

/// One recorded dispatch attempt.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub program: ProgramRef,
    pub program_type: ProgramType,
    pub args: RunArguments,
}

/// Dispatcher double recording every attempt; failures can be scripted.
#[derive(Default)]
pub struct RecordingDispatcher {
    runs: Mutex<Vec<RecordedRun>>,
    failures: Mutex<VecDeque<TaskExecutionError>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_failure(
        &self,
        err: TaskExecutionError,
    ) {
        self.failures.lock().push_back(err);
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().clone()
    }

    /// `(logical_start_time, run_data_size)` of every attempt for one
    /// schedule, in dispatch order.
    pub fn firings_for(
        &self,
        schedule_name: &str,
    ) -> Vec<(u64, u64)> {
        self.runs
            .lock()
            .iter()
            .filter(|run| run.args.schedule_name == schedule_name)
            .map(|run| (run.args.logical_start_time, run.args.run_data_size))
            .collect()
    }
}

#[async_trait]
impl ProgramDispatcher for RecordingDispatcher {
    async fn run(
        &self,
        program: &ProgramRef,
        program_type: ProgramType,
        args: RunArguments,
    ) -> Result<(), TaskExecutionError> {
        self.runs.lock().push(RecordedRun {
            program: program.clone(),
            program_type,
            args,
        });
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(())
    }
}

/// Store double recording upserts and deletes; can be made to fail.
#[derive(Default)]
pub struct RecordingStore {
    upserts: Mutex<Vec<(ScheduleId, PersistedTaskState)>>,
    deletes: Mutex<Vec<ScheduleId>>,
    fail: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_operations(
        &self,
        fail: bool,
    ) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn upserts(&self) -> Vec<(ScheduleId, PersistedTaskState)> {
        self.upserts.lock().clone()
    }

    pub fn deletes(&self) -> Vec<ScheduleId> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl ScheduleStore for RecordingStore {
    async fn upsert(
        &self,
        id: &ScheduleId,
        state: &PersistedTaskState,
    ) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError("store unavailable".into()));
        }
        self.upserts.lock().push((id.clone(), *state));
        Ok(())
    }

    async fn delete(
        &self,
        id: &ScheduleId,
    ) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError("store unavailable".into()));
        }
        self.deletes.lock().push(id.clone());
        Ok(())
    }
}

/// Everything a scenario test needs, wired together.
pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub admin: Arc<FakeStreamAdmin>,
    pub feeds: Arc<FeedHub>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub store: Arc<RecordingStore>,
    pub scheduler: StreamSizeScheduler,
}

impl TestHarness {
    pub fn new(polling_delay_secs: u64) -> Self {
        let clock = ManualClock::new(0);
        let admin = FakeStreamAdmin::new();
        let feeds = FeedHub::new();
        let dispatcher = RecordingDispatcher::new();
        let store = RecordingStore::new();
        let config = SchedulerConfig { polling_delay_secs };
        let scheduler = StreamSizeScheduler::with_clock(
            &config,
            Arc::clone(&feeds) as Arc<dyn NotificationService>,
            Arc::clone(&admin) as Arc<dyn StreamAdmin>,
            Arc::clone(&store) as Arc<dyn ScheduleStore>,
            Arc::clone(&dispatcher) as Arc<dyn ProgramDispatcher>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .expect("valid test config");
        Self {
            clock,
            admin,
            feeds,
            dispatcher,
            store,
            scheduler,
        }
    }
}

pub fn program() -> ProgramRef {
    ProgramRef::new("default", "logs-app", "aggregate")
}

pub fn size_schedule(
    name: &str,
    stream_name: &str,
    trigger_mb: u32,
) -> StreamSizeSchedule {
    StreamSizeSchedule::new(name, stream_name, trigger_mb)
}

/// Lets spawned workers drain their queues. Under a paused tokio clock this
/// returns as soon as every other task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}
