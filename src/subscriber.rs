//! Per-stream subscriber: joins push notifications and fallback polls into
//! one monotone observation signal and fans it out to the stream's tasks.
//!
//! Architecture: three background workers per subscriber, all stopped
//! through a shared shutdown channel.
//!
//! ```text
//! NotificationService ──> notification loop ──┐
//!                                             ├──> handle_observation
//! polling loop (sleep + reset channel) ───────┘          │
//!                                   strictly-greater ts filter
//!                                                        │
//!                                              delivery channel
//!                                                        │
//!                                              delivery worker ──> Task::received
//! ```
//!
//! The delivery worker serializes observation delivery to this stream's
//! tasks. The polling loop restarts its delay whenever an observation gets
//! through, so polls only fire after `polling_delay` of silence, and skip
//! entirely while no task is active.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::errors::Error;
use crate::errors::ProbeError;
use crate::errors::Result;
use crate::errors::ScheduleError;
use crate::ids::ScheduleId;
use crate::ids::StreamId;
use crate::probe::SizeObservation;
use crate::probe::SizeProbe;
use crate::schedule::InitialState;
use crate::schedule::ScheduleState;
use crate::services::NotificationFeed;
use crate::services::NotificationService;
use crate::services::NotificationSubscription;
use crate::services::ScheduleStore;
use crate::task::ScheduleTask;

/// One unit of work for the delivery worker.
struct Delivery {
    task: Arc<ScheduleTask>,
    observation: SizeObservation,
}

/// Coordinates every schedule targeting one stream.
pub(crate) struct StreamSubscriber {
    stream: StreamId,
    polling_delay: Duration,
    probe: SizeProbe,
    store: Arc<dyn ScheduleStore>,

    tasks: RwLock<HashMap<ScheduleId, Arc<ScheduleTask>>>,
    /// Count of tasks with `active == true`. Maintained under the `tasks`
    /// write lock; read lock-free by the polling loop.
    active_tasks: AtomicUsize,
    /// Latest observation that passed the timestamp filter. Its own guard:
    /// the seeding and resume paths hold it across a probe.
    last_observation: Mutex<Option<SizeObservation>>,

    delivery_tx: mpsc::UnboundedSender<Delivery>,
    poll_reset_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: watch::Sender<()>,
}

impl StreamSubscriber {
    /// Subscribes to the stream's size feed and spawns the workers.
    ///
    /// On a feed error nothing is spawned and no state escapes, so the
    /// caller has nothing to clean up.
    pub(crate) async fn start(
        stream: StreamId,
        polling_delay: Duration,
        notifications: &Arc<dyn NotificationService>,
        probe: SizeProbe,
        store: Arc<dyn ScheduleStore>,
    ) -> std::result::Result<Arc<Self>, crate::errors::FeedError> {
        let feed = NotificationFeed::stream_size(&stream);
        let subscription = notifications.subscribe(&feed).await?;

        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let (poll_reset_tx, poll_reset_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let subscriber = Arc::new(Self {
            stream,
            polling_delay,
            probe,
            store,
            tasks: RwLock::new(HashMap::new()),
            active_tasks: AtomicUsize::new(0),
            last_observation: Mutex::new(None),
            delivery_tx,
            poll_reset_tx,
            shutdown_tx,
        });

        tokio::spawn(Self::delivery_worker(delivery_rx, shutdown_rx.clone()));
        tokio::spawn(Arc::clone(&subscriber).polling_loop(poll_reset_rx, shutdown_rx.clone()));
        tokio::spawn(Arc::clone(&subscriber).notification_loop(subscription, shutdown_rx));

        Ok(subscriber)
    }

    pub(crate) fn stream(&self) -> &StreamId {
        &self.stream
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Stops the delivery worker, the polling loop and the notification
    /// forwarder; dropping the subscription ends the feed registration.
    /// Removing the subscriber from the registry is the registry's job.
    pub(crate) fn cancel(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Registers a task and seeds its watermark.
    ///
    /// Returns `Ok(false)` if a task already exists under the same id; the
    /// existing task is left untouched. With [`InitialState::FreshProbe`]
    /// the probe snapshot also becomes the stream's `last_observation`. The
    /// last observation, if any, is then replayed to every active task —
    /// duplicate delivery is harmless because the watermark advances before
    /// a dispatch.
    pub(crate) async fn add_task(
        &self,
        task: Arc<ScheduleTask>,
        initial: InitialState,
        persist: bool,
    ) -> std::result::Result<bool, ProbeError> {
        let active = task.is_active();
        {
            let mut tasks = self.tasks.write();
            if tasks.contains_key(task.id()) {
                return Ok(false);
            }
            tasks.insert(task.id().clone(), Arc::clone(&task));
            if active {
                self.active_tasks.fetch_add(1, Ordering::SeqCst);
            }
        }

        match initial {
            InitialState::FreshProbe => {
                // Seed watermark and last_observation from one snapshot, under
                // the observation guard so a concurrent notification cannot
                // slip between them.
                let mut last = self.last_observation.lock().await;
                match self.probe.probe(&self.stream).await {
                    Ok(observation) => {
                        task.seed(observation.size, observation.ts);
                        *last = Some(observation);
                    }
                    Err(err) => {
                        drop(last);
                        // Roll the registration back; an unseeded task must
                        // not linger in the map.
                        let mut tasks = self.tasks.write();
                        tasks.remove(task.id());
                        if active {
                            self.active_tasks.fetch_sub(1, Ordering::SeqCst);
                        }
                        return Err(err);
                    }
                }
            }
            InitialState::Watermark { base_size, base_ts } => {
                task.seed(base_size, base_ts);
            }
        }

        if persist {
            if let Some(state) = task.persisted_state() {
                if let Err(err) = self.store.upsert(task.id(), &state).await {
                    error!(schedule = %task.id(), error = %err, "failed to persist schedule task");
                }
            }
        }

        let observation = *self.last_observation.lock().await;
        if let Some(observation) = observation {
            self.fan_out(observation);
        }
        Ok(true)
    }

    /// Suspends a task. Idempotent; the active count only moves on a real
    /// ACTIVE -> SUSPENDED transition.
    pub(crate) fn suspend_task(
        &self,
        id: &ScheduleId,
    ) -> std::result::Result<(), ScheduleError> {
        let tasks = self.tasks.write();
        let task = tasks
            .get(id)
            .ok_or_else(|| ScheduleError::NotFound(id.clone()))?;
        if task.suspend() {
            self.active_tasks.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Resumes a task. Idempotent. When this is the 0 -> 1 active
    /// transition and the last observation is missing or older than the
    /// polling delay, a fresh probe refreshes it first — a long suspension
    /// must not leave a stale watermark. The (fresh or cached) observation
    /// then reseeds the resumed task's watermark, so growth accumulated
    /// while suspended never fires; the next trigger counts from the
    /// post-resume baseline.
    pub(crate) async fn resume_task(
        &self,
        id: &ScheduleId,
    ) -> Result<()> {
        let (task, now_active) = {
            let tasks = self.tasks.write();
            let task = tasks
                .get(id)
                .ok_or_else(|| ScheduleError::NotFound(id.clone()))?;
            if !task.resume() {
                return Ok(());
            }
            let now_active = self.active_tasks.fetch_add(1, Ordering::SeqCst) + 1;
            (Arc::clone(task), now_active)
        };

        let observation = {
            let mut last = self.last_observation.lock().await;
            if now_active == 1 {
                let polling_delay_ms = self.polling_delay.as_millis() as u64;
                let stale = match *last {
                    None => true,
                    Some(observation) => {
                        observation.ts + polling_delay_ms <= self.probe.now_millis()
                    }
                };
                if stale {
                    let fresh = self.probe.probe(&self.stream).await.map_err(Error::Probe)?;
                    *last = Some(fresh);
                }
            }
            *last
        };

        if let Some(observation) = observation {
            task.seed(observation.size, observation.ts);
        }
        Ok(())
    }

    /// Removes a task without touching the store. Unwind path for an add
    /// whose subscriber was torn down while the task was seeding.
    pub(crate) fn discard_task(
        &self,
        id: &ScheduleId,
    ) {
        let mut tasks = self.tasks.write();
        if let Some(task) = tasks.remove(id) {
            if task.is_active() {
                self.active_tasks.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Removes a task. The owning registry decides whether the subscriber
    /// itself should be torn down afterwards.
    pub(crate) async fn delete_task(
        &self,
        id: &ScheduleId,
    ) -> std::result::Result<(), ScheduleError> {
        {
            let mut tasks = self.tasks.write();
            let task = tasks
                .remove(id)
                .ok_or_else(|| ScheduleError::NotFound(id.clone()))?;
            if task.is_active() {
                self.active_tasks.fetch_sub(1, Ordering::SeqCst);
            }
        }
        if let Err(err) = self.store.delete(id).await {
            error!(schedule = %id, error = %err, "failed to delete schedule task from store");
        }
        Ok(())
    }

    pub(crate) fn task_state(
        &self,
        id: &ScheduleId,
    ) -> ScheduleState {
        match self.tasks.read().get(id) {
            None => ScheduleState::NotFound,
            Some(task) if task.is_active() => ScheduleState::Scheduled,
            Some(_) => ScheduleState::Suspended,
        }
    }

    /// Single entry point for both push notifications and poll results.
    /// Observations whose timestamp is not strictly greater than the last
    /// seen one are dropped, which keeps the signal monotone — including the
    /// case of two observations carrying the same timestamp but different
    /// sizes.
    async fn handle_observation(
        &self,
        observation: SizeObservation,
    ) {
        let forward = {
            let mut last = self.last_observation.lock().await;
            match *last {
                Some(previous) if observation.ts <= previous.ts => false,
                _ => {
                    *last = Some(observation);
                    true
                }
            }
        };
        if forward {
            self.fan_out(observation);
            // Push back the next poll: fresh data just arrived.
            let _ = self.poll_reset_tx.send(());
        }
    }

    /// Enqueues the observation for every active task.
    fn fan_out(
        &self,
        observation: SizeObservation,
    ) {
        let tasks = self.tasks.read();
        for task in tasks.values() {
            if !task.is_active() {
                continue;
            }
            let delivery = Delivery {
                task: Arc::clone(task),
                observation,
            };
            if self.delivery_tx.send(delivery).is_err() {
                // Worker gone: the subscriber is shutting down.
                break;
            }
        }
    }

    /// Applies deliveries one at a time, serializing observation delivery
    /// for this stream.
    async fn delivery_worker(
        mut delivery_rx: mpsc::UnboundedReceiver<Delivery>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                delivery = delivery_rx.recv() => match delivery {
                    Some(Delivery { task, observation }) => task.received(observation).await,
                    None => break,
                }
            }
        }
    }

    /// Fallback polling. A reset restarts the delay, so only `polling_delay`
    /// of silence triggers a probe; a poll is skipped entirely while no task
    /// is active. A failed probe is logged and dropped — the next
    /// notification or poll recovers.
    async fn polling_loop(
        self: Arc<Self>,
        mut poll_reset_rx: mpsc::UnboundedReceiver<()>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                reset = poll_reset_rx.recv() => match reset {
                    Some(()) => continue,
                    None => break,
                },

                _ = sleep(self.polling_delay) => {
                    if self.active_tasks.load(Ordering::SeqCst) == 0 {
                        continue;
                    }
                    match self.probe.probe(&self.stream).await {
                        Ok(observation) => self.handle_observation(observation).await,
                        Err(err) => {
                            warn!(stream = %self.stream, error = %err, "stream size poll failed");
                        }
                    }
                }
            }
        }
    }

    /// Forwards feed events into the shared observation path.
    async fn notification_loop(
        self: Arc<Self>,
        mut subscription: NotificationSubscription,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                event = subscription.events_mut().recv() => match event {
                    Some(notification) => self.handle_observation(notification.into()).await,
                    None => {
                        debug!(stream = %self.stream, "notification feed closed");
                        break;
                    }
                }
            }
        }
        // The subscription drops here, releasing the feed registration.
    }
}

#[cfg(test)]
impl StreamSubscriber {
    pub(crate) fn active_task_count(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub(crate) fn tasks_snapshot(&self) -> Vec<Arc<ScheduleTask>> {
        self.tasks.read().values().cloned().collect()
    }

    pub(crate) async fn last_observation_for_test(&self) -> Option<SizeObservation> {
        *self.last_observation.lock().await
    }
}
