//! Queue actor: owns the job store and makes every admission decision.
//!
//! All mutations arrive as [`QueueCmd`] messages and are applied one at a
//! time by a single task, so the "count active, compare to limit, dispatch"
//! sequence can never interleave with another dispatch. Uploads run as
//! separate tasks and report progress and completion back through the same
//! channel. Readers get a [`QueueSnapshot`] through a watch channel that is
//! refreshed after every scheduling pass.

use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, Instant, MissedTickBehavior},
};

use super::{
    retry::RetryPolicy,
    stats::Stats,
    store::{JobPatch, JobStore},
};
use crate::{
    jobs::{FilePayload, Job, JobId, JobStatus},
    transfer::{ProgressFn, Transfer, TransferError, UploadReceipt},
};

const CMD_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Ceiling on jobs dispatched to the executor at once.
    pub max_concurrent_uploads: usize,
    /// Backoff schedule and retry cap.
    pub retry: RetryPolicy,
    /// Re-arm failed jobs automatically while retries remain.
    pub auto_retry: bool,
    /// Period of the safety scheduling tick.
    pub tick: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: 2,
            retry: RetryPolicy::default(),
            auto_retry: true,
            tick: Duration::from_secs(1),
        }
    }
}

/// Result of a manual retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The job is `Retrying` and will be queued again after `delay`.
    Scheduled { delay: Duration },
    /// The job already used all of its retries; nothing changed.
    LimitReached,
    /// The job is not in the `Failed` state; nothing changed.
    NotRetryable,
    /// No job with that id (stale handle); nothing changed.
    NotFound,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Added { count: usize },
    Started { id: JobId, name: String },
    Completed { id: JobId, name: String, result_id: String },
    /// `retry_in` is set when an automatic retry was scheduled.
    Failed {
        id: JobId,
        name: String,
        error: String,
        retry_in: Option<Duration>,
    },
    RetryScheduled { id: JobId, name: String, delay: Duration },
    RetryLimitReached { id: JobId, name: String },
    RetriedAll { count: usize },
    Removed { id: JobId, name: String },
    Cleared { count: usize },
    Paused,
    Resumed,
}

/// Observable queue state, republished after every change.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub jobs: Vec<Job>,
    pub stats: Stats,
    pub paused: bool,
}

/// The queue task is gone (runtime shutting down).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("upload queue has shut down")]
    Closed,
}

/// Messages processed by the queue task.
enum QueueCmd {
    AddFiles {
        payloads: Vec<FilePayload>,
        respond: oneshot::Sender<Vec<JobId>>,
    },
    Remove {
        id: JobId,
        respond: oneshot::Sender<bool>,
    },
    Retry {
        id: JobId,
        respond: oneshot::Sender<RetryOutcome>,
    },
    RetryAllFailed {
        respond: oneshot::Sender<usize>,
    },
    ClearCompleted {
        respond: oneshot::Sender<usize>,
    },
    /// `None` toggles. Responds with the new flag.
    SetPaused {
        paused: Option<bool>,
        respond: oneshot::Sender<bool>,
    },
    Progress {
        id: JobId,
        percent: u8,
    },
    Finished {
        id: JobId,
        result: Result<UploadReceipt, TransferError>,
    },
    RetryDue {
        id: JobId,
    },
}

/// Cloneable handle to the queue task.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::Sender<QueueCmd>,
    state: watch::Receiver<QueueSnapshot>,
}

impl UploadQueue {
    /// Start the queue task on the current runtime.
    pub fn spawn(
        opts: QueueOptions,
        transfer: Arc<dyn Transfer>,
    ) -> (Self, mpsc::Receiver<QueueEvent>) {
        let (tx, rx) = mpsc::channel(CMD_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(QueueSnapshot::default());

        let scheduler = Scheduler::new(opts, transfer, tx.downgrade(), events_tx, state_tx);
        tokio::spawn(scheduler.run(rx));

        (
            Self {
                tx,
                state: state_rx,
            },
            events_rx,
        )
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> QueueCmd,
    ) -> Result<T, QueueError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(make(respond))
            .await
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }

    /// Append payloads as `Queued` jobs; returns their ids in order.
    pub async fn add_files(&self, payloads: Vec<FilePayload>) -> Result<Vec<JobId>, QueueError> {
        self.request(|respond| QueueCmd::AddFiles { payloads, respond })
            .await
    }

    /// Stop tracking a job. A running upload is not aborted; its slot frees
    /// up when it returns. Returns `false` for unknown ids.
    pub async fn remove_file(&self, id: JobId) -> Result<bool, QueueError> {
        self.request(|respond| QueueCmd::Remove { id, respond }).await
    }

    /// Manually retry a failed job.
    pub async fn retry_file(&self, id: JobId) -> Result<RetryOutcome, QueueError> {
        self.request(|respond| QueueCmd::Retry { id, respond }).await
    }

    /// Retry every failed job that still has retries left; returns how many.
    pub async fn retry_all_failed(&self) -> Result<usize, QueueError> {
        self.request(|respond| QueueCmd::RetryAllFailed { respond })
            .await
    }

    /// Drop all completed jobs; returns how many.
    pub async fn clear_completed(&self) -> Result<usize, QueueError> {
        self.request(|respond| QueueCmd::ClearCompleted { respond })
            .await
    }

    pub async fn pause(&self) -> Result<(), QueueError> {
        self.set_paused(Some(true)).await.map(|_| ())
    }

    pub async fn resume(&self) -> Result<(), QueueError> {
        self.set_paused(Some(false)).await.map(|_| ())
    }

    /// Flip the pause flag; returns the new value.
    pub async fn toggle_pause(&self) -> Result<bool, QueueError> {
        self.set_paused(None).await
    }

    async fn set_paused(&self, paused: Option<bool>) -> Result<bool, QueueError> {
        self.request(|respond| QueueCmd::SetPaused { paused, respond })
            .await
    }

    /// Copy of the latest published state.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.borrow().clone()
    }

    pub fn stats(&self) -> Stats {
        self.state.borrow().stats
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }

    /// Receiver that is notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.state.clone()
    }
}

/// State owned by the queue task.
struct Scheduler {
    store: JobStore,
    /// Jobs handed to the executor and not yet reported back. Tracked apart
    /// from `status` so removed-but-running uploads still hold their slot.
    active: HashSet<JobId>,
    paused: bool,
    opts: QueueOptions,
    transfer: Arc<dyn Transfer>,
    /// Weak so the task stops once every external handle is dropped.
    inbox: mpsc::WeakSender<QueueCmd>,
    events: mpsc::Sender<QueueEvent>,
    state: watch::Sender<QueueSnapshot>,
    dirty: bool,
}

impl Scheduler {
    fn new(
        opts: QueueOptions,
        transfer: Arc<dyn Transfer>,
        inbox: mpsc::WeakSender<QueueCmd>,
        events: mpsc::Sender<QueueEvent>,
        state: watch::Sender<QueueSnapshot>,
    ) -> Self {
        Self {
            store: JobStore::new(),
            active: HashSet::new(),
            paused: false,
            opts,
            transfer,
            inbox,
            events,
            state,
            dirty: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<QueueCmd>) {
        tracing::info!(
            "upload queue started: max_concurrent={} max_retries={} auto_retry={}",
            self.opts.max_concurrent_uploads,
            self.opts.retry.max_attempts,
            self.opts.auto_retry
        );
        let mut tick = time::interval_at(Instant::now() + self.opts.tick, self.opts.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = tick.tick() => {}
            }
            // Reactive pass after every message, safety pass on every tick.
            self.schedule_now();
            self.publish();
        }
        tracing::info!("upload queue stopped");
    }

    fn handle(&mut self, cmd: QueueCmd) {
        match cmd {
            QueueCmd::AddFiles { payloads, respond } => {
                let ids = self.add(payloads);
                let _ = respond.send(ids);
            }
            QueueCmd::Remove { id, respond } => {
                let _ = respond.send(self.remove(id));
            }
            QueueCmd::Retry { id, respond } => {
                let _ = respond.send(self.retry(id));
            }
            QueueCmd::RetryAllFailed { respond } => {
                let _ = respond.send(self.retry_all_failed());
            }
            QueueCmd::ClearCompleted { respond } => {
                let _ = respond.send(self.clear_completed());
            }
            QueueCmd::SetPaused { paused, respond } => {
                let _ = respond.send(self.set_paused(paused));
            }
            QueueCmd::Progress { id, percent } => self.on_progress(id, percent),
            QueueCmd::Finished { id, result } => self.on_finished(id, result),
            QueueCmd::RetryDue { id } => self.on_retry_due(id),
        }
    }

    /// Dispatch queued jobs in store order until the ceiling is reached.
    fn schedule_now(&mut self) {
        if self.paused {
            return;
        }
        let free = self
            .opts
            .max_concurrent_uploads
            .saturating_sub(self.active.len());
        if free == 0 {
            return;
        }
        let next: Vec<(JobId, Arc<FilePayload>)> = self
            .store
            .by_status(JobStatus::Queued)
            .take(free)
            .map(|j| (j.id, j.payload.clone()))
            .collect();
        for (id, payload) in next {
            self.dispatch(id, payload);
        }
    }

    fn dispatch(&mut self, id: JobId, payload: Arc<FilePayload>) {
        let Some(inbox) = self.inbox.upgrade() else {
            return;
        };
        self.active.insert(id);
        self.store.update(
            id,
            JobPatch::status(JobStatus::Uploading)
                .progress(0)
                .error(None),
        );
        self.dirty = true;
        tracing::info!("upload started: {} ({id})", payload.name);
        self.emit(QueueEvent::Started {
            id,
            name: payload.name.clone(),
        });

        let transfer = self.transfer.clone();
        tokio::spawn(async move {
            let reporter = inbox.clone();
            let progress: ProgressFn = Arc::new(move |percent| {
                // A full inbox drops the update; a later one supersedes it.
                let _ = reporter.try_send(QueueCmd::Progress { id, percent });
            });
            let result = transfer.upload(&payload, progress).await;
            let _ = inbox.send(QueueCmd::Finished { id, result }).await;
        });
    }

    fn add(&mut self, payloads: Vec<FilePayload>) -> Vec<JobId> {
        let ids = self.store.add(payloads.into_iter().map(Arc::new));
        if !ids.is_empty() {
            self.dirty = true;
            tracing::info!("{} file(s) added to upload queue", ids.len());
            self.emit(QueueEvent::Added { count: ids.len() });
        }
        ids
    }

    fn remove(&mut self, id: JobId) -> bool {
        let Some(job) = self.store.remove(id) else {
            tracing::debug!("remove ignored: unknown job {id}");
            return false;
        };
        self.dirty = true;
        if self.active.contains(&id) {
            tracing::info!(
                "removed {} while uploading; slot held until it returns",
                job.name()
            );
        } else {
            tracing::info!("removed {}", job.name());
        }
        self.emit(QueueEvent::Removed {
            id,
            name: job.name().to_string(),
        });
        true
    }

    fn retry(&mut self, id: JobId) -> RetryOutcome {
        let Some(job) = self.store.get(id) else {
            tracing::debug!("retry ignored: unknown job {id}");
            return RetryOutcome::NotFound;
        };
        if job.status != JobStatus::Failed {
            return RetryOutcome::NotRetryable;
        }
        let name = job.name().to_string();
        let retry_count = job.retry_count;
        if !self.opts.retry.can_retry(retry_count) {
            tracing::warn!("{name} has reached maximum retry attempts");
            self.emit(QueueEvent::RetryLimitReached { id, name });
            return RetryOutcome::LimitReached;
        }
        let delay = self.arm_retry(id, retry_count);
        tracing::info!("retrying {name} in {}ms", delay.as_millis());
        self.emit(QueueEvent::RetryScheduled { id, name, delay });
        RetryOutcome::Scheduled { delay }
    }

    fn retry_all_failed(&mut self) -> usize {
        let retry = self.opts.retry;
        let eligible: Vec<(JobId, u32)> = self
            .store
            .by_status(JobStatus::Failed)
            .filter(|j| retry.can_retry(j.retry_count))
            .map(|j| (j.id, j.retry_count))
            .collect();
        for &(id, retry_count) in &eligible {
            self.arm_retry(id, retry_count);
        }
        if !eligible.is_empty() {
            tracing::info!("retrying {} failed upload(s)", eligible.len());
            self.emit(QueueEvent::RetriedAll {
                count: eligible.len(),
            });
        }
        eligible.len()
    }

    /// `Failed -> Retrying`, then `Queued` once the backoff elapses.
    fn arm_retry(&mut self, id: JobId, retry_count: u32) -> Duration {
        let delay = self.opts.retry.backoff_delay(retry_count);
        self.store.update(
            id,
            JobPatch::status(JobStatus::Retrying)
                .retry_count(retry_count + 1)
                .progress(0)
                .error(None),
        );
        self.dirty = true;

        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(QueueCmd::RetryDue { id }).await;
            }
        });
        delay
    }

    fn clear_completed(&mut self) -> usize {
        let n = self.store.clear_completed();
        if n > 0 {
            self.dirty = true;
            tracing::info!("cleared {n} completed upload(s)");
            self.emit(QueueEvent::Cleared { count: n });
        }
        n
    }

    fn set_paused(&mut self, paused: Option<bool>) -> bool {
        let next = paused.unwrap_or(!self.paused);
        if next != self.paused {
            self.paused = next;
            self.dirty = true;
            if next {
                tracing::info!("upload queue paused");
                self.emit(QueueEvent::Paused);
            } else {
                tracing::info!("upload queue resumed");
                self.emit(QueueEvent::Resumed);
            }
        }
        next
    }

    fn on_progress(&mut self, id: JobId, percent: u8) {
        let Some(job) = self.store.get(id) else {
            return;
        };
        if job.status != JobStatus::Uploading {
            return;
        }
        // 100 is reserved for a confirmed completion.
        let percent = percent.min(99);
        if percent > job.progress {
            self.store.update(id, JobPatch::default().progress(percent));
            self.dirty = true;
        }
    }

    fn on_finished(&mut self, id: JobId, result: Result<UploadReceipt, TransferError>) {
        self.active.remove(&id);
        let Some(job) = self.store.get(id) else {
            tracing::debug!("result for removed job {id} dropped");
            return;
        };
        let name = job.name().to_string();
        let retry_count = job.retry_count;
        self.dirty = true;

        match result {
            Ok(receipt) => {
                tracing::info!("{name} uploaded successfully as {}", receipt.id);
                self.store.update(
                    id,
                    JobPatch::status(JobStatus::Completed)
                        .progress(100)
                        .error(None)
                        .result_id(Some(receipt.id.clone())),
                );
                self.emit(QueueEvent::Completed {
                    id,
                    name,
                    result_id: receipt.id,
                });
            }
            Err(err) => {
                let error = err.to_string();
                tracing::warn!("{name}: {error}");
                self.store.update(
                    id,
                    JobPatch::status(JobStatus::Failed)
                        .progress(0)
                        .error(Some(error.clone())),
                );
                let retry_in = (self.opts.auto_retry && self.opts.retry.can_retry(retry_count))
                    .then(|| self.arm_retry(id, retry_count));
                if let Some(delay) = retry_in {
                    tracing::info!("auto-retry {name} in {}ms", delay.as_millis());
                }
                self.emit(QueueEvent::Failed {
                    id,
                    name,
                    error,
                    retry_in,
                });
            }
        }
    }

    fn on_retry_due(&mut self, id: JobId) {
        let is_waiting = self
            .store
            .get(id)
            .is_some_and(|j| j.status == JobStatus::Retrying);
        if is_waiting {
            self.store.update(id, JobPatch::status(JobStatus::Queued));
            self.dirty = true;
        }
    }

    fn emit(&self, ev: QueueEvent) {
        if let Err(e) = self.events.try_send(ev) {
            tracing::debug!("queue event dropped: {e}");
        }
    }

    fn publish(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let jobs = self.store.all().to_vec();
        let stats = Stats::from_jobs(&jobs);
        self.state.send_replace(QueueSnapshot {
            jobs,
            stats,
            paused: self.paused,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(120);

    /// One upload the test can observe and settle.
    struct Call {
        name: String,
        at: Instant,
        progress: ProgressFn,
        done: oneshot::Sender<Result<UploadReceipt, TransferError>>,
    }

    impl Call {
        fn succeed(self, result_id: &str) {
            let _ = self.done.send(Ok(UploadReceipt {
                id: result_id.into(),
                ..Default::default()
            }));
        }

        fn fail(self, err: TransferError) {
            let _ = self.done.send(Err(err));
        }
    }

    /// Transfer that parks each upload until the test settles it.
    struct GatedTransfer {
        calls: mpsc::UnboundedSender<Call>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GatedTransfer {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
            let (tx, calls) = mpsc::unbounded_channel();
            let transfer = Arc::new(Self {
                calls: tx,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });
            (transfer, calls)
        }
    }

    #[async_trait]
    impl Transfer for GatedTransfer {
        async fn upload(
            &self,
            payload: &FilePayload,
            progress: ProgressFn,
        ) -> Result<UploadReceipt, TransferError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let (done, rx) = oneshot::channel();
            let _ = self.calls.send(Call {
                name: payload.name.clone(),
                at: Instant::now(),
                progress,
                done,
            });
            let result = rx
                .await
                .unwrap_or_else(|_| Err(TransferError::Network("test dropped call".into())));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    struct Harness {
        queue: UploadQueue,
        state: watch::Receiver<QueueSnapshot>,
        events: mpsc::Receiver<QueueEvent>,
        calls: mpsc::UnboundedReceiver<Call>,
        transfer: Arc<GatedTransfer>,
        limit: usize,
    }

    impl Harness {
        fn new(opts: QueueOptions) -> Self {
            let (transfer, calls) = GatedTransfer::new();
            let (queue, events) = UploadQueue::spawn(opts, transfer.clone());
            let state = queue.subscribe();
            Self {
                queue,
                state,
                events,
                calls,
                transfer,
                limit: opts.max_concurrent_uploads,
            }
        }

        fn with_limits(max_concurrent: usize, max_retries: u32) -> Self {
            Self::new(QueueOptions {
                max_concurrent_uploads: max_concurrent,
                retry: RetryPolicy::new(max_retries),
                ..QueueOptions::default()
            })
        }

        async fn add(&self, names: &[&str]) -> Vec<JobId> {
            let payloads = names.iter().map(|n| payload(n)).collect();
            self.queue.add_files(payloads).await.unwrap()
        }

        async fn next_call(&mut self) -> Call {
            timeout(WAIT, self.calls.recv())
                .await
                .expect("no upload started")
                .expect("transfer dropped")
        }

        /// Wait for a published snapshot matching `pred`. Every snapshot
        /// seen on the way must respect the concurrency ceiling.
        async fn wait_until(&mut self, pred: impl Fn(&QueueSnapshot) -> bool) -> QueueSnapshot {
            let limit = self.limit;
            timeout(
                WAIT,
                self.state.wait_for(|s| {
                    assert!(s.stats.uploading <= limit, "ceiling broken: {:?}", s.stats);
                    pred(s)
                }),
            )
            .await
            .expect("state never matched")
            .expect("queue closed")
            .clone()
        }

        fn assert_idle(&mut self) {
            assert!(self.calls.try_recv().is_err(), "unexpected upload started");
        }

        fn drain_events(&mut self) -> Vec<QueueEvent> {
            let mut out = vec![];
            while let Ok(ev) = self.events.try_recv() {
                out.push(ev);
            }
            out
        }
    }

    fn payload(name: &str) -> FilePayload {
        FilePayload {
            path: name.into(),
            name: name.to_string(),
            size: 100,
            content_type: "image/png".into(),
        }
    }

    fn find_job(s: &QueueSnapshot, id: JobId) -> Option<&Job> {
        s.jobs.iter().find(|j| j.id == id)
    }

    fn statuses(s: &QueueSnapshot) -> Vec<JobStatus> {
        s.jobs.iter().map(|j| j.status).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn two_slots_three_jobs_end_to_end() {
        use JobStatus::*;
        let mut h = Harness::with_limits(2, 3);
        let ids = h.add(&["a.png", "b.png", "c.png"]).await;

        let s = h.wait_until(|s| s.stats.uploading == 2).await;
        assert_eq!(statuses(&s), [Uploading, Uploading, Queued]);
        assert_eq!(
            s.stats,
            Stats {
                total: 3,
                uploading: 2,
                completed: 0,
                failed: 0,
                queued: 1
            }
        );

        let a = h.next_call().await;
        let b = h.next_call().await;
        assert_eq!((a.name.as_str(), b.name.as_str()), ("a.png", "b.png"));
        h.assert_idle();

        a.succeed("remote-a");
        let s = h.wait_until(|s| s.stats.completed == 1 && s.stats.uploading == 2).await;
        assert_eq!(statuses(&s), [Completed, Uploading, Uploading]);
        assert_eq!(s.stats.queued, 0);
        let done = find_job(&s, ids[0]).unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.result_id.as_deref(), Some("remote-a"));

        let c = h.next_call().await;
        assert_eq!(c.name, "c.png");
        b.succeed("remote-b");
        c.succeed("remote-c");

        let s = h.wait_until(|s| s.stats.completed == 3).await;
        assert_eq!(s.stats.total, 3);
        assert_eq!(h.queue.stats(), s.stats);
        assert_eq!(s.stats.uploading + s.stats.failed + s.stats.queued, 0);
        assert_eq!(h.transfer.peak.load(Ordering::SeqCst), 2);

        let events = h.drain_events();
        assert_eq!(events[0], QueueEvent::Added { count: 3 });
        let completed = events
            .iter()
            .filter(|e| matches!(e, QueueEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_slot_admits_in_fifo_order() {
        let mut h = Harness::with_limits(1, 3);
        h.add(&["a", "b"]).await;
        h.add(&["c"]).await;

        let mut order = vec![];
        for _ in 0..3 {
            let call = h.next_call().await;
            h.assert_idle();
            order.push(call.name.clone());
            call.succeed("ok");
        }
        assert_eq!(order, ["a", "b", "c"]);
        h.wait_until(|s| s.stats.completed == 3).await;
        assert_eq!(h.transfer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_holds_under_mixed_outcomes() {
        let mut h = Harness::with_limits(3, 1);
        let names: Vec<String> = (0..10).map(|i| format!("f{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        h.add(&names).await;

        // Every job fails once, then succeeds on its retry.
        let mut settled = 0;
        let mut failed_once = HashSet::new();
        while settled < 10 {
            let call = h.next_call().await;
            if failed_once.insert(call.name.clone()) {
                call.fail(TransferError::Timeout);
            } else {
                call.succeed("ok");
                settled += 1;
            }
        }
        let s = h.wait_until(|s| s.stats.completed == 10).await;
        assert!(s.jobs.iter().all(|j| j.retry_count == 1));
        assert!(h.transfer.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_retries_stop_at_the_cap() {
        let mut h = Harness::with_limits(2, 2);
        let id = h.add(&["flaky.pdf"]).await[0];

        let mut starts = vec![];
        for _ in 0..3 {
            let call = h.next_call().await;
            starts.push(call.at);
            call.fail(TransferError::Network("connection reset".into()));
        }

        let s = h
            .wait_until(|s| find_job(&s, id).is_some_and(|j| j.status == JobStatus::Failed))
            .await;
        let job = find_job(&s, id).unwrap();
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.progress, 0);
        assert_eq!(
            job.error.as_deref(),
            Some("Network error: connection reset")
        );
        // Backoff of 1s then 2s between attempts.
        assert!(starts[1] - starts[0] >= Duration::from_millis(1000));
        assert!(starts[2] - starts[1] >= Duration::from_millis(2000));

        // Terminal: a manual retry is refused and changes nothing.
        assert_eq!(
            h.queue.retry_file(id).await.unwrap(),
            RetryOutcome::LimitReached
        );
        assert_eq!(h.queue.retry_all_failed().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.assert_idle();
        let job = find_job(&h.queue.snapshot(), id).cloned().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 2);

        let events = h.drain_events();
        assert!(events.contains(&QueueEvent::RetryLimitReached {
            id,
            name: "flaky.pdf".into()
        }));
        let auto: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                QueueEvent::Failed { retry_in, .. } => Some(*retry_in),
                _ => None,
            })
            .collect();
        assert_eq!(
            auto,
            [
                Some(Duration::from_millis(1000)),
                Some(Duration::from_millis(2000)),
                None
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_retry_walks_the_state_machine() {
        let mut h = Harness::new(QueueOptions {
            max_concurrent_uploads: 1,
            retry: RetryPolicy::new(2),
            auto_retry: false,
            tick: Duration::from_secs(1),
        });
        let id = h.add(&["doc.pdf"]).await[0];

        h.next_call().await.fail(TransferError::Http {
            status: 500,
            message: "HTTP 500".into(),
        });
        let s = h
            .wait_until(|s| find_job(&s, id).is_some_and(|j| j.status == JobStatus::Failed))
            .await;
        assert_eq!(find_job(&s, id).unwrap().retry_count, 0);
        assert_eq!(find_job(&s, id).unwrap().error.as_deref(), Some("HTTP 500"));
        assert_eq!(s.stats.failed, 1);

        let out = h.queue.retry_file(id).await.unwrap();
        assert_eq!(
            out,
            RetryOutcome::Scheduled {
                delay: Duration::from_millis(1000)
            }
        );
        let s = h
            .wait_until(|s| find_job(&s, id).is_some_and(|j| j.status == JobStatus::Retrying))
            .await;
        let job = find_job(&s, id).unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.error.is_none());
        assert_eq!(s.stats.queued, 1);

        // Second attempt starts after the delay, fails again.
        h.next_call().await.fail(TransferError::MalformedResponse);
        h.wait_until(|s| {
            find_job(&s, id)
                .is_some_and(|j| j.status == JobStatus::Failed && j.retry_count == 1)
        })
        .await;

        assert_eq!(h.queue.retry_all_failed().await.unwrap(), 1);
        h.next_call().await.fail(TransferError::Timeout);
        let s = h
            .wait_until(|s| {
                find_job(&s, id)
                    .is_some_and(|j| j.status == JobStatus::Failed && j.retry_count == 2)
            })
            .await;
        assert_eq!(find_job(&s, id).unwrap().error.as_deref(), Some("Upload timeout"));

        assert_eq!(h.queue.retry_all_failed().await.unwrap(), 0);
        assert_eq!(
            h.queue.retry_file(id).await.unwrap(),
            RetryOutcome::LimitReached
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_of_non_failed_or_unknown_job_is_a_no_op() {
        let mut h = Harness::with_limits(1, 3);
        let ids = h.add(&["a", "b"]).await;
        h.wait_until(|s| s.stats.uploading == 1).await;

        assert_eq!(
            h.queue.retry_file(ids[0]).await.unwrap(),
            RetryOutcome::NotRetryable
        );
        assert_eq!(
            h.queue.retry_file(ids[1]).await.unwrap(),
            RetryOutcome::NotRetryable
        );
        assert_eq!(
            h.queue.retry_file(uuid::Uuid::new_v4()).await.unwrap(),
            RetryOutcome::NotFound
        );
        assert!(!h.queue.remove_file(uuid::Uuid::new_v4()).await.unwrap());
        let s = h.queue.snapshot();
        assert!(s.jobs.iter().all(|j| j.retry_count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn paused_queue_dispatches_nothing() {
        let mut h = Harness::with_limits(2, 3);
        assert!(!h.queue.is_paused());
        h.queue.pause().await.unwrap();
        h.wait_until(|s| s.paused).await;
        assert!(h.queue.is_paused());

        h.add(&["a", "b"]).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.assert_idle();
        let s = h.wait_until(|s| s.stats.total == 2).await;
        assert_eq!(statuses(&s), [JobStatus::Queued, JobStatus::Queued]);

        h.queue.resume().await.unwrap();
        let first = h.next_call().await;
        let second = h.next_call().await;
        assert_eq!((first.name.as_str(), second.name.as_str()), ("a", "b"));
        let s = h.wait_until(|s| !s.paused && s.stats.uploading == 2).await;
        assert_eq!(s.stats.queued, 0);
        assert!(!h.queue.is_paused());
        assert_eq!(h.queue.stats().uploading, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_lets_running_uploads_finish() {
        let mut h = Harness::with_limits(1, 3);
        h.add(&["a", "b"]).await;
        let a = h.next_call().await;

        assert!(h.queue.toggle_pause().await.unwrap());
        a.succeed("done-a");
        let s = h.wait_until(|s| s.stats.completed == 1).await;
        assert!(s.paused);
        assert_eq!(s.stats.queued, 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        h.assert_idle();

        assert!(!h.queue.toggle_pause().await.unwrap());
        assert_eq!(h.next_call().await.name, "b");

        let events = h.drain_events();
        assert!(events.contains(&QueueEvent::Paused));
        assert!(events.contains(&QueueEvent::Resumed));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_completed_removes_only_completed() {
        let mut h = Harness::with_limits(2, 0);
        let ids = h.add(&["ok", "bad"]).await;
        for _ in 0..2 {
            let call = h.next_call().await;
            if call.name == "ok" {
                call.succeed("r1");
            } else {
                call.fail(TransferError::Timeout);
            }
        }
        h.wait_until(|s| s.stats.completed == 1 && s.stats.failed == 1)
            .await;

        assert_eq!(h.queue.clear_completed().await.unwrap(), 1);
        let s = h.wait_until(|s| s.stats.total == 1).await;
        assert_eq!(s.jobs[0].id, ids[1]);
        assert_eq!(s.jobs[0].status, JobStatus::Failed);

        assert_eq!(h.queue.clear_completed().await.unwrap(), 0);
        assert_eq!(h.queue.snapshot().stats.total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_upload_keeps_its_slot_until_it_returns() {
        let mut h = Harness::with_limits(1, 3);
        let ids = h.add(&["a", "b"]).await;
        let a = h.next_call().await;

        assert!(h.queue.remove_file(ids[0]).await.unwrap());
        let s = h.wait_until(|s| s.stats.total == 1).await;
        assert_eq!(s.jobs[0].status, JobStatus::Queued);
        tokio::time::sleep(Duration::from_secs(5)).await;
        h.assert_idle();

        a.succeed("orphan");
        assert_eq!(h.next_call().await.name, "b");
        let s = h.wait_until(|s| s.stats.uploading == 1).await;
        assert_eq!(s.stats.total, 1);
        assert!(s.jobs.iter().all(|j| j.result_id.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_queued_job_prevents_dispatch() {
        let mut h = Harness::with_limits(1, 3);
        let ids = h.add(&["a", "b", "c"]).await;
        let a = h.next_call().await;
        assert!(h.queue.remove_file(ids[1]).await.unwrap());
        a.succeed("ra");
        assert_eq!(h.next_call().await.name, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_retrying_job_cancels_its_retry() {
        let mut h = Harness::with_limits(2, 3);
        let ids = h.add(&["waiting", "done"]).await;
        for _ in 0..2 {
            let call = h.next_call().await;
            if call.name == "done" {
                call.succeed("rd");
            } else {
                call.fail(TransferError::Timeout);
            }
        }
        h.wait_until(|s| {
            s.stats.completed == 1
                && find_job(&s, ids[0]).is_some_and(|j| j.status == JobStatus::Retrying)
        })
        .await;

        assert!(h.queue.remove_file(ids[0]).await.unwrap());
        assert!(h.queue.remove_file(ids[1]).await.unwrap());
        h.wait_until(|s| s.stats.total == 0).await;

        // Well past the 1s backoff: the timer fires for a job that is gone.
        tokio::time::sleep(Duration::from_secs(30)).await;
        h.assert_idle();
        let s = h.queue.snapshot();
        assert_eq!(s.stats.total, 0);
        assert_eq!(s.stats.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_failed_job_forgets_it() {
        let mut h = Harness::new(QueueOptions {
            max_concurrent_uploads: 1,
            auto_retry: false,
            ..QueueOptions::default()
        });
        let id = h.add(&["broken.pdf"]).await[0];
        h.next_call().await.fail(TransferError::MalformedResponse);
        h.wait_until(|s| s.stats.failed == 1).await;

        assert!(h.queue.remove_file(id).await.unwrap());
        h.wait_until(|s| s.stats.total == 0).await;
        assert_eq!(h.queue.retry_file(id).await.unwrap(), RetryOutcome::NotFound);
        assert_eq!(h.queue.retry_all_failed().await.unwrap(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.assert_idle();
    }

    #[tokio::test(start_paused = true)]
    async fn safety_tick_dispatches_without_a_trigger() {
        let (transfer, mut calls) = GatedTransfer::new();
        let (tx, rx) = mpsc::channel(CMD_CAPACITY);
        let (events_tx, _events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (state_tx, _state_rx) = watch::channel(QueueSnapshot::default());
        let opts = QueueOptions {
            tick: Duration::from_secs(10),
            ..QueueOptions::default()
        };
        let mut scheduler = Scheduler::new(opts, transfer, tx.downgrade(), events_tx, state_tx);
        // Seeded behind the inbox, so no message ever prompts a pass.
        scheduler.store.add([Arc::new(payload("late.png"))]);
        let start = Instant::now();
        tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(calls.try_recv().is_err());

        let call = timeout(WAIT, calls.recv()).await.unwrap().unwrap();
        assert_eq!(call.name, "late.png");
        assert!(call.at - start >= Duration::from_secs(10));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_monotonic_and_capped_below_completion() {
        let mut h = Harness::with_limits(1, 3);
        let id = h.add(&["big.png"]).await[0];
        let call = h.next_call().await;

        (call.progress)(40);
        h.wait_until(|s| find_job(&s, id).is_some_and(|j| j.progress == 40))
            .await;
        (call.progress)(100);
        let s = h
            .wait_until(|s| find_job(&s, id).is_some_and(|j| j.progress == 99))
            .await;
        assert_eq!(find_job(&s, id).unwrap().status, JobStatus::Uploading);

        (call.progress)(30);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(find_job(&h.queue.snapshot(), id).unwrap().progress, 99);

        call.succeed("big");
        let s = h
            .wait_until(|s| find_job(&s, id).is_some_and(|j| j.status == JobStatus::Completed))
            .await;
        assert_eq!(find_job(&s, id).unwrap().progress, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_task_stops_when_handles_drop() {
        let h = Harness::with_limits(1, 3);
        let mut state = h.state.clone();
        drop(h);
        let closed = timeout(WAIT, async { while state.changed().await.is_ok() {} }).await;
        assert!(closed.is_ok());
    }
}
