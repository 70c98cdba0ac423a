//! Admission Queue (§4.2): a bounded-concurrency scheduler with a priority
//! heap, per-task timeout, exponential-backoff retry, and EMA statistics.
//!
//! Generic over the producer's result type `T`: a process typically owns one
//! `AdmissionQueue<T>` per kind of expensive downstream work (e.g. one for
//! provider-router generation results). Retries return a failed task to the
//! waiting heap after backoff rather than holding its concurrency slot open
//! (§9 design note) — `in_flight` counts only actively executing producers.

pub mod domain_types;

pub use domain_types::{
    AdmissionError, AdmissionTaskId, QueueStatistics, QueueStatus, TaskDetail, TaskPriority,
    TaskState,
};

use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::config::CoreConfig;
use crate::domain_types::ParticipantName;
use crate::error::Error;
use crate::observability::{Event, EventSink};

/// A boxed, `'static` future, matching the teacher's `async_trait`
/// boxed-future convention.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send>>;

/// The deferred producer an admission task wraps: re-invokable so a retry
/// can call it again from scratch.
pub trait TaskProducer<T>: Send + Sync {
    /// Produces the task's result, or fails with an error the queue will
    /// retry (subject to the task's retry budget) or surface to the caller.
    fn produce(&self) -> BoxFuture<T>;
}

impl<T, F, Fut> TaskProducer<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    fn produce(&self) -> BoxFuture<T> {
        Box::pin(self())
    }
}

/// Builder for a task to submit via [`AdmissionQueue::enqueue`].
pub struct TaskSpec<T> {
    producer: Arc<dyn TaskProducer<T>>,
    priority: TaskPriority,
    originator: Option<ParticipantName>,
    estimated_duration: Duration,
    max_retries: u32,
}

impl<T> TaskSpec<T> {
    /// Wraps a producer with default priority (5), no originator, and a
    /// 1-second estimated duration.
    pub fn new(producer: impl TaskProducer<T> + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
            priority: TaskPriority::default(),
            originator: None,
            estimated_duration: domain_types::default_estimated_duration(),
            max_retries: 3,
        }
    }

    /// Sets the task's priority, builder-style.
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches an originator id for priority escalation, builder-style.
    #[must_use]
    pub fn with_originator(mut self, originator: ParticipantName) -> Self {
        self.originator = Some(originator);
        self
    }

    /// Sets the estimated duration used to derive the execution deadline
    /// (`2 × estimated_duration`), builder-style.
    #[must_use]
    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = duration;
        self
    }

    /// Sets the retry budget, builder-style.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

struct QueuedTask<T> {
    id: AdmissionTaskId,
    priority: TaskPriority,
    originator: Option<ParticipantName>,
    original_enqueued_at: Instant,
    estimated_duration: Duration,
    retry_count: u32,
    max_retries: u32,
    producer: Arc<dyn TaskProducer<T>>,
    responder: oneshot::Sender<Result<T, Error>>,
    cancelled: Arc<AtomicBool>,
    sequence: u64,
}

impl<T> PartialEq for QueuedTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}
impl<T> Eq for QueuedTask<T> {}

impl<T> PartialOrd for QueuedTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedTask<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// A future resolving to the producer's result, returned by
/// [`AdmissionQueue::enqueue`]. Dropping it before it resolves is a
/// best-effort cancellation (§5): a still-waiting task is skipped instead of
/// executed; an in-flight producer keeps running to completion.
pub struct AdmissionHandle<T> {
    receiver: oneshot::Receiver<Result<T, Error>>,
    cancelled: Arc<AtomicBool>,
}

impl<T> AdmissionHandle<T> {
    /// Marks the task cancelled. If it has not yet been promoted off the
    /// waiting heap, the scheduler will skip it without running its
    /// producer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl<T> Future for AdmissionHandle<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or(Err(Error::Admission(AdmissionError::SchedulerStopped)))
        })
    }
}

struct Inner<T: Send + 'static> {
    config: CoreConfig,
    sink: Arc<dyn EventSink>,
    heap: Mutex<BinaryHeap<QueuedTask<T>>>,
    sequence: AtomicU64,
    notify: Notify,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    paused: AtomicBool,
    running: AtomicBool,
    stats: Mutex<QueueStatistics>,
    originator_priority: DashMap<ParticipantName, TaskPriority>,
    in_flight_started: DashMap<AdmissionTaskId, Instant>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded-concurrency, priority-ordered scheduler for expensive deferred
/// work (§4.2).
pub struct AdmissionQueue<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for AdmissionQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> AdmissionQueue<T> {
    /// Builds a queue and starts its background scheduler loop.
    #[must_use]
    pub fn new(config: CoreConfig, sink: Arc<dyn EventSink>) -> Self {
        let max_concurrent = config.max_concurrent_admissions.into_inner();
        let inner = Arc::new(Inner {
            config,
            sink,
            heap: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            notify: Notify::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            running: AtomicBool::new(true),
            stats: Mutex::new(QueueStatistics::default()),
            originator_priority: DashMap::new(),
            in_flight_started: DashMap::new(),
            scheduler: Mutex::new(None),
        });
        let scheduler_inner = Arc::clone(&inner);
        let handle = tokio::spawn(Self::scheduler_loop(scheduler_inner));
        *inner.scheduler.lock().expect("scheduler mutex poisoned") = Some(handle);
        Self { inner }
    }

    /// Submits a task, returning a handle resolving to its producer's
    /// result or the last error after retries are exhausted.
    #[instrument(skip(self, task))]
    pub fn enqueue(&self, task: TaskSpec<T>) -> AdmissionHandle<T> {
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let priority = task
            .originator
            .as_ref()
            .and_then(|o| self.inner.originator_priority.get(o).map(|p| *p))
            .unwrap_or(task.priority);
        let id = AdmissionTaskId::generate();
        let queued = QueuedTask {
            id,
            priority,
            originator: task.originator,
            original_enqueued_at: Instant::now(),
            estimated_duration: task.estimated_duration,
            retry_count: 0,
            max_retries: task.max_retries,
            producer: task.producer,
            responder: tx,
            cancelled: Arc::clone(&cancelled),
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst),
        };
        let depth = {
            let mut heap = self.inner.heap.lock().expect("heap mutex poisoned");
            heap.push(queued);
            heap.len()
        };
        self.inner
            .stats
            .lock()
            .expect("stats mutex poisoned")
            .record_enqueued(depth);
        self.inner.sink.emit(
            Event::new("task_enqueued")
                .with("taskId", id.to_string())
                .with("priority", priority.into_inner())
                .with("waiting", depth as i64),
        );
        self.inner.notify.notify_one();
        AdmissionHandle { receiver: rx, cancelled }
    }

    /// Reorders every still-waiting task belonging to `originator` to
    /// `new_priority`, and remembers the preference for tasks that
    /// originator submits afterward.
    pub fn set_priority_for_user(&self, originator: &ParticipantName, new_priority: TaskPriority) {
        self.inner
            .originator_priority
            .insert(originator.clone(), new_priority);
        let mut heap = self.inner.heap.lock().expect("heap mutex poisoned");
        let mut tasks: Vec<_> = std::mem::take(&mut *heap).into_vec();
        for task in &mut tasks {
            if task.originator.as_ref() == Some(originator) {
                task.priority = new_priority;
            }
        }
        *heap = BinaryHeap::from(tasks);
    }

    /// Stops admitting new tasks onto running slots. Already in-flight
    /// producers continue to completion.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes admission after [`Self::pause`].
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// A point-in-time snapshot of queue depth, in-flight count, and
    /// estimated wait.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let waiting = self.inner.heap.lock().expect("heap mutex poisoned").len();
        let in_flight = self.inner.in_flight.load(Ordering::SeqCst);
        let avg_processing_ms = self.inner.stats.lock().expect("stats mutex poisoned").avg_processing_ms;
        let max_concurrent = self.inner.config.max_concurrent_admissions.into_inner().max(1);
        let estimated_wait_ms =
            ((waiting as f64) * avg_processing_ms / (max_concurrent as f64)) as u64;
        QueueStatus {
            waiting,
            in_flight,
            estimated_wait_ms,
        }
    }

    /// Per-task snapshot of every waiting and in-flight task.
    #[must_use]
    pub fn details(&self) -> Vec<TaskDetail> {
        let mut details: Vec<TaskDetail> = self
            .inner
            .heap
            .lock()
            .expect("heap mutex poisoned")
            .iter()
            .map(|task| TaskDetail {
                id: task.id,
                state: TaskState::Waiting,
                age_ms: u64::try_from(task.original_enqueued_at.elapsed().as_millis())
                    .unwrap_or(u64::MAX),
                priority: task.priority,
                retry_count: task.retry_count,
            })
            .collect();
        details.extend(self.inner.in_flight_started.iter().map(|entry| TaskDetail {
            id: *entry.key(),
            state: TaskState::InFlight,
            age_ms: u64::try_from(entry.value().elapsed().as_millis()).unwrap_or(u64::MAX),
            priority: TaskPriority::default(),
            retry_count: 0,
        }));
        details
    }

    /// The queue's rolling statistics (§4.2).
    #[must_use]
    pub fn statistics(&self) -> QueueStatistics {
        *self.inner.stats.lock().expect("stats mutex poisoned")
    }

    /// Stops the background scheduler. Waiting tasks never resolve; their
    /// handles should be dropped or cancelled by the caller.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    async fn scheduler_loop(inner: Arc<Inner<T>>) {
        loop {
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }
            if inner.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }
            let Ok(permit) = Arc::clone(&inner.semaphore).acquire_owned().await else {
                return;
            };
            let next = { inner.heap.lock().expect("heap mutex poisoned").pop() };
            let Some(task) = next else {
                drop(permit);
                inner.notify.notified().await;
                continue;
            };
            inner.in_flight.fetch_add(1, Ordering::SeqCst);
            inner.in_flight_started.insert(task.id, Instant::now());
            tokio::spawn(Self::execute_task(Arc::clone(&inner), task, permit));
        }
    }

    async fn execute_task(
        inner: Arc<Inner<T>>,
        task: QueuedTask<T>,
        permit: OwnedSemaphorePermit,
    ) {
        if task.cancelled.load(Ordering::SeqCst) {
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            inner.in_flight_started.remove(&task.id);
            drop(permit);
            return;
        }
        let wait_ms =
            u64::try_from(task.original_enqueued_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        inner.stats.lock().expect("stats mutex poisoned").record_wait(wait_ms);

        let deadline = task.estimated_duration * 2;
        let start = Instant::now();
        let outcome = tokio::time::timeout(deadline, task.producer.produce()).await;
        let processing_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        inner.in_flight_started.remove(&task.id);
        drop(permit);

        let result = match outcome {
            Ok(Ok(value)) => {
                let mut stats = inner.stats.lock().expect("stats mutex poisoned");
                stats.record_processing(processing_ms);
                stats.record_completed();
                drop(stats);
                inner.sink.emit(
                    Event::new("task_completed")
                        .with("taskId", task.id.to_string())
                        .with("elapsedMs", processing_ms as i64),
                );
                let _ = task.responder.send(Ok(value));
                return;
            }
            Ok(Err(err)) => err,
            Err(_) => Error::Timeout {
                elapsed_ms: processing_ms,
            },
        };

        inner
            .stats
            .lock()
            .expect("stats mutex poisoned")
            .record_processing(processing_ms);

        if task.retry_count < task.max_retries {
            let attempt = task.retry_count;
            let delay = backoff_delay(attempt);
            let eligible_at_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            inner.sink.emit(
                Event::new("task_retry_scheduled")
                    .with("taskId", task.id.to_string())
                    .with("attempt", i64::from(attempt))
                    .with("eligibleAtMs", eligible_at_ms),
            );
            let mut next_task = task;
            next_task.retry_count = attempt + 1;
            next_task.sequence = inner.sequence.fetch_add(1, Ordering::SeqCst);
            let inner2 = Arc::clone(&inner);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let depth = {
                    let mut heap = inner2.heap.lock().expect("heap mutex poisoned");
                    heap.push(next_task);
                    heap.len()
                };
                inner2
                    .stats
                    .lock()
                    .expect("stats mutex poisoned")
                    .peak_queue_depth = inner2
                    .stats
                    .lock()
                    .expect("stats mutex poisoned")
                    .peak_queue_depth
                    .max(depth);
                inner2.notify.notify_one();
            });
        } else {
            inner.stats.lock().expect("stats mutex poisoned").record_failed();
            inner.sink.emit(
                Event::new("task_rejected")
                    .with("taskId", task.id.to_string())
                    .with("reason", result.to_string()),
            );
            let _ = task.responder.send(Err(result));
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1_000_u64.saturating_mul(1_u64 << attempt.min(20));
    Duration::from_millis(ms.min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn immediate_ok(value: i32) -> impl TaskProducer<i32> {
        move || {
            let value = value;
            async move { Ok(value) }
        }
    }

    #[tokio::test]
    async fn test_enqueue_resolves_with_producer_result() {
        let queue = AdmissionQueue::new(CoreConfig::testing(), Arc::new(crate::observability::NoopSink));
        let handle = queue.enqueue(TaskSpec::new(immediate_ok(42)));
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[test_log::test(tokio::test)]
    async fn test_in_flight_never_exceeds_max_concurrent() {
        let mut config = CoreConfig::testing();
        config.max_concurrent_admissions =
            crate::config::MaxConcurrentAdmissions::try_new(2).unwrap();
        let queue: AdmissionQueue<i32> =
            AdmissionQueue::new(config, Arc::new(crate::observability::NoopSink));
        let max_observed = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let current = Arc::clone(&current);
            let max_observed = Arc::clone(&max_observed);
            let producer = move || {
                let current = Arc::clone(&current);
                let max_observed = Arc::clone(&max_observed);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            };
            handles.push(queue.enqueue(
                TaskSpec::new(producer).with_estimated_duration(Duration::from_millis(40)),
            ));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_producer_exhausts_retries_then_rejects() {
        let mut config = CoreConfig::testing();
        config.max_retries = crate::config::MaxRetries::try_new(1).unwrap();
        let sink = crate::observability::RecordingSink::new();
        let queue: AdmissionQueue<i32> =
            AdmissionQueue::new(config, Arc::clone(&sink) as Arc<dyn EventSink>);
        let producer = || async {
            Err(Error::ProviderError {
                provider: "x".to_string(),
                reason: "boom".to_string(),
            })
        };
        let handle = queue.enqueue(
            TaskSpec::new(producer)
                .with_max_retries(1)
                .with_estimated_duration(Duration::from_millis(5)),
        );
        assert!(handle.await.is_err());
        assert_eq!(sink.events_named("task_enqueued").len(), 1);
        assert_eq!(sink.events_named("task_retry_scheduled").len(), 1);
        assert_eq!(sink.events_named("task_rejected").len(), 1);
    }

    #[tokio::test]
    async fn test_status_reports_waiting_and_in_flight() {
        let mut config = CoreConfig::testing();
        config.max_concurrent_admissions =
            crate::config::MaxConcurrentAdmissions::try_new(1).unwrap();
        let queue: AdmissionQueue<i32> =
            AdmissionQueue::new(config, Arc::new(crate::observability::NoopSink));
        let producer = || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(1)
        };
        let _h1 = queue.enqueue(TaskSpec::new(producer).with_estimated_duration(Duration::from_millis(100)));
        let _h2 = queue.enqueue(TaskSpec::new(producer).with_estimated_duration(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = queue.status();
        assert_eq!(status.in_flight, 1);
        assert_eq!(status.waiting, 1);
    }
}
