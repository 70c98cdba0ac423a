//! Message Bus (§4.1): priority dispatch, subscription registry,
//! per-participant circuit breaking, retry-with-backoff, and dead-lettering.
//!
//! A single background dispatcher task drains a priority heap and delivers
//! to subscribed handlers; point-to-point delivery picks the first
//! registered handler deterministically, broadcast delivery races every
//! target's handler set concurrently and is best-effort (§9 design note).

pub mod domain_types;
pub mod traits;

pub use domain_types::{
    BreakerState, BusStats, DeadLetterEntry, HandlerId, Message, MessageId, MessageKind,
    Priority, Recipient,
};
pub use traits::{BusError, BusHandler, FnHandler};

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::config::CoreConfig;
use crate::domain_types::ParticipantName;
use crate::error::{Error, NON_RETRYABLE_KINDS};
use crate::observability::{Event, EventSink};

#[derive(Debug, Default)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_probe_active: bool,
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Closed
    }
}

#[derive(Debug)]
struct Envelope {
    message: Message,
    retry_count: u32,
    sequence: u64,
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}
impl Eq for Envelope {}

impl PartialOrd for Envelope {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Envelope {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap by priority weight; ties broken so the earlier-enqueued
        // (lower sequence) envelope compares greater and pops first.
        self.message
            .priority()
            .weight()
            .cmp(&other.message.priority().weight())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Inner {
    config: CoreConfig,
    sink: Arc<dyn EventSink>,
    subscribers: DashMap<ParticipantName, Vec<(HandlerId, Arc<dyn BusHandler>)>>,
    routing_rules: DashMap<MessageKind, Vec<ParticipantName>>,
    breakers: DashMap<ParticipantName, Mutex<BreakerEntry>>,
    heap: Mutex<BinaryHeap<Envelope>>,
    sequence: AtomicU64,
    notify: Notify,
    dead_letters: Mutex<Vec<DeadLetterEntry>>,
    processing: AtomicBool,
    running: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Asynchronous, priority-ordered message bus with per-participant circuit
/// breaking and dead-lettering (§4.1).
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    /// Builds a bus and starts its background dispatcher loop.
    #[must_use]
    pub fn new(config: CoreConfig, sink: Arc<dyn EventSink>) -> Self {
        let inner = Arc::new(Inner {
            config,
            sink,
            subscribers: DashMap::new(),
            routing_rules: DashMap::new(),
            breakers: DashMap::new(),
            heap: Mutex::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            notify: Notify::new(),
            dead_letters: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
            running: AtomicBool::new(true),
            dispatcher: Mutex::new(None),
        });
        let dispatcher_inner = Arc::clone(&inner);
        let handle = tokio::spawn(Self::dispatch_loop(dispatcher_inner));
        *inner.dispatcher.lock().expect("dispatcher mutex poisoned") = Some(handle);
        Self { inner }
    }

    /// Registers a handler for `participant`, returning the id needed to
    /// `unsubscribe` it later. Creates the participant's circuit breaker if
    /// this is its first handler.
    #[instrument(skip(self, handler))]
    pub fn subscribe(
        &self,
        participant: ParticipantName,
        handler: Arc<dyn BusHandler>,
    ) -> HandlerId {
        let id = HandlerId::generate();
        self.inner
            .subscribers
            .entry(participant.clone())
            .or_default()
            .push((id, handler));
        self.inner
            .breakers
            .entry(participant.clone())
            .or_insert_with(|| Mutex::new(BreakerEntry::default()));
        let handler_count = self
            .inner
            .subscribers
            .get(&participant)
            .map_or(0, |entry| entry.len());
        self.inner.sink.emit(
            Event::new("participant_subscribed")
                .with("participant", participant.to_string())
                .with("handlerCount", handler_count as i64),
        );
        id
    }

    /// Removes a handler registration. Idempotent: unsubscribing an id that
    /// was already removed (or never existed) is a no-op. Destroys the
    /// participant's circuit breaker once its handler set becomes empty.
    #[instrument(skip(self))]
    pub fn unsubscribe(&self, participant: &ParticipantName, handler_id: HandlerId) {
        let became_empty = self
            .inner
            .subscribers
            .get_mut(participant)
            .map(|mut entry| {
                entry.retain(|(id, _)| *id != handler_id);
                entry.is_empty()
            });
        if became_empty == Some(true) {
            self.inner.subscribers.remove(participant);
            self.inner.breakers.remove(participant);
            self.inner.sink.emit(
                Event::new("participant_unsubscribed").with("participant", participant.to_string()),
            );
        }
    }

    /// Removes every handler registered for `participant` in one call, and
    /// destroys its circuit breaker. A thin wrapper over repeated
    /// [`Self::unsubscribe`] calls with no new semantics.
    #[instrument(skip(self))]
    pub fn unsubscribe_all(&self, participant: &ParticipantName) {
        let handler_ids: Vec<HandlerId> = self
            .inner
            .subscribers
            .get(participant)
            .map(|entry| entry.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default();
        for id in handler_ids {
            self.unsubscribe(participant, id);
        }
    }

    /// Replaces the participant set consulted when a broadcast of `kind`
    /// resolves its targets (§4.1). Replace-only: no partial mutation.
    pub fn set_routing_rule(&self, kind: MessageKind, participants: Vec<ParticipantName>) {
        self.inner.routing_rules.insert(kind, participants);
    }

    /// Validates and enqueues a message for asynchronous delivery. Does not
    /// block on delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueOverflow`] if the bus is already holding
    /// `max_queue_size` messages.
    #[instrument(skip(self, message))]
    pub fn route(&self, message: Message) -> Result<MessageId, Error> {
        let id = message.id();
        let mut heap = self.inner.heap.lock().expect("heap mutex poisoned");
        let capacity = self.inner.config.max_queue_size.into_inner();
        if heap.len() >= capacity {
            return Err(Error::QueueOverflow { capacity });
        }
        let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let priority_weight = message.priority().weight();
        heap.push(Envelope {
            message,
            retry_count: 0,
            sequence,
        });
        let queue_size = heap.len();
        drop(heap);
        self.inner.notify.notify_one();
        self.inner.sink.emit(
            Event::new("message_enqueued")
                .with("id", id.to_string())
                .with("queueSize", queue_size as i64)
                .with("priority", i64::from(priority_weight)),
        );
        Ok(id)
    }

    /// Convenience for routing a message already addressed to the broadcast
    /// sentinel; equivalent to calling [`Self::route`] directly.
    ///
    /// # Errors
    ///
    /// See [`Self::route`].
    pub fn broadcast(&self, message: Message) -> Result<MessageId, Error> {
        self.route(message)
    }

    /// Returns a point-in-time snapshot of bus state; never a live aggregate.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let queue_length = self.inner.heap.lock().expect("heap mutex poisoned").len();
        let subscriber_count = self.inner.subscribers.len();
        let dead_letter_size = self
            .inner
            .dead_letters
            .lock()
            .expect("dead letter mutex poisoned")
            .len();
        let breaker_states = self
            .inner
            .breakers
            .iter()
            .map(|entry| {
                let state = entry.value().lock().expect("breaker mutex poisoned").state;
                (entry.key().to_string(), state)
            })
            .collect();
        BusStats {
            queue_length,
            subscriber_count,
            dead_letter_size,
            breaker_states,
            processing: self.inner.processing.load(Ordering::SeqCst),
        }
    }

    /// Returns every dead-lettered message recorded so far, in the order
    /// they were dead-lettered.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner
            .dead_letters
            .lock()
            .expect("dead letter mutex poisoned")
            .clone()
    }

    /// Stops the background dispatcher. In-flight deliveries are not
    /// cancelled; no further messages are drained from the heap.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    async fn dispatch_loop(inner: Arc<Inner>) {
        loop {
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }
            let next = { inner.heap.lock().expect("heap mutex poisoned").pop() };
            let Some(envelope) = next else {
                inner.processing.store(false, Ordering::SeqCst);
                inner.notify.notified().await;
                continue;
            };
            inner.processing.store(true, Ordering::SeqCst);
            Self::process_envelope(&inner, envelope).await;
        }
    }

    async fn process_envelope(inner: &Arc<Inner>, envelope: Envelope) {
        match envelope.message.recipient().clone() {
            Recipient::Control => {
                inner.sink.emit(
                    Event::new("control_message").with("message", envelope.message.id().to_string()),
                );
            }
            Recipient::Broadcast => {
                let targets = Self::resolve_broadcast_targets(inner, envelope.message.kind());
                let message = envelope.message.clone();
                let outcomes = futures::future::join_all(targets.into_iter().map(|participant| {
                    let inner = Arc::clone(inner);
                    let message = message.clone();
                    async move {
                        let start = Instant::now();
                        let result = Self::deliver_to_participant(&inner, &message, &participant).await;
                        (participant, result, start.elapsed())
                    }
                }))
                .await;
                for (participant, result, elapsed) in outcomes {
                    match result {
                        Ok(()) => {
                            inner.sink.emit(
                                Event::new("message_delivered")
                                    .with("id", message.id().to_string())
                                    .with("recipient", participant.to_string())
                                    .with("elapsedMs", elapsed.as_millis() as i64),
                            );
                        }
                        Err(err) => {
                            Self::dead_letter(inner, message.clone(), err.to_string());
                        }
                    }
                }
            }
            Recipient::Participant(ref name) => {
                let start = Instant::now();
                let result = Self::deliver_to_participant(inner, &envelope.message, name).await;
                match result {
                    Ok(()) => {
                        inner.sink.emit(
                            Event::new("message_delivered")
                                .with("id", envelope.message.id().to_string())
                                .with("recipient", name.to_string())
                                .with("elapsedMs", start.elapsed().as_millis() as i64),
                        );
                    }
                    Err(err) => Self::handle_delivery_failure(inner, envelope, err).await,
                }
            }
        }
    }

    fn resolve_broadcast_targets(inner: &Inner, kind: MessageKind) -> Vec<ParticipantName> {
        inner.routing_rules.get(&kind).map_or_else(
            || inner.subscribers.iter().map(|e| e.key().clone()).collect(),
            |rule| rule.clone(),
        )
    }

    async fn deliver_to_participant(
        inner: &Arc<Inner>,
        message: &Message,
        participant: &ParticipantName,
    ) -> Result<(), Error> {
        let handler = {
            let entry = inner
                .subscribers
                .get(participant)
                .ok_or_else(|| Error::ParticipantNotFound {
                    participant: participant.to_string(),
                })?;
            entry
                .first()
                .map(|(_, h)| Arc::clone(h))
                .ok_or_else(|| Error::ParticipantNotFound {
                    participant: participant.to_string(),
                })?
        };
        Self::breaker_gate(inner, participant)?;

        let deadline = message
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or_else(|| inner.config.default_handler_timeout_ms.as_duration());
        let start = Instant::now();
        match tokio::time::timeout(deadline, handler.handle(message)).await {
            Ok(Ok(())) => {
                Self::breaker_record_success(inner, participant);
                Ok(())
            }
            Ok(Err(reason)) => {
                Self::breaker_record_failure(inner, participant);
                Err(Error::Bus(BusError::HandlerFailed(reason)))
            }
            Err(_) => {
                Self::breaker_record_failure(inner, participant);
                Err(Error::Timeout {
                    elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn breaker_gate(inner: &Inner, participant: &ParticipantName) -> Result<(), Error> {
        let entry = inner
            .breakers
            .get(participant)
            .ok_or_else(|| Error::ParticipantNotFound {
                participant: participant.to_string(),
            })?;
        let mut guard = entry.lock().expect("breaker mutex poisoned");
        match guard.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if guard.half_open_probe_active {
                    Err(Error::BreakerOpen {
                        participant: participant.to_string(),
                    })
                } else {
                    guard.half_open_probe_active = true;
                    Ok(())
                }
            }
            BreakerState::Open => {
                let recovered = guard
                    .last_failure
                    .is_some_and(|t| t.elapsed() >= inner.config.breaker_recovery_ms.as_duration());
                if recovered {
                    guard.state = BreakerState::HalfOpen;
                    guard.half_open_probe_active = true;
                    inner.sink.emit(
                        Event::new("breaker_half_open")
                            .with("participant", participant.to_string()),
                    );
                    Ok(())
                } else {
                    Err(Error::BreakerOpen {
                        participant: participant.to_string(),
                    })
                }
            }
        }
    }

    fn breaker_record_success(inner: &Inner, participant: &ParticipantName) {
        if let Some(entry) = inner.breakers.get(participant) {
            let mut guard = entry.lock().expect("breaker mutex poisoned");
            let was_closed = guard.state == BreakerState::Closed;
            guard.state = BreakerState::Closed;
            guard.failure_count = 0;
            guard.half_open_probe_active = false;
            drop(guard);
            if !was_closed {
                inner.sink.emit(
                    Event::new("breaker_closed").with("participant", participant.to_string()),
                );
            }
        }
    }

    fn breaker_record_failure(inner: &Inner, participant: &ParticipantName) {
        if let Some(entry) = inner.breakers.get(participant) {
            let mut guard = entry.lock().expect("breaker mutex poisoned");
            guard.half_open_probe_active = false;
            let mut opened = false;
            match guard.state {
                BreakerState::HalfOpen => {
                    guard.state = BreakerState::Open;
                    guard.last_failure = Some(Instant::now());
                    opened = true;
                }
                BreakerState::Closed => {
                    guard.failure_count += 1;
                    if guard.failure_count >= inner.config.breaker_failure_threshold.into_inner() {
                        guard.state = BreakerState::Open;
                        guard.last_failure = Some(Instant::now());
                        opened = true;
                    }
                }
                BreakerState::Open => {
                    guard.last_failure = Some(Instant::now());
                }
            }
            let failure_count = guard.failure_count;
            drop(guard);
            if opened {
                inner.sink.emit(
                    Event::new("breaker_opened")
                        .with("participant", participant.to_string())
                        .with("consecutiveFailures", i64::from(failure_count)),
                );
            }
        }
    }

    async fn handle_delivery_failure(inner: &Arc<Inner>, envelope: Envelope, err: Error) {
        let text = err.to_string();
        inner.sink.emit(
            Event::new("message_delivery_failed")
                .with("id", envelope.message.id().to_string())
                .with(
                    "recipient",
                    match envelope.message.recipient() {
                        Recipient::Participant(name) => name.to_string(),
                        Recipient::Broadcast => "broadcast".to_string(),
                        Recipient::Control => "control".to_string(),
                    },
                )
                .with("error", text.clone()),
        );
        let non_retryable = NON_RETRYABLE_KINDS.iter().any(|kind| text.contains(kind));
        let retries_left =
            envelope.retry_count < u32::from(inner.config.max_retries.into_inner());
        if !non_retryable && retries_left {
            let attempt = envelope.retry_count;
            let delay = backoff_delay(attempt);
            let inner = Arc::clone(inner);
            let message = envelope.message;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let sequence = inner.sequence.fetch_add(1, Ordering::SeqCst);
                inner.heap.lock().expect("heap mutex poisoned").push(Envelope {
                    message,
                    retry_count: attempt + 1,
                    sequence,
                });
                inner.notify.notify_one();
            });
        } else {
            Self::dead_letter(inner, envelope.message, text);
        }
    }

    fn dead_letter(inner: &Inner, message: Message, error: String) {
        if !inner.config.enable_dead_letter {
            debug!("dead letter disabled, discarding terminally failed message");
            return;
        }
        let mut dead_letters = inner.dead_letters.lock().expect("dead letter mutex poisoned");
        dead_letters.push(DeadLetterEntry {
            message: message.clone(),
            error: error.clone(),
            failed_at: crate::domain_types::Timestamp::now(),
        });
        let queue_length = dead_letters.len();
        drop(dead_letters);
        inner.sink.emit(
            Event::new("message_dead_lettered")
                .with("id", message.id().to_string())
                .with("error", error)
                .with("dequeLength", queue_length as i64),
        );
        warn!(message_id = %message.id(), "message dead-lettered");
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1_000_u64.saturating_mul(1_u64 << attempt.min(20));
    Duration::from_millis(ms.min(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RecordingSink;
    use std::sync::atomic::AtomicUsize;

    fn participant(name: &str) -> ParticipantName {
        ParticipantName::try_new(name).unwrap()
    }

    struct AlwaysOk;
    #[async_trait::async_trait]
    impl BusHandler for AlwaysOk {
        async fn handle(&self, _message: &Message) -> Result<(), String> {
            Ok(())
        }
    }

    struct AlwaysFail(&'static str);
    #[async_trait::async_trait]
    impl BusHandler for AlwaysFail {
        async fn handle(&self, _message: &Message) -> Result<(), String> {
            Err(self.0.to_string())
        }
    }

    struct FlakyThenOk {
        fail_times: usize,
        calls: AtomicUsize,
    }
    #[async_trait::async_trait]
    impl BusHandler for FlakyThenOk {
        async fn handle(&self, _message: &Message) -> Result<(), String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    struct RecordingHandler {
        calls: Arc<AtomicUsize>,
        order: Arc<Mutex<Vec<String>>>,
    }
    #[async_trait::async_trait]
    impl BusHandler for RecordingHandler {
        async fn handle(&self, message: &Message) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order
                .lock()
                .unwrap()
                .push(format!("{:?}", message.priority()));
            Ok(())
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_priority_preemption_delivers_high_before_medium_before_low() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let bus = MessageBus::new(CoreConfig::testing(), Arc::new(crate::observability::NoopSink));
        let sender = participant("producer");
        let a = participant("a");

        bus.route(
            Message::new(sender.clone(), Recipient::Participant(a.clone()), MessageKind::Event, Priority::Low, &b"m1"[..])
                .unwrap(),
        )
        .unwrap();
        bus.route(
            Message::new(sender.clone(), Recipient::Participant(a.clone()), MessageKind::Event, Priority::High, &b"m2"[..])
                .unwrap(),
        )
        .unwrap();
        bus.route(
            Message::new(sender, Recipient::Participant(a.clone()), MessageKind::Event, Priority::Medium, &b"m3"[..])
                .unwrap(),
        )
        .unwrap();

        bus.subscribe(
            a,
            Arc::new(RecordingHandler {
                calls: Arc::new(AtomicUsize::new(0)),
                order: Arc::clone(&order),
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let observed = order.lock().unwrap().clone();
        assert_eq!(observed, vec!["High", "Medium", "Low"]);
    }

    #[tokio::test]
    async fn test_circuit_breaker_trips_after_threshold_and_recovers() {
        let mut config = CoreConfig::testing();
        config.breaker_failure_threshold = crate::config::BreakerFailureThreshold::try_new(3).unwrap();
        config.breaker_recovery_ms = crate::config::BreakerRecoveryMs::try_new(100).unwrap();
        config.max_retries = crate::config::MaxRetries::try_new(0).unwrap();
        let sink = RecordingSink::new();
        let bus = MessageBus::new(config, Arc::clone(&sink) as Arc<dyn EventSink>);
        let sender = participant("producer");
        let a = participant("a");
        bus.subscribe(a.clone(), Arc::new(AlwaysFail("boom")));

        for _ in 0..4 {
            bus.route(
                Message::new(sender.clone(), Recipient::Participant(a.clone()), MessageKind::Event, Priority::Medium, &b"x"[..])
                    .unwrap(),
            )
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let failures = sink.events_named("message_delivery_failed");
        assert_eq!(failures.len(), 4);
        let breaker_open_count = failures
            .iter()
            .filter(|e| {
                e.fields
                    .iter()
                    .any(|(k, v)| *k == "error" && v.to_string().contains("circuit breaker open"))
            })
            .count();
        assert_eq!(breaker_open_count, 1);
        assert_eq!(sink.events_named("breaker_opened").len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        bus.unsubscribe_all(&a);
        bus.subscribe(a.clone(), Arc::new(AlwaysOk));
        bus.route(
            Message::new(sender, Recipient::Participant(a), MessageKind::Event, Priority::Medium, &b"y"[..]).unwrap(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let delivered = sink.events_named("message_delivered");
        assert!(!delivered.is_empty());
    }

    #[tokio::test]
    async fn test_breaker_half_opens_after_recovery_and_closes_on_success() {
        let mut config = CoreConfig::testing();
        config.breaker_failure_threshold = crate::config::BreakerFailureThreshold::try_new(2).unwrap();
        config.breaker_recovery_ms = crate::config::BreakerRecoveryMs::try_new(50).unwrap();
        config.max_retries = crate::config::MaxRetries::try_new(0).unwrap();
        let sink = RecordingSink::new();
        let bus = MessageBus::new(config, Arc::clone(&sink) as Arc<dyn EventSink>);
        let sender = participant("producer");
        let a = participant("a");
        bus.subscribe(
            a.clone(),
            Arc::new(FlakyThenOk { fail_times: 2, calls: AtomicUsize::new(0) }),
        );

        for _ in 0..2 {
            bus.route(
                Message::new(sender.clone(), Recipient::Participant(a.clone()), MessageKind::Event, Priority::Medium, &b"x"[..])
                    .unwrap(),
            )
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sink.events_named("breaker_opened").len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        bus.route(
            Message::new(sender, Recipient::Participant(a), MessageKind::Event, Priority::Medium, &b"y"[..]).unwrap(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(sink.events_named("breaker_half_open").len(), 1);
        assert_eq!(sink.events_named("breaker_closed").len(), 1);
        assert!(!sink.events_named("message_delivered").is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_subscribers_completes_with_zero_deliveries() {
        let sink = RecordingSink::new();
        let bus = MessageBus::new(CoreConfig::testing(), Arc::clone(&sink) as Arc<dyn EventSink>);
        let sender = participant("producer");
        bus.broadcast(
            Message::broadcast(sender, MessageKind::Event, Priority::Medium, &b"hi"[..]).unwrap(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sink.events_named("message_delivery_failed").is_empty());
        assert!(sink.events_named("message_dead_lettered").is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_at_capacity_rejects_with_queue_overflow() {
        let mut config = CoreConfig::testing();
        config.max_queue_size = crate::config::MaxQueueSize::try_new(1).unwrap();
        let bus = MessageBus::new(config, Arc::new(crate::observability::NoopSink));
        bus.shutdown();
        let sender = participant("producer");
        let a = participant("a");
        bus.route(
            Message::new(sender.clone(), Recipient::Participant(a.clone()), MessageKind::Event, Priority::Medium, &b"1"[..])
                .unwrap(),
        )
        .unwrap();
        let result = bus.route(
            Message::new(sender, Recipient::Participant(a), MessageKind::Event, Priority::Medium, &b"2"[..]).unwrap(),
        );
        assert!(matches!(result, Err(Error::QueueOverflow { capacity: 1 })));
    }
}
