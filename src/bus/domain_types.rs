//! Domain types for the message bus: messages, subscriptions, routing
//! rules, and the dead-letter record.

use std::collections::HashMap;

use bytes::Bytes;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::domain_types::{ParticipantName, Timestamp};
use crate::bus::traits::BusError;

/// Unique identifier for a message.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier returned by `subscribe`, used to remove exactly that handler
/// later via `unsubscribe`.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into
))]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Generates a new random handler id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Who a message is addressed to: a named participant, the broadcast
/// sentinel, or the control sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A single named participant.
    Participant(ParticipantName),
    /// Every currently-subscribed participant (or the routing table's
    /// target set for the message's kind).
    Broadcast,
    /// The bus's own control plane; never delivered to a handler.
    Control,
}

/// The four message kinds the routing table can hold distinct participant
/// sets for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A request expecting a response.
    Request,
    /// A response to a prior request.
    Response,
    /// A fire-and-forget notification.
    Event,
    /// An imperative instruction.
    Command,
}

pub use crate::domain_types::Priority;

/// A routed message.
///
/// Identity (id, sender, recipient, kind, priority, payload, correlation id,
/// timeout) is immutable once built; the bus tracks retry count and enqueue
/// time separately in its own delivery envelope, never mutating the message
/// a caller handed it.
#[derive(Debug, Clone)]
pub struct Message {
    id: MessageId,
    sender: ParticipantName,
    recipient: Recipient,
    kind: MessageKind,
    priority: Priority,
    payload: Bytes,
    correlation_id: Option<MessageId>,
    timeout_ms: Option<u64>,
    created_at: Timestamp,
}

impl Message {
    /// Builds a new point-to-point or control message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidMessage`] if a required attribute is
    /// missing (§4.1); kept fallible for that validation even though no
    /// field here currently exercises it.
    pub fn new(
        sender: ParticipantName,
        recipient: Recipient,
        kind: MessageKind,
        priority: Priority,
        payload: impl Into<Bytes>,
    ) -> Result<Self, BusError> {
        Ok(Self {
            id: MessageId::generate(),
            sender,
            recipient,
            kind,
            priority,
            payload: payload.into(),
            correlation_id: None,
            timeout_ms: None,
            created_at: Timestamp::now(),
        })
    }

    /// Builds a broadcast message addressed to every subscribed participant
    /// (or the routing table's target set for `kind`).
    ///
    /// # Errors
    ///
    /// Propagates [`Message::new`]'s validation.
    pub fn broadcast(
        sender: ParticipantName,
        kind: MessageKind,
        priority: Priority,
        payload: impl Into<Bytes>,
    ) -> Result<Self, BusError> {
        Self::new(sender, Recipient::Broadcast, kind, priority, payload)
    }

    /// Attaches a correlation id, builder-style.
    #[must_use]
    pub fn with_correlation_id(mut self, id: MessageId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Attaches a per-message delivery timeout in milliseconds, builder-style.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// The message's identity.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The sending participant.
    #[must_use]
    pub fn sender(&self) -> &ParticipantName {
        &self.sender
    }

    /// Who this message is addressed to.
    #[must_use]
    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    /// The message's kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The message's priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// The opaque payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The correlation id, if one was attached.
    #[must_use]
    pub fn correlation_id(&self) -> Option<MessageId> {
        self.correlation_id
    }

    /// The per-message timeout in milliseconds, if one was attached.
    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// When this message was constructed.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

/// A terminally-failed message retained in the dead-letter log.
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// The message that could not be delivered.
    pub message: Message,
    /// The final error text.
    pub error: String,
    /// When the message was dead-lettered.
    pub failed_at: Timestamp,
}

/// Per-participant circuit breaker state, as returned by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Calls are allowed through.
    Closed,
    /// Calls fail fast.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

/// Immutable snapshot returned by `MessageBus::stats()`.
#[derive(Debug, Clone)]
pub struct BusStats {
    /// Number of messages currently waiting for dispatch.
    pub queue_length: usize,
    /// Number of distinct subscribed participants.
    pub subscriber_count: usize,
    /// Number of entries in the dead-letter log.
    pub dead_letter_size: usize,
    /// Circuit breaker state per participant.
    pub breaker_states: HashMap<String, BreakerState>,
    /// Whether the dispatch loop is currently running.
    pub processing: bool,
}
