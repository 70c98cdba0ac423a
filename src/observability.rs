//! Structured, product-facing observability events.
//!
//! Per the injected-sink design note, every component takes an
//! `Arc<dyn EventSink>` at construction instead of reaching for a global
//! subscriber. `tracing` spans (via `#[instrument]`) remain the
//! developer-facing channel for "what happened and how long did it take";
//! `EventSink` is the separate, stable channel for "what business event
//! occurred", aimed at callers who want to react to bus/queue/router/cache
//! activity without parsing log lines.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// A structured field value. Deliberately restricted to plain values —
/// events never carry stack traces or opaque blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A UTF-8 string field.
    Text(String),
    /// A signed integer field.
    Int(i64),
    /// A floating point field.
    Float(f64),
    /// A boolean field.
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A single structured observability event, named and with plain-value
/// fields only (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event name, e.g. `message_enqueued`.
    pub name: &'static str,
    /// Structured fields attached to the event.
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl Event {
    /// Builds a new named event with no fields.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Attaches a field, builder-style.
    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key, value.into()));
        self
    }
}

/// Sink every component emits structured events to.
///
/// Implementations must not block the caller for long: the bus, queue,
/// cache, and router all call `emit` from inside a held lock in some paths
/// (stats snapshots excepted), so a slow sink stalls the component.
pub trait EventSink: Send + Sync {
    /// Records one structured event.
    fn emit(&self, event: Event);
}

/// A sink that discards every event. The default when a caller does not
/// need observability.
#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// A sink that records every event in memory, for tests to assert against.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    /// Builds an empty recording sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a snapshot of every event recorded so far, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("recording sink mutex poisoned").clone()
    }

    /// Returns the events whose name matches `name`.
    #[must_use]
    pub fn events_named(&self, name: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().expect("recording sink mutex poisoned").push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_should_capture_events_in_order() {
        let sink = RecordingSink::new();
        sink.emit(Event::new("a").with("x", 1_i64));
        sink.emit(Event::new("b").with("y", "hello"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "a");
        assert_eq!(events[1].name, "b");
    }

    #[test]
    fn test_events_named_should_filter_by_name() {
        let sink = RecordingSink::new();
        sink.emit(Event::new("cache_hit"));
        sink.emit(Event::new("cache_miss"));
        sink.emit(Event::new("cache_hit"));

        assert_eq!(sink.events_named("cache_hit").len(), 2);
    }

    #[test]
    fn test_noop_sink_should_not_panic() {
        let sink = NoopSink;
        sink.emit(Event::new("anything"));
    }
}
