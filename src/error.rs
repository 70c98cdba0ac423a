//! Crate-wide error taxonomy.
//!
//! Errors are tagged by kind, not modeled as a type hierarchy: every fallible
//! operation in this crate returns a variant of [`Error`], and every
//! component-level error type composes into it via `#[from]`. Transient kinds
//! (`BreakerOpen`, `RateLimited`, `Timeout`, `ProviderError`) are the ones
//! callers may reasonably retry; the rest are terminal.

use std::collections::HashMap;

use thiserror::Error;

use crate::admission::AdmissionError;
use crate::bus::BusError;
use crate::cache::CacheError;
use crate::depth::DepthError;
use crate::provider::ProviderError as ProviderRouterError;

/// Structured context attached to a user-visible failure.
///
/// Never a stack trace: a flat map of plain-value fields a UI layer can
/// render or log without knowing this crate's internals.
pub type ErrorContext = HashMap<String, String>;

/// Top-level error for every fallible operation this crate exposes.
#[derive(Debug, Error)]
pub enum Error {
    /// A message was routed without a required attribute.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Human-readable reason.
        reason: String,
    },

    /// A message named a participant the bus has no record of.
    #[error("participant not found: {participant}")]
    ParticipantNotFound {
        /// The participant name that was looked up.
        participant: String,
    },

    /// Input failed a domain validation rule.
    #[error("validation error: {field} - {reason}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A call was rejected because the participant's circuit breaker is open.
    #[error("circuit breaker open for {participant}")]
    BreakerOpen {
        /// The participant whose breaker is open.
        participant: String,
    },

    /// A provider call was rejected by its rate limit window.
    #[error("rate limited: {provider}")]
    RateLimited {
        /// The provider that is currently rate limited.
        provider: String,
    },

    /// An operation did not complete within its deadline.
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the operation ran before being abandoned.
        elapsed_ms: u64,
    },

    /// A provider call failed for a reason specific to that provider.
    #[error("provider error: {provider} - {reason}")]
    ProviderError {
        /// The provider that failed.
        provider: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Enqueue was rejected because a hard capacity bound was reached.
    #[error("queue overflow: at capacity ({capacity})")]
    QueueOverflow {
        /// The capacity bound that was reached.
        capacity: usize,
    },

    /// Every candidate provider failed and no static fallback matched.
    #[error("all providers failed: {last_error}")]
    AllProvidersFailed {
        /// The last recorded provider error text.
        last_error: String,
    },

    /// A depth-ladder request asked for a level outside the valid range.
    #[error("no content at depth {level} (max {max_level})")]
    NoContentAtDepth {
        /// The requested level.
        level: i32,
        /// The ladder's configured maximum level.
        max_level: u32,
    },

    /// A message-bus specific error that does not map onto a shared kind.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// An admission-queue specific error that does not map onto a shared kind.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// A provider-router specific error that does not map onto a shared kind.
    #[error(transparent)]
    Provider(#[from] ProviderRouterError),

    /// A content-cache specific error that does not map onto a shared kind.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A depth-ladder specific error that does not map onto a shared kind.
    #[error(transparent)]
    Depth(#[from] DepthError),

    /// Configuration failed validation at construction time.
    #[error("configuration error: {field} - {reason}")]
    Config {
        /// The offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Snapshot (de)serialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying `serde_json` error.
        #[from]
        source: serde_json::Error,
    },

    /// An I/O failure while persisting configuration or a cache snapshot.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// A stable, `Display`-independent tag for this error's variant, used in
    /// observability events and logging. The bus's retry policy (§4.1, §7)
    /// checks the non-retryable substrings (`InvalidMessage`,
    /// `ParticipantNotFound`, `ValidationError`) against the error's own
    /// `Display` text instead, since that text is what a handler actually
    /// reports.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::InvalidMessage { .. } => "InvalidMessage",
            Error::ParticipantNotFound { .. } => "ParticipantNotFound",
            Error::ValidationError { .. } => "ValidationError",
            Error::BreakerOpen { .. } => "BreakerOpen",
            Error::RateLimited { .. } => "RateLimited",
            Error::Timeout { .. } => "Timeout",
            Error::ProviderError { .. } => "ProviderError",
            Error::QueueOverflow { .. } => "QueueOverflow",
            Error::AllProvidersFailed { .. } => "AllProvidersFailed",
            Error::NoContentAtDepth { .. } => "NoContentAtDepth",
            Error::Bus(_) => "Bus",
            Error::Admission(_) => "Admission",
            Error::Provider(_) => "Provider",
            Error::Cache(_) => "Cache",
            Error::Depth(_) => "Depth",
            Error::Config { .. } => "Config",
            Error::Serialization { .. } => "Serialization",
            Error::Io { .. } => "Io",
        }
    }

    /// True for kinds this crate itself treats as retryable (§7): `BreakerOpen`,
    /// `RateLimited`, `Timeout`, and `ProviderError`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::BreakerOpen { .. }
                | Error::RateLimited { .. }
                | Error::Timeout { .. }
                | Error::ProviderError { .. }
        )
    }

    /// Builds the structured context map a UI layer can render.
    #[must_use]
    pub fn context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new();
        match self {
            Error::InvalidMessage { reason } => {
                ctx.insert("reason".into(), reason.clone());
            }
            Error::ParticipantNotFound { participant } => {
                ctx.insert("participant".into(), participant.clone());
            }
            Error::ValidationError { field, reason } => {
                ctx.insert("field".into(), field.clone());
                ctx.insert("reason".into(), reason.clone());
            }
            Error::BreakerOpen { participant } => {
                ctx.insert("participant".into(), participant.clone());
            }
            Error::RateLimited { provider } => {
                ctx.insert("provider".into(), provider.clone());
            }
            Error::Timeout { elapsed_ms } => {
                ctx.insert("elapsed_ms".into(), elapsed_ms.to_string());
            }
            Error::ProviderError { provider, reason } => {
                ctx.insert("provider".into(), provider.clone());
                ctx.insert("reason".into(), reason.clone());
            }
            Error::QueueOverflow { capacity } => {
                ctx.insert("capacity".into(), capacity.to_string());
            }
            Error::AllProvidersFailed { last_error } => {
                ctx.insert("last_error".into(), last_error.clone());
            }
            Error::NoContentAtDepth { level, max_level } => {
                ctx.insert("level".into(), level.to_string());
                ctx.insert("max_level".into(), max_level.to_string());
            }
            _ => {}
        }
        ctx
    }
}

/// Convenience alias used throughout this crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-retryable error kinds (§4.1, §7): a bus or admission retry policy
/// dead-letters or rejects on first occurrence instead of backing off.
pub const NON_RETRYABLE_KINDS: [&str; 3] =
    ["InvalidMessage", "ParticipantNotFound", "ValidationError"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name_matches_non_retryable_list_for_invalid_message() {
        let err = Error::InvalidMessage {
            reason: "missing sender".to_string(),
        };
        assert!(NON_RETRYABLE_KINDS.contains(&err.kind_name()));
    }

    #[test]
    fn test_kind_name_excludes_transient_kinds() {
        let err = Error::Timeout { elapsed_ms: 50 };
        assert!(!NON_RETRYABLE_KINDS.contains(&err.kind_name()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_context_carries_structured_fields_not_stack_traces() {
        let err = Error::ProviderError {
            provider: "openai".to_string(),
            reason: "503".to_string(),
        };
        let ctx = err.context();
        assert_eq!(ctx.get("provider").map(String::as_str), Some("openai"));
        assert_eq!(ctx.get("reason").map(String::as_str), Some("503"));
    }
}
