//! Handler capability and bus-local error kinds (§4.1).

use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

use crate::bus::domain_types::Message;

/// Errors internal to the message bus that do not map onto a shared
/// [`crate::error::Error`] kind named in the taxonomy (§7).
#[derive(Debug, Error)]
pub enum BusError {
    /// The dispatcher task is no longer running (e.g. after `shutdown`).
    #[error("message bus dispatcher is no longer running")]
    DispatcherStopped,

    /// A message was constructed with a required attribute absent or
    /// inconsistent (§3, §4.1).
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Human-readable reason.
        reason: String,
    },

    /// A subscribed handler reported a failure. Carried verbatim so the
    /// retry policy's substring match (§4.1) sees exactly the text the
    /// handler produced.
    #[error("{0}")]
    HandlerFailed(String),
}

/// A participant's message handler.
///
/// Implementations report success or failure; the bus checks the failure
/// text's error kind against the non-retryable set (§4.1) to decide whether
/// to retry or dead-letter. Handlers must be reentrant: the bus does not
/// serialize concurrent invocations for the same participant (§5).
#[async_trait]
pub trait BusHandler: Send + Sync {
    /// Handles one delivered message, reporting success or a failure reason.
    async fn handle(&self, message: &Message) -> Result<(), String>;
}

/// Adapts a plain async closure into a [`BusHandler`], for callers who do
/// not want to name a type for a one-off subscription.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> BusHandler for FnHandler<F>
where
    F: Fn(&Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<(), String> {
        (self.0)(message).await
    }
}
