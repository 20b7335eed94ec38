//! Route handlers.
//!
//! A handler maps one inbound envelope to zero or more outbound envelopes.
//! Handlers return errors instead of panicking; the router additionally
//! catches panics and treats them like returned errors.
//!
//! ## Built-in Handlers
//!
//! - [`GithubWebhookHandler`]: push webhook -> one `commitPushed` per commit
//! - [`DeploymentNoticeHandler`]: deploy notice -> `commitDeployed`
//! - [`AnnotationHandler`]: commit events -> Grafana annotation payload
//! - [`ChatMessageHandler`]: commit events -> Slack message payload
//! - [`DeploySimulator`](crate::simulator::DeploySimulator): delayed
//!   `commitDeployed` derived from `commitPushed`
//!
//! ## Creating Custom Handlers
//!
//! ```rust,ignore
//! use herald::{Envelope, Handler, HandlerError};
//! use async_trait::async_trait;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
//!         Ok(vec![envelope.copy()])
//!     }
//! }
//! ```

pub mod deployment;
pub mod github;
pub mod grafana;
pub mod slack;

use crate::envelope::{Envelope, EventKind};
use crate::event::{CommitDeployed, CommitPushed};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::time::Duration;
use thiserror::Error;

pub use deployment::DeploymentNoticeHandler;
pub use github::GithubWebhookHandler;
pub use grafana::{Annotation, AnnotationHandler};
pub use slack::{ChatMessage, ChatMessageHandler};

/// Errors a handler can report for an envelope.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Payload is not the JSON shape the handler expects
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// Output could not be serialized
    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    /// A date-time field is not valid RFC 3339
    #[error("invalid timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// Advancing a timestamp left chrono's representable range
    #[error("timestamp '{value}' cannot be advanced by {delay:?}")]
    TimestampOverflow { value: String, delay: Duration },

    /// The `event_type` metadata names a kind this handler does not know
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The handler panicked; recovered by the router
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// A route's transformation step.
///
/// # Thread Safety
///
/// Handlers are shared across tasks and must be `Send + Sync`.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Transform one inbound envelope into the envelopes to publish, in order.
    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError>;
}

/// A decoded commit event, selected by the envelope's `event_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEvent {
    Pushed(CommitPushed),
    Deployed(CommitDeployed),
}

impl CommitEvent {
    /// Decode the payload according to the envelope's event kind.
    ///
    /// Kinds other than `commitPushed` and `commitDeployed` are rejected
    /// with [`HandlerError::UnknownEventType`].
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, HandlerError> {
        match envelope.event_kind() {
            EventKind::CommitPushed => envelope
                .decode()
                .map(CommitEvent::Pushed)
                .map_err(HandlerError::Decode),
            EventKind::CommitDeployed => envelope
                .decode()
                .map(CommitEvent::Deployed)
                .map_err(HandlerError::Decode),
            EventKind::Unknown(other) => Err(HandlerError::UnknownEventType(other)),
        }
    }

    pub fn commit_id(&self) -> &str {
        match self {
            CommitEvent::Pushed(e) => &e.id,
            CommitEvent::Deployed(e) => &e.id,
        }
    }

    pub fn occurred_on(&self) -> &str {
        match self {
            CommitEvent::Pushed(e) => &e.occurred_on,
            CommitEvent::Deployed(e) => &e.occurred_on,
        }
    }
}

/// Parse an RFC 3339 date-time such as `2024-01-01T10:00:00Z`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, HandlerError> {
    DateTime::parse_from_rfc3339(value).map_err(|source| HandlerError::Timestamp {
        value: value.to_string(),
        source,
    })
}
