//! Dead letter topic for envelopes that keep failing.
//!
//! After a route exhausts its delivery attempts, the router hands the
//! envelope here instead of redelivering it forever. A copy is published to
//! the dead letter topic with the failure recorded in its metadata, and the
//! original delivery is acknowledged.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::dlq::DeadLetterQueue;
//!
//! let dlq = DeadLetterQueue::new(bus.clone(), "events.dlq");
//! dlq.add_failed_envelope(&envelope, "events-to-annotations", "status 502", 3).await?;
//! ```

use crate::envelope::Envelope;
use crate::transport::{Publisher, TransportError};
use std::sync::Arc;
use tracing::{error, info};

/// Default dead letter topic name
pub const DEFAULT_DEAD_LETTER_TOPIC: &str = "events.dlq";

/// Route that gave up on the envelope
pub const DLQ_ROUTE_KEY: &str = "dlq_route";

/// Error text from the last attempt
pub const DLQ_ERROR_KEY: &str = "dlq_error";

/// Number of attempts made
pub const DLQ_ATTEMPTS_KEY: &str = "dlq_attempts";

/// RFC 3339 time the envelope was dead-lettered
pub const DLQ_FAILED_AT_KEY: &str = "dlq_failed_at";

/// Publishes poison envelopes to a dedicated topic.
#[derive(Clone)]
pub struct DeadLetterQueue {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl DeadLetterQueue {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a copy of `envelope` annotated with the failure.
    ///
    /// Returns the id of the dead letter envelope.
    pub async fn add_failed_envelope(
        &self,
        envelope: &Envelope,
        route: &str,
        error: &str,
        attempts: u32,
    ) -> Result<String, TransportError> {
        let failed_at = chrono::Utc::now().to_rfc3339();

        let dead_letter = envelope
            .copy()
            .with_metadata(DLQ_ROUTE_KEY, route)
            .with_metadata(DLQ_ERROR_KEY, error)
            .with_metadata(DLQ_ATTEMPTS_KEY, attempts.to_string())
            .with_metadata(DLQ_FAILED_AT_KEY, failed_at);
        let id = dead_letter.id().to_string();

        self.publisher
            .publish(&self.topic, dead_letter)
            .await
            .map_err(|e| {
                error!(error = %e, topic = %self.topic, "Failed to publish dead letter");
                e
            })?;

        info!(
            dlq_id = %id,
            original_id = %envelope.id(),
            route = %route,
            event_type = %envelope.event_kind(),
            attempts = attempts,
            "Envelope moved to dead letter topic"
        );

        Ok(id)
    }
}
