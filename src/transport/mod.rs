//! Publish/subscribe capabilities consumed by the router.
//!
//! The router only knows two operations: [`Publisher::publish`] and
//! [`Subscriber::subscribe`]. Concrete transports live in submodules:
//!
//! - [`MemoryBus`]: in-process topics and queues with per-subscriber fan-out
//! - [`HttpSubscriber`]: POST endpoints turned into inbound envelopes
//! - [`HttpPublisher`]: envelopes POSTed to an HTTP endpoint
//!
//! Each inbound envelope arrives wrapped in a [`Delivery`], which must be
//! acknowledged or handed back for redelivery.

pub mod http;
pub mod memory;

use crate::envelope::Envelope;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use http::{HttpPublisher, HttpSubscriber};
pub use memory::MemoryBus;

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    /// Could not bind the inbound listener
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Inbound server stopped with an error
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The topic accepts a single subscriber and already has one
    #[error("topic '{0}' already has a subscriber")]
    AlreadySubscribed(String),

    /// Transport is shut down
    #[error("transport closed")]
    Closed,
}

/// Stream of inbound deliveries for one subscription.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Sends envelopes to a named topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError>;
}

/// Opens independent subscriptions to a named topic.
///
/// Every call returns a new stream with its own consumption position.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream, TransportError>;
}

/// Transport-side handle used to settle a delivery.
pub trait Acknowledger: Send + Sync {
    /// The envelope was consumed successfully.
    fn ack(self: Box<Self>);

    /// The envelope was not consumed; the transport decides whether and when
    /// to deliver it again.
    fn nack(self: Box<Self>, envelope: Envelope, attempt: u32);
}

/// An inbound envelope awaiting acknowledgement.
pub struct Delivery {
    envelope: Envelope,
    attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wrap an envelope. `attempt` starts at 1 for the first delivery.
    pub fn new(envelope: Envelope, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            envelope,
            attempt,
            acker,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// How many times this envelope has been delivered, including this one.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ack(self) {
        self.acker.ack();
    }

    pub fn nack(self) {
        self.acker.nack(self.envelope, self.attempt);
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}
