//! In-process message bus.
//!
//! [`MemoryBus`] stands in for the event topic and the deployments queue.
//! Every subscription receives its own copy of each envelope, in publish
//! order. Envelopes published to a topic nobody listens on yet are retained
//! and handed to the first subscriber. A nacked delivery is requeued to the
//! same subscription with its attempt counter incremented.

use super::{Acknowledger, Delivery, DeliveryStream, Publisher, Subscriber, TransportError};
use crate::envelope::Envelope;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Default)]
struct Topic {
    subscribers: Vec<mpsc::UnboundedSender<Delivery>>,
    backlog: Vec<Envelope>,
}

/// Shared in-memory topics. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(topic)
            .map(|t| t.subscribers.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = topics.entry(topic.to_string()).or_default();
        entry.subscribers.retain(|s| !s.is_closed());

        if entry.subscribers.is_empty() {
            trace!(topic = %topic, envelope_id = %envelope.id(), "No subscribers, retaining envelope");
            entry.backlog.push(envelope);
            return Ok(());
        }

        for subscriber in &entry.subscribers {
            let _ = subscriber.send(first_delivery(subscriber, envelope.clone()));
        }

        trace!(
            topic = %topic,
            subscribers = entry.subscribers.len(),
            "Envelope published"
        );
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryBus {
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream, TransportError> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        {
            let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = topics.entry(topic.to_string()).or_default();

            for envelope in entry.backlog.drain(..) {
                let _ = sender.send(first_delivery(&sender, envelope));
            }
            entry.subscribers.push(sender);
        }

        debug!(topic = %topic, "Subscribed to in-memory topic");

        let stream = futures::stream::poll_fn(move |cx| receiver.poll_recv(cx));
        Ok(stream.boxed())
    }
}

fn first_delivery(sender: &mpsc::UnboundedSender<Delivery>, envelope: Envelope) -> Delivery {
    Delivery::new(
        envelope,
        1,
        Box::new(MemoryAck {
            sender: sender.clone(),
        }),
    )
}

struct MemoryAck {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl Acknowledger for MemoryAck {
    fn ack(self: Box<Self>) {}

    fn nack(self: Box<Self>, envelope: Envelope, attempt: u32) {
        let sender = self.sender.clone();
        let redelivery = Delivery::new(envelope, attempt + 1, self);
        if sender.send(redelivery).is_err() {
            debug!("Subscription closed, dropping nacked envelope");
        }
    }
}
