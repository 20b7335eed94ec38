//! The message envelope exchanged between routes.
//!
//! An [`Envelope`] carries an opaque payload (JSON-encoded in practice), a
//! string-keyed [`Metadata`] map and a freshly generated identifier. Handlers
//! never mutate an envelope they receive; they build new ones.
//!
//! The `event_type` metadata entry names the logical event inside the payload
//! and is the only key downstream handlers dispatch on (see [`EventKind`]).

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;

use crate::event::DomainEvent;

/// Metadata key naming the logical event kind of an envelope.
pub const EVENT_TYPE_KEY: &str = "event_type";

/// Metadata key naming the route that published an envelope.
pub const ROUTE_KEY: &str = "route";

/// String-keyed metadata attached to an envelope.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Logical kind of the event carried by an envelope.
///
/// Anything other than the two commit events is kept verbatim in
/// [`EventKind::Unknown`] so handlers can report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CommitPushed,
    CommitDeployed,
    Unknown(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::CommitPushed => "commitPushed",
            EventKind::CommitDeployed => "commitDeployed",
            EventKind::Unknown(other) => other,
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "commitPushed" => EventKind::CommitPushed,
            "commitDeployed" => EventKind::CommitDeployed,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of data flowing between routes.
///
/// Envelopes have no equality; two envelopes are told apart
/// by [`Envelope::id`] only.
#[derive(Debug, Clone)]
pub struct Envelope {
    id: String,
    payload: Vec<u8>,
    metadata: Metadata,
}

impl Envelope {
    /// Create an envelope with a fresh id and empty metadata.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    /// Encode a domain event as JSON and tag it with its event type.
    pub fn encode<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(event)?;
        Ok(Self::new(payload).with_metadata(EVENT_TYPE_KEY, E::EVENT_TYPE))
    }

    /// Decode the JSON payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Return this envelope with one more metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    /// Copy payload and metadata into a new envelope with a fresh id.
    pub fn copy(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The event kind named by the `event_type` metadata entry.
    ///
    /// A missing entry is reported as `Unknown("")`.
    pub fn event_kind(&self) -> EventKind {
        EventKind::from(self.metadata.get(EVENT_TYPE_KEY).unwrap_or_default())
    }
}
