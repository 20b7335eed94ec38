//! Domain events carried inside envelopes.
//!
//! [`CommitPushed`] is derived from a GitHub push webhook, [`CommitDeployed`]
//! from a deployment notice or the deploy simulator. Both travel as JSON with
//! `occurred_on` kept as the original RFC 3339 string.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An event type that can be encoded into an [`Envelope`](crate::Envelope).
pub trait DomainEvent: Serialize + DeserializeOwned {
    /// Value written to the `event_type` metadata entry.
    const EVENT_TYPE: &'static str;
}

/// A commit was pushed to the repository.
///
/// # Example
///
/// ```json
/// {
///   "id": "abc123",
///   "message": "fix bug",
///   "author": "alice",
///   "occurred_on": "2024-01-01T10:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPushed {
    /// Commit SHA
    pub id: String,
    pub message: String,
    /// Author display name
    pub author: String,
    /// RFC 3339 push timestamp
    pub occurred_on: String,
}

impl DomainEvent for CommitPushed {
    const EVENT_TYPE: &'static str = "commitPushed";
}

/// A commit reached a deployment environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDeployed {
    pub id: String,
    pub env: Environment,
    pub occurred_on: String,
}

impl DomainEvent for CommitDeployed {
    const EVENT_TYPE: &'static str = "commitDeployed";
}

/// Deployment environments known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record published on the deployments queue by a deploy system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentNotice {
    pub commit_id: String,
    pub env: Environment,
    pub timestamp: String,
}

impl From<DeploymentNotice> for CommitDeployed {
    fn from(notice: DeploymentNotice) -> Self {
        Self {
            id: notice.commit_id,
            env: notice.env,
            occurred_on: notice.timestamp,
        }
    }
}
