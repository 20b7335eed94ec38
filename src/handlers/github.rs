//! GitHub push webhook translation.
//!
//! Only the parts of the push event used downstream are decoded. Missing or
//! null `commits` decode as no commits, so deliveries without commits (such
//! as `ping`) are accepted. Absent commit fields decode as empty strings.
//! See: https://docs.github.com/en/webhooks/webhook-events-and-payloads#push

use super::{Handler, HandlerError};
use crate::envelope::Envelope;
use crate::event::CommitPushed;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(default)]
    commits: Option<Vec<PushCommit>>,
}

#[derive(Debug, Deserialize)]
struct PushCommit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    name: String,
}

/// Translates a push webhook into one `commitPushed` envelope per commit,
/// preserving commit order.
#[derive(Debug, Clone, Default)]
pub struct GithubWebhookHandler;

impl GithubWebhookHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn translate(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let push: PushEvent = envelope.decode().map_err(HandlerError::Decode)?;
        let commits = push.commits.unwrap_or_default();

        info!(
            envelope_id = %envelope.id(),
            commits = commits.len(),
            "Received GitHub push webhook"
        );

        commits
            .into_iter()
            .map(|commit| {
                let event = CommitPushed {
                    id: commit.id,
                    message: commit.message,
                    author: commit.author.map(|a| a.name).unwrap_or_default(),
                    occurred_on: commit.timestamp,
                };
                debug!(commit = %event.id, author = %event.author, "Emitting commitPushed");
                Envelope::encode(&event).map_err(HandlerError::Encode)
            })
            .collect()
    }
}

#[async_trait]
impl Handler for GithubWebhookHandler {
    fn name(&self) -> &str {
        "github-webhook"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        self.translate(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EventKind, EVENT_TYPE_KEY};
    use serde_json::json;

    fn webhook(body: serde_json::Value) -> Envelope {
        Envelope::new(serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_single_commit() {
        let envelope = webhook(json!({
            "commits": [{
                "id": "abc123",
                "message": "fix bug",
                "timestamp": "2024-01-01T10:00:00Z",
                "author": {"name": "alice"}
            }]
        }));

        let out = GithubWebhookHandler::new().translate(&envelope).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metadata().get(EVENT_TYPE_KEY), Some("commitPushed"));
        assert_eq!(out[0].event_kind(), EventKind::CommitPushed);
        assert_ne!(out[0].id(), envelope.id());

        let event: CommitPushed = out[0].decode().unwrap();
        assert_eq!(
            event,
            CommitPushed {
                id: "abc123".to_string(),
                message: "fix bug".to_string(),
                author: "alice".to_string(),
                occurred_on: "2024-01-01T10:00:00Z".to_string(),
            }
        );
    }

    #[test]
    fn test_commit_order_preserved() {
        let commits: Vec<_> = (1..=5)
            .map(|i| {
                json!({
                    "id": format!("c{i}"),
                    "message": format!("change {i}"),
                    "timestamp": format!("2024-01-01T10:0{i}:00Z"),
                    "author": {"name": "bob", "email": "bob@example.com"}
                })
            })
            .collect();
        let envelope = webhook(json!({ "ref": "refs/heads/main", "commits": commits }));

        let out = GithubWebhookHandler::new().translate(&envelope).unwrap();
        let ids: Vec<String> = out
            .iter()
            .map(|e| e.decode::<CommitPushed>().unwrap().id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4", "c5"]);
    }

    #[test]
    fn test_no_commits_yields_nothing() {
        let out = GithubWebhookHandler::new()
            .translate(&webhook(json!({"commits": []})))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_payload() {
        let envelope = Envelope::new(b"not json".to_vec());
        let err = GithubWebhookHandler::new().translate(&envelope).unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[test]
    fn test_ping_without_commits_yields_nothing() {
        let envelope = webhook(json!({
            "zen": "Keep it logically awesome.",
            "hook_id": 12345678
        }));
        let out = GithubWebhookHandler::new().translate(&envelope).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_null_commits_yields_nothing() {
        let out = GithubWebhookHandler::new()
            .translate(&webhook(json!({"commits": null})))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_wrong_commits_type_is_decode_error() {
        let err = GithubWebhookHandler::new()
            .translate(&webhook(json!({"commits": "abc123"})))
            .unwrap_err();
        assert!(matches!(err, HandlerError::Decode(_)));
    }

    #[test]
    fn test_missing_fields_decode_as_empty() {
        let envelope = webhook(json!({
            "commits": [{"id": "abc123", "timestamp": "2024-01-01T10:00:00Z"}]
        }));
        let out = GithubWebhookHandler::new().translate(&envelope).unwrap();
        assert_eq!(out.len(), 1);

        let event: CommitPushed = out[0].decode().unwrap();
        assert_eq!(event.id, "abc123");
        assert_eq!(event.message, "");
        assert_eq!(event.author, "");
        assert_eq!(event.occurred_on, "2024-01-01T10:00:00Z");
    }
}
