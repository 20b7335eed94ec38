//! Grafana annotation translation.
//!
//! Turns commit events into payloads for Grafana's create-annotation API.
//! See: https://grafana.com/docs/grafana/latest/developers/http_api/annotations/

use super::{parse_timestamp, CommitEvent, Handler, HandlerError};
use crate::envelope::Envelope;
use crate::event::DomainEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of `POST /api/annotations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub text: String,
    pub tags: Vec<String>,
    /// Epoch milliseconds
    pub time: i64,
    #[serde(rename = "timeEnd")]
    pub time_end: i64,
}

impl DomainEvent for Annotation {
    const EVENT_TYPE: &'static str = "grafanaAnnotation";
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationHandler;

impl AnnotationHandler {
    pub fn new() -> Self {
        Self
    }

    /// Build the annotation describing one commit event.
    pub fn annotate(&self, envelope: &Envelope) -> Result<Annotation, HandlerError> {
        let event = CommitEvent::from_envelope(envelope)?;

        let (text, tags) = match &event {
            CommitEvent::Pushed(e) => (
                format!("Commit {} pushed by {}", e.id, e.author),
                vec!["pushed".to_string()],
            ),
            CommitEvent::Deployed(e) => (
                format!("Commit {} deployed to {}", e.id, e.env),
                vec![format!("deploy-{}", e.env)],
            ),
        };

        let time = parse_timestamp(event.occurred_on())?.timestamp_millis();

        Ok(Annotation {
            text,
            tags,
            time,
            time_end: time,
        })
    }
}

#[async_trait]
impl Handler for AnnotationHandler {
    fn name(&self) -> &str {
        "grafana-annotation"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let annotation = self.annotate(envelope)?;
        debug!(text = %annotation.text, tags = ?annotation.tags, "Sending Grafana annotation");
        let out = Envelope::encode(&annotation).map_err(HandlerError::Encode)?;
        Ok(vec![out])
    }
}
