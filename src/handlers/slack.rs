//! Slack message translation.
//!
//! Produces incoming-webhook payloads, one short line per commit event.
//! See: https://api.slack.com/messaging/webhooks

use super::{CommitEvent, Handler, HandlerError};
use crate::envelope::Envelope;
use crate::event::DomainEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

impl DomainEvent for ChatMessage {
    const EVENT_TYPE: &'static str = "slackMessage";
}

#[derive(Debug, Clone, Default)]
pub struct ChatMessageHandler;

impl ChatMessageHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, envelope: &Envelope) -> Result<ChatMessage, HandlerError> {
        let text = match CommitEvent::from_envelope(envelope)? {
            CommitEvent::Pushed(e) => format!(
                ":rocket: Commit `{}` *pushed* by {}: _{}_",
                e.id, e.author, e.message
            ),
            CommitEvent::Deployed(e) => {
                format!(":heavy_check_mark: Commit `{}` deployed to *{}*", e.id, e.env)
            }
        };

        Ok(ChatMessage { text })
    }
}

#[async_trait]
impl Handler for ChatMessageHandler {
    fn name(&self) -> &str {
        "slack-message"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let message = self.format(envelope)?;
        debug!(text = %message.text, "Sending Slack message");
        let out = Envelope::encode(&message).map_err(HandlerError::Encode)?;
        Ok(vec![out])
    }
}
