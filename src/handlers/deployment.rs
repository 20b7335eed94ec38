//! Deployment notice translation.
//!
//! The deployments queue carries either a deploy system's notice
//! (`{commit_id, env, timestamp}`) or an envelope already tagged
//! `commitDeployed` by the deploy simulator. Both come out as a single
//! `commitDeployed` envelope.

use super::{Handler, HandlerError};
use crate::envelope::{Envelope, EventKind};
use crate::event::{CommitDeployed, DeploymentNotice};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct DeploymentNoticeHandler;

impl DeploymentNoticeHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn translate(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let deployed: CommitDeployed = match envelope.event_kind() {
            EventKind::CommitDeployed => envelope.decode().map_err(HandlerError::Decode)?,
            _ => envelope
                .decode::<DeploymentNotice>()
                .map_err(HandlerError::Decode)?
                .into(),
        };

        info!(
            envelope_id = %envelope.id(),
            commit = %deployed.id,
            env = %deployed.env,
            "Received deployment notice"
        );

        let out = Envelope::encode(&deployed).map_err(HandlerError::Encode)?;
        Ok(vec![out])
    }
}

#[async_trait]
impl Handler for DeploymentNoticeHandler {
    fn name(&self) -> &str {
        "deployment-notice"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        self.translate(envelope)
    }
}
