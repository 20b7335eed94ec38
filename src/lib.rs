//! # Herald
//!
//! Routes commit events from a push webhook and a deployments queue to
//! Grafana annotations and Slack messages, with simulated staging and
//! production deploys in between.
//!
//! ## Architecture
//!
//! ```text
//! Webhook -> Route -> events topic -> Routes -> Grafana / Slack
//!                          │    ▲
//!                          ▼    │
//!              Deploy simulators -> deployments queue
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: The message unit exchanged between routes
//! - [`event`]: Commit domain events
//! - [`handlers`]: Handler trait and the event translators
//! - [`simulator`]: Delayed deploy events derived from pushes
//! - [`router`]: Routes, dispatch workers and lifecycle
//! - [`transport`]: Publish/subscribe capabilities (in-memory, HTTP)
//! - [`dlq`]: Dead letter topic for envelopes that keep failing
//! - [`pipeline`]: Assembles the full set of routes from configuration

pub mod config;
pub mod dlq;
pub mod envelope;
pub mod event;
pub mod handlers;
pub mod pipeline;
pub mod router;
pub mod shutdown;
pub mod simulator;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at crate root
pub use envelope::{Envelope, EventKind, Metadata};
pub use event::{CommitDeployed, CommitPushed, Environment};
pub use handlers::{Handler, HandlerError};
pub use router::{Route, Router, RouterError, RouterState, RouterStatus};
pub use shutdown::ShutdownSignal;
pub use simulator::{DeployDelays, DeploySimulator};
