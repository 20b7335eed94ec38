//! Dispatch engine.
//!
//! The [`Router`] owns a table of [`Route`]s. Each route reads envelopes from
//! one subscriber topic, passes them through its [`Handler`] and publishes
//! the results to one publisher topic.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──run()──▶ Running ──shutdown──▶ Stopped
//!    │                                        ▲
//!    └──────────── subscribe failure ─────────┘
//! ```
//!
//! Routes can only be added while `Created`. [`Router::run`] subscribes every
//! route, starts one worker task per route and blocks until the shutdown
//! signal fires.
//!
//! # Worker loop
//!
//! ```text
//! Delivery (attempt n)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────┐
//! │  handler.handle()   (panics caught)     │
//! │      │ Ok(outputs)        │ Err / panic │
//! │      ▼                    ▼             │
//! │  publish each, in order   n < max? nack │
//! │  then ack                 else dead     │
//! │                           letter + ack  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A failing or panicking route never stops its siblings.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::{Route, Router};
//! use herald::handlers::AnnotationHandler;
//! use std::sync::Arc;
//!
//! let mut router = Router::new().with_max_attempts(3);
//! router.add_route(Route::new(
//!     "events-to-annotations",
//!     "events",
//!     bus.clone(),
//!     "http://grafana:3000/api/annotations",
//!     grafana,
//!     Arc::new(AnnotationHandler::new()),
//! ))?;
//!
//! router.run(shutdown).await?;
//! ```

use crate::dlq::DeadLetterQueue;
use crate::envelope::{Envelope, ROUTE_KEY};
use crate::handlers::{Handler, HandlerError};
use crate::shutdown::ShutdownSignal;
use crate::transport::{Delivery, DeliveryStream, Publisher, Subscriber, TransportError};
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Default number of deliveries before an envelope is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Errors that can occur while configuring or running the router.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("route '{0}' is already registered")]
    DuplicateRoute(String),

    /// Routes can only be added before the router starts
    #[error("router is {0}, routes can only be added while created")]
    NotAccepting(RouterState),

    #[error("router has already been started")]
    AlreadyStarted,

    #[error("route '{route}' failed to subscribe to '{topic}': {source}")]
    Subscribe {
        route: String,
        topic: String,
        #[source]
        source: TransportError,
    },
}

/// Why one envelope could not be processed.
#[derive(Error, Debug)]
enum ProcessError {
    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("publish failed: {0}")]
    Publish(#[from] TransportError),
}

/// A named pipeline from one topic, through a handler, to another topic.
#[derive(Clone)]
pub struct Route {
    name: String,
    subscribe_topic: String,
    subscriber: Arc<dyn Subscriber>,
    publish_topic: String,
    publisher: Arc<dyn Publisher>,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        publish_topic: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            subscribe_topic: subscribe_topic.into(),
            subscriber,
            publish_topic: publish_topic.into(),
            publisher,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe_topic
    }

    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("subscribe_topic", &self.subscribe_topic)
            .field("publish_topic", &self.publish_topic)
            .field("handler", &self.handler.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouterState::Created => "created",
            RouterState::Running => "running",
            RouterState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Read-only view of the router's state, usable from other tasks.
#[derive(Debug, Clone)]
pub struct RouterStatus {
    receiver: watch::Receiver<RouterState>,
}

impl RouterStatus {
    pub fn current(&self) -> RouterState {
        *self.receiver.borrow()
    }

    /// Wait until the router leaves `Created`.
    ///
    /// Returns `true` if it is running, `false` if it stopped (or was
    /// dropped) instead.
    pub async fn running(&mut self) -> bool {
        match self
            .receiver
            .wait_for(|state| *state != RouterState::Created)
            .await
        {
            Ok(state) => *state == RouterState::Running,
            Err(_) => false,
        }
    }
}

/// Per-worker counters, logged when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
    }
}

/// Owns the route table and runs one worker per route.
pub struct Router {
    routes: Vec<Route>,
    state: watch::Sender<RouterState>,
    max_attempts: u32,
    dead_letters: Option<DeadLetterQueue>,
}

impl Router {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RouterState::Created);
        Self {
            routes: Vec::new(),
            state,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            dead_letters: None,
        }
    }

    /// Deliveries allowed before giving up on an envelope. Clamped to at
    /// least 1.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Where envelopes go once they run out of attempts. Without one they
    /// are logged and dropped.
    pub fn with_dead_letters(mut self, dead_letters: DeadLetterQueue) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Register a route. Only allowed while the router is `Created`.
    pub fn add_route(&mut self, route: Route) -> Result<(), RouterError> {
        let state = self.state();
        if state != RouterState::Created {
            return Err(RouterError::NotAccepting(state));
        }

        if self.routes.iter().any(|r| r.name == route.name) {
            return Err(RouterError::DuplicateRoute(route.name));
        }

        debug!(
            route = %route.name,
            subscribe_topic = %route.subscribe_topic,
            publish_topic = %route.publish_topic,
            handler = %route.handler.name(),
            "Registering route"
        );
        self.routes.push(route);
        Ok(())
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Route names in registration order.
    pub fn route_names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            receiver: self.state.subscribe(),
        }
    }

    /// Run every route until `shutdown` fires.
    ///
    /// All subscriptions are opened before any worker starts, so a failing
    /// subscription leaves no half-started router behind. Workers get
    /// `shutdown.timeout()` to finish after the signal; stragglers are
    /// aborted.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> Result<(), RouterError> {
        if self.state() != RouterState::Created {
            return Err(RouterError::AlreadyStarted);
        }

        let mut streams = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            match route.subscriber.subscribe(&route.subscribe_topic).await {
                Ok(stream) => streams.push(stream),
                Err(source) => {
                    error!(route = %route.name, error = %source, "Route subscription failed");
                    self.state.send_replace(RouterState::Stopped);
                    return Err(RouterError::Subscribe {
                        route: route.name.clone(),
                        topic: route.subscribe_topic.clone(),
                        source,
                    });
                }
            }
        }

        let mut workers = JoinSet::new();
        for (route, stream) in self.routes.iter().cloned().zip(streams) {
            let worker = RouteWorker {
                route,
                max_attempts: self.max_attempts,
                dead_letters: self.dead_letters.clone(),
            };
            workers.spawn(worker.run(stream, shutdown.clone()));
        }

        self.state.send_replace(RouterState::Running);
        info!(
            routes = self.routes.len(),
            max_attempts = self.max_attempts,
            "Router running"
        );

        shutdown.cancelled().await;
        info!("Router stopping, draining route workers");

        let mut totals = WorkerStats::default();
        let drained = tokio::time::timeout(shutdown.timeout(), async {
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(stats) => totals.merge(stats),
                    Err(e) => error!(error = %e, "Route worker terminated abnormally"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                timeout_secs = shutdown.timeout().as_secs(),
                "Route workers did not stop in time, aborting"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        self.state.send_replace(RouterState::Stopped);
        info!(
            processed = totals.processed,
            failed = totals.failed,
            dead_lettered = totals.dead_lettered,
            "Router stopped"
        );

        Ok(())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

struct RouteWorker {
    route: Route,
    max_attempts: u32,
    dead_letters: Option<DeadLetterQueue>,
}

impl RouteWorker {
    async fn run(self, mut stream: DeliveryStream, shutdown: ShutdownSignal) -> WorkerStats {
        let mut stats = WorkerStats::default();
        debug!(route = %self.route.name, "Route worker started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!(route = %self.route.name, "Subscription closed");
                        break;
                    }
                },
            };

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                result = self.process(delivery.envelope()) => Some(result),
            };

            match outcome {
                None => {
                    debug!(
                        route = %self.route.name,
                        envelope_id = %delivery.envelope().id(),
                        "Shutdown interrupted handler, releasing envelope"
                    );
                    delivery.nack();
                    break;
                }
                Some(Ok(published)) => {
                    stats.processed += 1;
                    debug!(
                        route = %self.route.name,
                        envelope_id = %delivery.envelope().id(),
                        published = published,
                        "Envelope processed"
                    );
                    delivery.ack();
                }
                Some(Err(error)) => {
                    stats.failed += 1;
                    self.settle_failure(delivery, error, &mut stats).await;
                }
            }
        }

        info!(
            route = %self.route.name,
            processed = stats.processed,
            failed = stats.failed,
            dead_lettered = stats.dead_lettered,
            "Route worker stopped"
        );
        stats
    }

    /// Run the handler and publish its outputs in order.
    async fn process(&self, envelope: &Envelope) -> Result<usize, ProcessError> {
        let handled = AssertUnwindSafe(self.route.handler.handle(envelope))
            .catch_unwind()
            .await;

        let outputs = match handled {
            Ok(result) => result?,
            Err(panic) => return Err(HandlerError::Panicked(panic_message(&*panic)).into()),
        };

        let count = outputs.len();
        for output in outputs {
            let output = output.with_metadata(ROUTE_KEY, self.route.name.as_str());
            self.route
                .publisher
                .publish(&self.route.publish_topic, output)
                .await?;
        }

        Ok(count)
    }

    async fn settle_failure(&self, delivery: Delivery, error: ProcessError, stats: &mut WorkerStats) {
        let attempt = delivery.attempt();
        let envelope_id = delivery.envelope().id().to_string();

        if attempt < self.max_attempts {
            warn!(
                route = %self.route.name,
                envelope_id = %envelope_id,
                attempt = attempt,
                max_attempts = self.max_attempts,
                error = %error,
                "Route failed, envelope will be redelivered"
            );
            delivery.nack();
            return;
        }

        let Some(dead_letters) = &self.dead_letters else {
            error!(
                route = %self.route.name,
                envelope_id = %envelope_id,
                attempts = attempt,
                error = %error,
                "Route failed permanently, dropping envelope"
            );
            delivery.ack();
            return;
        };

        let reason = error.to_string();
        match dead_letters
            .add_failed_envelope(delivery.envelope(), &self.route.name, &reason, attempt)
            .await
        {
            Ok(_) => {
                stats.dead_lettered += 1;
                delivery.ack();
            }
            Err(e) => {
                error!(
                    route = %self.route.name,
                    envelope_id = %envelope_id,
                    error = %e,
                    "Dead letter publish failed, envelope will be redelivered"
                );
                delivery.nack();
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
