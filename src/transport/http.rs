//! HTTP transports.
//!
//! [`HttpSubscriber`] exposes one POST endpoint per subscribed path and turns
//! each request body into an inbound envelope. The response waits for the
//! router's verdict: `200` on ack, `500` on nack.
//!
//! [`HttpPublisher`] POSTs envelope payloads to the URL given as topic, with
//! optional basic auth and retries on 5xx responses.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::transport::HttpPublisher;
//! use std::time::Duration;
//!
//! let grafana = HttpPublisher::new()
//!     .with_basic_auth("admin", "secret")
//!     .with_timeout(Duration::from_secs(10))
//!     .with_retries(2);
//! ```

use super::{Acknowledger, Delivery, DeliveryStream, Publisher, Subscriber, TransportError};
use crate::envelope::Envelope;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::post;
use futures::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default timeout for outbound requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries on 5xx errors
const DEFAULT_RETRIES: u32 = 1;

/// Inbound HTTP endpoint.
///
/// Subscribe first, then call [`HttpSubscriber::serve`] once routing is live.
pub struct HttpSubscriber {
    bind_addr: String,
    paths: Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
}

impl HttpSubscriber {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn serve(&self, shutdown: ShutdownSignal) -> Result<(), TransportError> {
        let listener =
            TcpListener::bind(&self.bind_addr)
                .await
                .map_err(|source| TransportError::Bind {
                    addr: self.bind_addr.clone(),
                    source,
                })?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve subscribed paths on an already bound listener until shutdown.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), TransportError> {
        let app = self.build_app();
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.bind_addr.clone());

        info!(addr = %addr, "HTTP subscriber listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(TransportError::Serve)?;

        info!(addr = %addr, "HTTP subscriber stopped");
        Ok(())
    }

    fn build_app(&self) -> axum::Router {
        let paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        let mut app = axum::Router::new();

        for (path, sender) in paths.iter() {
            let sender = sender.clone();
            app = app.route(path, post(move |body: Bytes| receive(sender.clone(), body)));
        }

        app
    }
}

#[async_trait]
impl Subscriber for HttpSubscriber {
    async fn subscribe(&self, topic: &str) -> Result<DeliveryStream, TransportError> {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        {
            let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
            if paths.contains_key(topic) {
                return Err(TransportError::AlreadySubscribed(topic.to_string()));
            }
            paths.insert(topic.to_string(), sender);
        }

        debug!(path = %topic, "Registered HTTP subscription");

        let stream = futures::stream::poll_fn(move |cx| receiver.poll_recv(cx));
        Ok(stream.boxed())
    }
}

/// Turn a request body into a delivery and wait for the router's verdict.
async fn receive(sender: mpsc::UnboundedSender<Delivery>, body: Bytes) -> StatusCode {
    let envelope = Envelope::new(body.to_vec());
    let envelope_id = envelope.id().to_string();
    let (verdict, outcome) = oneshot::channel();

    if sender
        .send(Delivery::new(envelope, 1, Box::new(HttpAck(verdict))))
        .is_err()
    {
        warn!(envelope_id = %envelope_id, "No consumer for HTTP request");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match outcome.await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::INTERNAL_SERVER_ERROR,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

struct HttpAck(oneshot::Sender<bool>);

impl Acknowledger for HttpAck {
    fn ack(self: Box<Self>) {
        let _ = self.0.send(true);
    }

    fn nack(self: Box<Self>, _envelope: Envelope, _attempt: u32) {
        let _ = self.0.send(false);
    }
}

/// Outbound HTTP publisher. The topic is the target URL.
///
/// # Features
///
/// - Configurable timeout
/// - Automatic retry on 5xx errors
/// - Optional basic auth
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    /// HTTP client (reused for connection pooling)
    client: Client,

    timeout: Duration,

    /// Number of retries on 5xx errors
    retries: u32,

    basic_auth: Option<(String, String)>,
}

impl HttpPublisher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            basic_auth: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    async fn send_request(&self, url: &str, body: &[u8]) -> Result<(), TransportError> {
        let mut last_error = None;
        let mut attempts = 0;

        while attempts <= self.retries {
            if attempts > 0 {
                debug!(
                    attempt = attempts,
                    max_retries = self.retries,
                    "Retrying HTTP publish"
                );
            }

            let mut request = self
                .client
                .post(url)
                .timeout(self.timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());

            if let Some((user, password)) = &self.basic_auth {
                request = request.basic_auth(user, Some(password));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(());
                    }

                    let error = TransportError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };

                    // Client error - don't retry
                    if !status.is_server_error() {
                        warn!(status = %status, url = %url, "Endpoint rejected request");
                        return Err(error);
                    }

                    warn!(
                        status = %status,
                        url = %url,
                        attempt = attempts,
                        "Endpoint returned server error"
                    );
                    last_error = Some(error);
                }
                Err(e) => {
                    warn!(error = %e, url = %url, attempt = attempts, "HTTP publish failed");
                    last_error = Some(TransportError::Http(e));
                }
            }

            attempts += 1;
        }

        Err(last_error.unwrap_or(TransportError::Closed))
    }
}

impl Default for HttpPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError> {
        self.send_request(topic, envelope.payload()).await?;
        debug!(url = %topic, envelope_id = %envelope.id(), "HTTP publish delivered");
        Ok(())
    }
}
