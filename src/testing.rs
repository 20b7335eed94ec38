//! Test doubles shared by unit tests.

use crate::envelope::Envelope;
use crate::handlers::{Handler, HandlerError};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One request seen by a [`CaptureServer`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub path: String,
    pub body: Vec<u8>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
}

/// Local HTTP endpoint that records every request and answers with a fixed
/// status.
pub struct CaptureServer {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<CapturedRequest>,
    task: JoinHandle<()>,
}

impl CaptureServer {
    pub async fn start(status: StatusCode) -> Self {
        let (sender, requests) = mpsc::unbounded_channel();

        let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap, body: Bytes| {
            let sender = sender.clone();
            async move {
                let header_value = |name| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                let _ = sender.send(CapturedRequest {
                    path: uri.path().to_string(),
                    body: body.to_vec(),
                    authorization: header_value(header::AUTHORIZATION),
                    content_type: header_value(header::CONTENT_TYPE),
                });
                status
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn next_request(&mut self) -> CapturedRequest {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("timed out waiting for request")
            .expect("capture server stopped")
    }

    /// Wait briefly for another request.
    pub async fn try_next_request(&mut self) -> Option<CapturedRequest> {
        tokio::time::timeout(Duration::from_millis(100), self.requests.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Returns a copy of every envelope.
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        Ok(vec![envelope.copy()])
    }
}

/// Always fails and counts how often it was called.
#[derive(Default)]
pub struct FailingHandler {
    calls: AtomicUsize,
}

impl FailingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::UnknownEventType("testEvent".to_string()))
    }
}

/// Fails the first `failures` calls, then echoes.
pub struct FlakyHandler {
    remaining: AtomicUsize,
}

impl FlakyHandler {
    pub fn new(failures: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl Handler for FlakyHandler {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::UnknownEventType("flaky".to_string()));
        }
        Ok(vec![envelope.copy()])
    }
}

/// Panics on every envelope.
pub struct PanickingHandler;

#[async_trait]
impl Handler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _envelope: &Envelope) -> Result<Vec<Envelope>, HandlerError> {
        panic!("boom");
    }
}
