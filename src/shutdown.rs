//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is shared by the router, its workers and the HTTP
//! subscriber. Once triggered it stays triggered, so components that start
//! listening late still observe it.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//!
//! let worker_shutdown = shutdown.clone();
//! tokio::spawn(async move {
//!     loop {
//!         tokio::select! {
//!             _ = worker_shutdown.cancelled() => break,
//!             // ... process envelopes
//!         }
//!     }
//! });
//!
//! // Trigger on SIGINT / SIGTERM
//! shutdown.wait().await;
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Default shutdown timeout in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// A level-triggered shutdown flag with a drain timeout.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
    /// How long components may take to drain after the trigger
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.cancelled() => return,
        }

        self.sender.send_replace(true);
    }

    /// Resolve once shutdown has been triggered. Returns immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown programmatically.
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!("Shutdown triggered programmatically");
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
