//! Wiring of the commit notification pipeline.
//!
//! ```text
//! POST /  ──webhook-to-events──────────▶ events ──events-to-annotations──▶ Grafana
//!                                         │  ▲  ──events-to-chat─────────▶ Slack
//!                                         │  │
//!          deploy-staging-simulator ◀─────┤  └──deployments-to-events── deployments
//!          deploy-production-simulator ◀──┘                                  ▲
//!                 │                                                          │
//!                 └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The event topic and the deployments queue live on a [`MemoryBus`]. The
//! webhook subscriber is passed in so the binary can serve it over HTTP once
//! the router is running.

use crate::config::{ConfigError, HeraldConfig};
use crate::dlq::DeadLetterQueue;
use crate::handlers::{
    AnnotationHandler, ChatMessageHandler, DeploymentNoticeHandler, GithubWebhookHandler,
    Handler,
};
use crate::router::{Route, Router, RouterError, RouterStatus};
use crate::shutdown::ShutdownSignal;
use crate::simulator::DeployDelays;
use crate::transport::{
    HttpPublisher, HttpSubscriber, MemoryBus, Publisher, Subscriber, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Path the webhook subscriber listens on
pub const WEBHOOK_PATH: &str = "/";

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),
}

/// Build the router with every route of the pipeline registered.
///
/// The chat route is only added when a chat webhook URL is configured.
pub fn build_router(
    config: &HeraldConfig,
    bus: &MemoryBus,
    webhook: Arc<dyn Subscriber>,
    delays: DeployDelays,
) -> Result<Router, SetupError> {
    config.validate()?;

    let (user, password) = config.basic_auth().ok_or_else(|| {
        ConfigError::ValidationError("annotations.credentials must be user:password".to_string())
    })?;

    let events = config.broker.topic.as_str();
    let deployments = config.queue.name.as_str();
    let bus_subscriber: Arc<dyn Subscriber> = Arc::new(bus.clone());
    let bus_publisher: Arc<dyn Publisher> = Arc::new(bus.clone());

    let grafana: Arc<dyn Publisher> = Arc::new(
        HttpPublisher::new()
            .with_basic_auth(user, password)
            .with_timeout(Duration::from_millis(config.annotations.timeout_ms))
            .with_retries(config.annotations.retries),
    );

    let mut router = Router::new()
        .with_max_attempts(config.router.max_attempts)
        .with_dead_letters(DeadLetterQueue::new(
            bus_publisher.clone(),
            config.broker.dead_letter_topic.as_str(),
        ));

    router.add_route(Route::new(
        "webhook-to-events",
        WEBHOOK_PATH,
        webhook,
        events,
        bus_publisher.clone(),
        Arc::new(GithubWebhookHandler::new()),
    ))?;

    router.add_route(Route::new(
        "deployments-to-events",
        deployments,
        bus_subscriber.clone(),
        events,
        bus_publisher.clone(),
        Arc::new(DeploymentNoticeHandler::new()),
    ))?;

    router.add_route(Route::new(
        "events-to-annotations",
        events,
        bus_subscriber.clone(),
        config.annotations_endpoint(),
        grafana,
        Arc::new(AnnotationHandler::new()),
    ))?;

    if config.chat_enabled() {
        let slack: Arc<dyn Publisher> = Arc::new(
            HttpPublisher::new()
                .with_timeout(Duration::from_millis(config.chat.timeout_ms))
                .with_retries(config.chat.retries),
        );

        router.add_route(Route::new(
            "events-to-chat",
            events,
            bus_subscriber.clone(),
            config.chat.webhook_url.as_str(),
            slack,
            Arc::new(ChatMessageHandler::new()),
        ))?;
    } else {
        info!("Chat webhook URL not configured, chat route disabled");
    }

    for simulator in delays.simulators() {
        let name = simulator.name().to_string();
        router.add_route(Route::new(
            name,
            events,
            bus_subscriber.clone(),
            deployments,
            bus_publisher.clone(),
            Arc::new(simulator),
        ))?;
    }

    info!(
        routes = router.route_count(),
        staging_delay_secs = delays.staging().as_secs(),
        production_delay_secs = delays.production().as_secs(),
        "Pipeline assembled"
    );

    Ok(router)
}

/// Serve the webhook once the router reports it is running.
///
/// A serve failure triggers `shutdown` so the router drains, and the error is
/// returned to the caller. Returns `Ok` without serving if the router stops
/// before it ever runs.
pub async fn serve_webhook(
    webhook: Arc<HttpSubscriber>,
    mut status: RouterStatus,
    shutdown: ShutdownSignal,
) -> Result<(), TransportError> {
    if !status.running().await {
        return Ok(());
    }

    info!("Herald webhook listening on {}", webhook.bind_addr());
    webhook.serve(shutdown.clone()).await.map_err(|e| {
        error!(error = %e, "Webhook server failed");
        shutdown.trigger();
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::router::RouterState;
    use crate::testing::CaptureServer;
    use axum::http::StatusCode;
    use tokio::net::TcpListener;

    fn delays() -> DeployDelays {
        DeployDelays::new(Duration::from_secs(45), Duration::from_secs(60))
    }

    #[test]
    fn test_routes_without_chat() {
        let bus = MemoryBus::new();
        let router = build_router(
            &HeraldConfig::default(),
            &bus,
            Arc::new(bus.clone()),
            delays(),
        )
        .unwrap();

        assert_eq!(
            router.route_names(),
            vec![
                "webhook-to-events",
                "deployments-to-events",
                "events-to-annotations",
                "deploy-staging-simulator",
                "deploy-production-simulator",
            ]
        );
        assert_eq!(router.max_attempts(), 3);
    }

    #[test]
    fn test_routes_with_chat() {
        let bus = MemoryBus::new();
        let mut config = HeraldConfig::default();
        config.chat.webhook_url = "https://hooks.slack.com/services/T000/B000/XXX".to_string();

        let router = build_router(&config, &bus, Arc::new(bus.clone()), delays()).unwrap();

        assert_eq!(router.route_count(), 6);
        assert!(router.route_names().contains(&"events-to-chat"));
    }

    #[test]
    fn test_invalid_config_aborts_setup() {
        let bus = MemoryBus::new();
        let mut config = HeraldConfig::default();
        config.annotations.credentials = "no-colon".to_string();

        let result = build_router(&config, &bus, Arc::new(bus.clone()), delays());
        assert!(matches!(result, Err(SetupError::Config(_))));
    }

    #[tokio::test]
    async fn test_webhook_to_annotations_end_to_end() {
        let mut grafana = CaptureServer::start(StatusCode::OK).await;
        let bus = MemoryBus::new();

        let mut config = HeraldConfig::default();
        config.annotations.url = grafana.url("");

        let delays = DeployDelays::new(Duration::from_millis(50), Duration::from_millis(250));
        let mut router = build_router(&config, &bus, Arc::new(bus.clone()), delays).unwrap();
        let mut status = router.status();

        let shutdown = ShutdownSignal::with_timeout(Duration::from_secs(5));
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = router.run(shutdown).await;
                (router, result)
            })
        };
        assert!(status.running().await);

        let webhook = r#"{"commits":[{"id":"abc123","message":"fix bug","timestamp":"2024-01-01T10:00:00Z","author":{"name":"alice"}}]}"#;
        bus.publish(WEBHOOK_PATH, Envelope::new(webhook.as_bytes().to_vec()))
            .await
            .unwrap();

        let mut annotations = Vec::new();
        for _ in 0..3 {
            let request = grafana.next_request().await;
            assert_eq!(request.path, "/api/annotations");
            assert_eq!(request.authorization.as_deref(), Some("Basic YWRtaW46c2VjcmV0"));
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            annotations.push(body);
        }

        let tags: Vec<&str> = annotations
            .iter()
            .map(|a| a["tags"][0].as_str().unwrap())
            .collect();
        assert_eq!(tags, vec!["pushed", "deploy-staging", "deploy-production"]);

        assert_eq!(annotations[0]["text"], "Commit abc123 pushed by alice");
        assert_eq!(annotations[0]["time"], 1_704_103_200_000i64);
        assert_eq!(annotations[1]["text"], "Commit abc123 deployed to staging");
        assert_eq!(annotations[1]["time"], 1_704_103_200_050i64);
        assert_eq!(annotations[2]["text"], "Commit abc123 deployed to production");
        assert_eq!(annotations[2]["time"], 1_704_103_200_300i64);

        shutdown.trigger();
        let (router, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(router.state(), RouterState::Stopped);
    }

    #[test]
    fn test_simulator_names_match_routes() {
        let [staging, production] = delays().simulators();
        assert_eq!(staging.name(), "deploy-staging-simulator");
        assert_eq!(production.name(), "deploy-production-simulator");
    }

    #[tokio::test]
    async fn test_webhook_bind_failure_stops_router() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap().to_string();

        let bus = MemoryBus::new();
        let webhook = Arc::new(HttpSubscriber::new(addr));
        let mut router = build_router(
            &HeraldConfig::default(),
            &bus,
            webhook.clone(),
            delays(),
        )
        .unwrap();
        let status = router.status();

        let shutdown = ShutdownSignal::with_timeout(Duration::from_secs(5));
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = router.run(shutdown).await;
                (router, result)
            })
        };

        let result = serve_webhook(webhook, status, shutdown.clone()).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(shutdown.is_shutdown());

        let (router, result) = handle.await.unwrap();
        result.unwrap();
        assert_eq!(router.state(), RouterState::Stopped);
    }

    #[tokio::test]
    async fn test_webhook_not_served_when_router_never_runs() {
        let bus = MemoryBus::new();
        let webhook = Arc::new(HttpSubscriber::new("127.0.0.1:0"));
        let router = build_router(
            &HeraldConfig::default(),
            &bus,
            webhook.clone(),
            delays(),
        )
        .unwrap();
        let status = router.status();
        drop(router);

        let shutdown = ShutdownSignal::new();
        serve_webhook(webhook, status, shutdown.clone()).await.unwrap();
        assert!(!shutdown.is_shutdown());
    }
}
