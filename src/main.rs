use futures::StreamExt;
use herald::config::HeraldConfig;
use herald::dlq::{DLQ_ERROR_KEY, DLQ_ROUTE_KEY};
use herald::pipeline::{build_router, serve_webhook};
use herald::shutdown::ShutdownSignal;
use herald::simulator::DeployDelays;
use herald::transport::{HttpSubscriber, MemoryBus, Subscriber};
use std::error::Error;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 1. Initialize Logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Load Configuration
    let config = HeraldConfig::load()?;
    info!(
        metrics_bind_addr = %config.server.metrics_bind_addr,
        queue_uri = %config.queue.uri,
        brokers = ?config.broker.addresses,
        "Transport settings (in-process bus in use)"
    );

    // 3. Draw deploy delays once per process
    let delays = DeployDelays::draw(&mut rand::thread_rng());
    info!(
        staging_secs = delays.staging().as_secs(),
        production_secs = delays.production().as_secs(),
        "Deploy delays drawn"
    );

    // 4. Assemble routes
    let bus = MemoryBus::new();
    let webhook = Arc::new(HttpSubscriber::new(config.server.bind_addr.as_str()));
    let mut router = build_router(&config, &bus, webhook.clone(), delays)?;

    let shutdown = ShutdownSignal::with_timeout(config.shutdown_timeout());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait().await });
    }

    // 5. Log dead letters
    let mut dead_letters = bus.subscribe(&config.broker.dead_letter_topic).await?;
    tokio::spawn(async move {
        while let Some(delivery) = dead_letters.next().await {
            let metadata = delivery.envelope().metadata();
            warn!(
                envelope_id = %delivery.envelope().id(),
                route = metadata.get(DLQ_ROUTE_KEY).unwrap_or("unknown"),
                error = metadata.get(DLQ_ERROR_KEY).unwrap_or(""),
                "Dead letter received"
            );
            delivery.ack();
        }
    });

    // 6. Start the webhook server once routing is live
    let server = tokio::spawn(serve_webhook(webhook, router.status(), shutdown.clone()));

    // 7. Run until shutdown
    router.run(shutdown).await?;
    server.await??;
    info!("Herald stopped");

    Ok(())
}
