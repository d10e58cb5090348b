//! wakewatch - device liveness monitor with Wake-on-LAN.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wakewatch::engine::load_seed_file;
use wakewatch::notify::{LogSink, WebhookSink};
use wakewatch::web::Server;
use wakewatch::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("wakewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = EngineConfig::load();
    tracing::info!("Starting wakewatch on port {}...", cfg.http_port);
    tracing::info!("Probe strategy: {:?}, tick {:?}", cfg.probe, cfg.tick);

    let seed = match &cfg.devices_file {
        Some(path) => load_seed_file(path)?,
        None => {
            tracing::info!("No device file configured, starting with an empty registry");
            Vec::new()
        }
    };

    let mut builder = Engine::builder(cfg.clone())
        .seed(seed)
        .sink(Arc::new(LogSink));
    if let Some(url) = &cfg.webhook_url {
        tracing::info!("Publishing events to {}", url);
        builder = builder.sink(Arc::new(WebhookSink::new(url.clone())?));
    }
    let engine = builder.start()?;

    // Start web server
    let server = Server::new(cfg.http_port, engine.handle());
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    engine.shutdown().await?;
    Ok(())
}
