//! `mcbridge run` — start the orchestrator and run until Ctrl-C or a fatal
//! error.

use anyhow::Context;
use mcbridge_agent::Orchestrator;
use mcbridge_config::AppConfig;
use mcbridge_core::{BridgeEvent, EventBus};
use mcbridge_feed::{EventAdapter, SelfFilter};
use std::path::Path;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const FEED_CAPACITY: usize = 1024;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).context("Failed to load configuration")?;

    info!(
        agent = %config.agent_name(),
        host = config.minecraft.host.as_deref().unwrap_or_default(),
        port = config.minecraft.port,
        providers = config.providers.len(),
        "Starting mcbridge"
    );

    let bus = EventBus::default();
    spawn_event_log(&bus);

    let orchestrator = Orchestrator::from_config(&config, bus)
        .await
        .context("Failed to start")?;

    let source = mcbridge_feed::from_config(&config.feed)?;
    let feed = EventAdapter::new(SelfFilter::new(config.self_names()))?
        .spawn(source, FEED_CAPACITY)
        .await
        .context("Failed to open the server feed")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            // Keep the sender alive; dropping it would stop the loop.
            std::future::pending::<()>().await;
        }
        info!("Interrupt received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(feed, shutdown_rx).await?;
    Ok(())
}

/// Mirror bridge lifecycle events into the log at debug level.
fn spawn_event_log(bus: &EventBus) {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event.as_ref() {
                    BridgeEvent::ConnectionChanged { state, attempt, .. } => {
                        debug!(state = %state, attempt, "bridge: connection changed")
                    }
                    other => debug!(event = ?other, "bridge event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Event log lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
