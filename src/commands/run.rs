use anyhow::Result;
use chrono::Duration;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{build_pipeline, load_config};
use crate::clustering::ViewportService;
use crate::jetstream_consumer::JetStreamConsumer;
use crate::subscriptions::SubscriptionRouter;
use crate::telemetry;
use crate::web::{AppState, start_web_server};

/// Full pipeline: JetStream ingestion, flight tracking, live fan-out and
/// the web serving layer, until ctrl-c.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);

    if let Some(listen) = &config.web.metrics_listen {
        telemetry::install_metrics(listen)?;
    }

    let pipeline = build_pipeline(&config)?;
    let router = SubscriptionRouter::new(config.live.channel_capacity);
    let processor = pipeline.processor.with_router(Arc::clone(&router));
    processor.start_background_tasks(config.tracker.sweep_interval_secs);

    let viewport = ViewportService::new(
        pipeline.fixes_repo.clone(),
        pipeline.flights_repo.clone(),
        pipeline.registry.clone(),
        config.tracker.inactivity_timeout(),
        Duration::seconds(config.live.freshness_window_secs),
    );
    let state = AppState {
        registry: pipeline.registry,
        fixes_repo: pipeline.fixes_repo,
        flights_repo: pipeline.flights_repo,
        router,
        viewport,
        config: Arc::clone(&config),
    };

    let interface = config.web.interface.clone();
    let port = config.web.port;
    let web_task = tokio::spawn(start_web_server(interface, port, state));

    let consumer = JetStreamConsumer::connect(config.ingest.clone()).await?;

    tokio::select! {
        result = consumer.run(processor) => {
            result?;
        }
        result = web_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
        }
    }

    Ok(())
}
