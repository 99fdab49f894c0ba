//! Durable JetStream consumer for raw position reports.
//!
//! The upstream queue delivers at least once: after a crash and restart the
//! same report can arrive again, which the dedup layer resolves. Messages
//! are ACKed only after the pipeline has durably processed them; a failed
//! message stays unacked and is redelivered.

use anyhow::{Context, Result};
use async_nats::jetstream::{
    consumer::{AckPolicy, DeliverPolicy, pull::Config as PullConfig},
    context::Context as JetStreamContext,
    stream::{Config as StreamConfig, Stream},
};
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::config::IngestConfig;
use crate::fix_processor::FixProcessor;
use crate::fixes::{RawReport, ReportFormat};

#[derive(Clone)]
pub struct JetStreamConsumer {
    jetstream: JetStreamContext,
    config: IngestConfig,
    _stream: Stream,
}

impl JetStreamConsumer {
    /// Connect and ensure the stream and the durable consumer exist. The
    /// consumer tracks delivery state, so restarts pick up where they left
    /// off.
    pub async fn connect(config: IngestConfig) -> Result<Self> {
        let nats_url = std::env::var("NATS_URL").unwrap_or_else(|_| config.nats_url.clone());
        info!("Connecting to NATS at {}...", nats_url);
        let client = async_nats::ConnectOptions::new()
            .name("aloft-ingest")
            .connect(&nats_url)
            .await
            .with_context(|| format!("failed to connect to NATS at {nats_url}"))?;

        let jetstream = async_nats::jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(StreamConfig {
                name: config.stream.clone(),
                subjects: vec![config.ogn_subject.clone(), config.adsb_subject.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("failed to get stream '{}': {}", config.stream, e))?;
        info!("JetStream stream '{}' ready", config.stream);

        let consumer_config = PullConfig {
            durable_name: Some(config.consumer.clone()),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            filter_subjects: vec![config.ogn_subject.clone(), config.adsb_subject.clone()],
            max_ack_pending: 1000,
            ..Default::default()
        };
        if stream
            .get_consumer::<PullConfig>(&config.consumer)
            .await
            .is_err()
        {
            info!("Creating JetStream consumer '{}'...", config.consumer);
            stream
                .create_consumer(consumer_config)
                .await
                .with_context(|| format!("failed to create consumer '{}'", config.consumer))?;
        }

        Ok(Self {
            jetstream,
            config,
            _stream: stream,
        })
    }

    fn format_for_subject(&self, subject: &str) -> ReportFormat {
        if subject == self.config.adsb_subject {
            ReportFormat::Adsb
        } else {
            ReportFormat::Ogn
        }
    }

    /// Consume until the stream ends, pushing every report through the
    /// processor. ACK strictly follows durable processing.
    pub async fn run(&self, processor: FixProcessor) -> Result<()> {
        let consumer = self
            .jetstream
            .get_stream(&self.config.stream)
            .await
            .context("failed to get stream")?
            .get_consumer::<PullConfig>(&self.config.consumer)
            .await
            .map_err(|e| anyhow::anyhow!("failed to get consumer: {}", e))?;

        info!(
            "JetStream consumer '{}' ready, waiting for reports",
            self.config.consumer
        );

        let mut messages = consumer.messages().await.context("failed to get messages")?;
        let mut processed_count = 0u64;
        let start_time = std::time::Instant::now();

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    error!("Error receiving message from JetStream: {}", e);
                    metrics::counter!("ingest.jetstream.receive_error").increment(1);
                    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                    continue;
                }
            };

            let format = self.format_for_subject(message.subject.as_str());
            let report = RawReport::new(message.payload.to_vec(), format, Utc::now());

            match processor.process_raw_report(report).await {
                Ok(_) => {
                    // Durably processed (stored or resolved to an existing
                    // fix): safe to remove from the queue
                    if let Err(e) = message.ack().await {
                        error!("Failed to ACK message: {} - it will be redelivered", e);
                        metrics::counter!("ingest.jetstream.ack_error").increment(1);
                    } else {
                        processed_count += 1;
                        metrics::counter!("ingest.jetstream.consumed").increment(1);
                        if processed_count.is_multiple_of(10_000) {
                            let rate = processed_count as f64 / start_time.elapsed().as_secs_f64();
                            info!("Processed {} reports ({:.1}/s)", processed_count, rate);
                        }
                    }
                }
                Err(e) => {
                    // Leave unacked so the queue redelivers it; dedup makes
                    // the retry idempotent
                    error!("Failed to process report, leaving unacked: {}", e);
                    metrics::counter!("ingest.jetstream.process_error").increment(1);
                }
            }
        }

        warn!("JetStream message stream ended");
        Ok(())
    }
}
