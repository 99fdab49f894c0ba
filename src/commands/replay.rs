use anyhow::Result;
use clap::ValueEnum;
use std::path::Path;
use tracing::{error, info};

use super::{build_pipeline, load_config};
use crate::fixes::ReportFormat;
use crate::message_sources::{FileReportSource, RawReportSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReplayFormat {
    Ogn,
    Adsb,
}

impl From<ReplayFormat> for ReportFormat {
    fn from(format: ReplayFormat) -> Self {
        match format {
            ReplayFormat::Ogn => ReportFormat::Ogn,
            ReplayFormat::Adsb => ReportFormat::Adsb,
        }
    }
}

/// Replay a recorded report file through the full pipeline and print what
/// the flight tracker made of it. Useful for regression-testing flight
/// detection against captured traffic.
pub async fn replay(file: &Path, format: ReplayFormat, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let pipeline = build_pipeline(&config)?;

    let mut source = FileReportSource::from_file(file, format.into()).await?;
    info!("Replaying reports from {}", file.display());

    let mut reports = 0usize;
    let mut stored = 0usize;
    while let Some(report) = source.next_report().await? {
        reports += 1;
        match pipeline.processor.process_raw_report(report).await {
            Ok(Some(_)) => stored += 1,
            Ok(None) => {}
            Err(e) => {
                // One bad report must not stall the stream
                error!("Failed to process report {}: {}", reports, e);
            }
        }
    }

    info!(
        "Replay complete: {} reports read, {} fixes stored, {} flights ({} still active)",
        reports,
        stored,
        pipeline.flights_repo.total_flights(),
        pipeline.flights_repo.active_count(),
    );

    Ok(())
}
