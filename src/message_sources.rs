//! Source abstraction for raw position reports.
//!
//! Production consumes from JetStream (see `jetstream_consumer`, which owns
//! the ack lifecycle); replay and tests read pre-recorded files through the
//! same `RawReportSource` seam.
//!
//! File format, one report per line:
//!
//! ```text
//! 2025-01-15T12:34:56.789Z FLRDDA5BA>APRS,qAS,LFNM:/074548h...
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::fixes::{RawReport, ReportFormat};

/// Trait for sources of raw reports
#[async_trait]
pub trait RawReportSource: Send + Sync {
    /// Next report, or None at end of stream
    async fn next_report(&mut self) -> Result<Option<RawReport>>;

    /// Optional hint of how many reports remain, for progress tracking
    fn remaining_hint(&self) -> Option<usize> {
        None
    }
}

/// Replays timestamped reports from a file, for tests and backfill runs
pub struct FileReportSource {
    reader: BufReader<File>,
    format: ReportFormat,
    line_buffer: String,
    total_reports: Option<usize>,
    reports_read: usize,
}

impl FileReportSource {
    pub async fn from_file<P: AsRef<Path>>(path: P, format: ReportFormat) -> Result<Self> {
        let file = File::open(path.as_ref()).await?;
        debug!("Opened report source from {:?}", path.as_ref());
        Ok(Self {
            reader: BufReader::new(file),
            format,
            line_buffer: String::new(),
            total_reports: None,
            reports_read: 0,
        })
    }

    /// As `from_file`, with a known report count for `remaining_hint`
    pub async fn from_file_with_count<P: AsRef<Path>>(
        path: P,
        format: ReportFormat,
        total_reports: usize,
    ) -> Result<Self> {
        let mut source = Self::from_file(path, format).await?;
        source.total_reports = Some(total_reports);
        Ok(source)
    }

    pub fn reports_read(&self) -> usize {
        self.reports_read
    }
}

#[async_trait]
impl RawReportSource for FileReportSource {
    async fn next_report(&mut self) -> Result<Option<RawReport>> {
        loop {
            self.line_buffer.clear();
            let bytes_read = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes_read == 0 {
                debug!("Reached end of report file after {} reports", self.reports_read);
                return Ok(None);
            }

            let line = self.line_buffer.trim_end();
            if line.is_empty() {
                continue;
            }
            self.reports_read += 1;

            // Leading RFC3339 token is the original arrival time
            let (received_at, payload) = match line.split_once(' ') {
                Some((timestamp, rest)) => match DateTime::parse_from_rfc3339(timestamp) {
                    Ok(parsed) => (parsed.with_timezone(&Utc), rest),
                    Err(e) => {
                        warn!("Report line without valid timestamp prefix ({e}) - using now");
                        (Utc::now(), line)
                    }
                },
                None => {
                    warn!("Report line without timestamp prefix - using now");
                    (Utc::now(), line)
                }
            };

            return Ok(Some(RawReport::new(
                payload.as_bytes().to_vec(),
                self.format,
                received_at,
            )));
        }
    }

    fn remaining_hint(&self) -> Option<usize> {
        self.total_reports
            .map(|total| total.saturating_sub(self.reports_read))
    }
}
