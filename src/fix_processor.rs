//! Orchestrates the pipeline for one raw report: normalize, attribute,
//! deduplicate, run flight detection, store, and fan out to live viewers.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::adsb;
use crate::aircraft::AircraftRegistry;
use crate::config::LiveConfig;
use crate::fixes::{Fix, RawReport, ReportFormat, SourceMetadata};
use crate::fixes_repo::FixesRepository;
use crate::flight_tracker::{FlightEvent, FlightTracker, ProcessOutcome};
use crate::live_feed::{AircraftStatus, LiveFix, ServerMessage};
use crate::ogn::{self, OgnParseError};
use crate::subscriptions::SubscriptionRouter;

#[derive(Clone)]
pub struct FixProcessor {
    registry: AircraftRegistry,
    fixes_repo: FixesRepository,
    tracker: FlightTracker,
    router: Option<Arc<SubscriptionRouter>>,
    live_config: LiveConfig,
}

impl FixProcessor {
    pub fn new(
        registry: AircraftRegistry,
        fixes_repo: FixesRepository,
        tracker: FlightTracker,
        live_config: LiveConfig,
    ) -> Self {
        Self {
            registry,
            fixes_repo,
            tracker,
            router: None,
            live_config,
        }
    }

    /// Attach the live fan-out router. The processor works without one
    /// (replay, tests); with one, every stored fix and flight event is
    /// pushed to matching connections.
    pub fn with_router(mut self, router: Arc<SubscriptionRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn tracker(&self) -> &FlightTracker {
        &self.tracker
    }

    /// Process one raw report end to end. Returns the stored fix, or None
    /// when the report was a duplicate, unparseable, or carried no position.
    /// Parse failures are logged and dropped; they never stall the stream.
    pub async fn process_raw_report(&self, report: RawReport) -> Result<Option<Fix>> {
        metrics::counter!("ingest.reports.received", "format" => report.format.to_string())
            .increment(1);

        let Some(fix) = self.normalize(&report) else {
            return Ok(None);
        };

        // Unidentified aircraft: stored for audit (dedup still applies) but
        // never drives flight state
        if fix.aircraft_id.is_none() {
            metrics::counter!("ingest.fixes.unidentified").increment(1);
            trace!(
                "Storing unidentified fix for {} without flight processing",
                fix.key()
            );
            let outcome = self.fixes_repo.insert(&fix)?;
            let stored = self.fixes_repo.get_fix(outcome.fix_id());
            if let Some(stored) = &stored {
                self.fan_out_fix(stored);
            }
            return Ok(stored);
        }

        match self.tracker.process_and_insert_fix(fix).await? {
            ProcessOutcome::Stored { fix, events } => {
                self.fan_out_fix(&fix);
                self.fan_out_events(&events);
                Ok(Some(fix))
            }
            ProcessOutcome::Duplicate { fix_id } => {
                trace!("Raw report resolved to existing fix {}", fix_id);
                Ok(self.fixes_repo.get_fix(fix_id))
            }
        }
    }

    /// Parse the raw bytes into a canonical fix, or None when the report is
    /// malformed or simply not a position
    fn normalize(&self, report: &RawReport) -> Option<Fix> {
        match report.format {
            ReportFormat::Ogn => self.normalize_ogn(report),
            ReportFormat::Adsb => self.normalize_adsb(report),
        }
    }

    fn normalize_ogn(&self, report: &RawReport) -> Option<Fix> {
        let line = match std::str::from_utf8(&report.bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!("Discarding non-UTF8 OGN report: {}", e);
                metrics::counter!("ingest.reports.malformed").increment(1);
                return None;
            }
        };

        let position = match ogn::parse_position(line, report.received_at) {
            Ok(position) => position,
            Err(OgnParseError::NotAPosition) => {
                trace!("Skipping non-position OGN packet");
                return None;
            }
            Err(e) => {
                debug!("Discarding malformed OGN report ({e}): {line}");
                metrics::counter!("ingest.reports.malformed").increment(1);
                return None;
            }
        };

        // Trackers can ask not to be tracked; honor that before anything
        // is stored
        if position.params.stealth || position.params.no_tracking {
            metrics::counter!("ingest.reports.no_tracking").increment(1);
            return None;
        }

        let params = &position.params;
        let aircraft = self
            .registry
            .lookup(&crate::aircraft::AircraftKey::new(params.address, params.address_type));

        Some(Fix {
            id: Uuid::now_v7(),
            address: params.address,
            address_type: params.address_type,
            aircraft_id: aircraft.map(|a| a.id),
            timestamp: position.timestamp,
            received_at: report.received_at,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude_msl_ft: position.altitude_msl_ft,
            altitude_agl_ft: None,
            ground_speed_knots: position.ground_speed_knots,
            track_degrees: position.track_degrees,
            climb_fpm: params.climb_fpm,
            raw_hash: Some(report.content_hash()),
            source_metadata: Some(SourceMetadata::Ogn {
                snr_db: params.snr_db,
                bit_errors_corrected: params.bit_errors_corrected,
                freq_offset_khz: params.freq_offset_khz,
            }),
            aircraft_type: Some(params.aircraft_type),
            flight_id: None,
        })
    }

    fn normalize_adsb(&self, report: &RawReport) -> Option<Fix> {
        let position = match adsb::parse_record(&report.bytes, report.received_at) {
            Ok(position) => position,
            Err(adsb::AdsbParseError::MissingPosition) => {
                trace!("Skipping ADS-B record without position");
                return None;
            }
            Err(e) => {
                debug!("Discarding malformed ADS-B record: {e}");
                metrics::counter!("ingest.reports.malformed").increment(1);
                return None;
            }
        };

        let aircraft = self.registry.lookup(&crate::aircraft::AircraftKey::new(
            position.address,
            position.address_type,
        ));

        Some(Fix {
            id: Uuid::now_v7(),
            address: position.address,
            address_type: position.address_type,
            aircraft_id: aircraft.map(|a| a.id),
            timestamp: position.timestamp,
            received_at: report.received_at,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude_msl_ft: position.altitude_msl_ft,
            altitude_agl_ft: position.on_ground.then_some(0),
            ground_speed_knots: position.ground_speed_knots,
            track_degrees: position.track_degrees,
            climb_fpm: position.climb_fpm,
            raw_hash: Some(report.content_hash()),
            source_metadata: Some(SourceMetadata::Adsb {
                nic: position.nic,
                nac_p: position.nac_p,
                emitter_category: position.emitter_category.clone(),
            }),
            aircraft_type: None,
            flight_id: None,
        })
    }

    fn fan_out_fix(&self, fix: &Fix) {
        if let Some(router) = &self.router {
            router.publish_at(
                fix.latitude,
                fix.longitude,
                &ServerMessage::FixReceived {
                    fix: LiveFix::from(fix),
                },
            );
        }
    }

    /// Flight lifecycle changes are pushed as refreshed aircraft snapshots
    /// to every connection watching the aircraft's position
    fn fan_out_events(&self, events: &[FlightEvent]) {
        let Some(router) = &self.router else {
            return;
        };
        for event in events {
            let Some(flight) = event.flight() else {
                continue;
            };
            let Some(latest) = self.fixes_repo.latest_fix(&flight.key()) else {
                continue;
            };
            let recent_fixes = self
                .fixes_repo
                .recent_fixes(&flight.key(), self.live_config.recent_fixes_limit)
                .iter()
                .map(LiveFix::from)
                .collect();
            let aircraft = AircraftStatus::for_fix(&self.registry, &latest, Some(flight.state()));
            router.publish_at(
                latest.latitude,
                latest.longitude,
                &ServerMessage::AircraftReceived {
                    aircraft,
                    recent_fixes,
                },
            );
        }
    }

    /// Periodic jobs: the timeout sweep and stale-state cleanup. Spawned by
    /// the composition root, fans swept events out like live ones.
    pub fn start_background_tasks(&self, sweep_interval_secs: u64) {
        let processor = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(sweep_interval_secs));
            // Skip the immediate first tick
            interval.tick().await;
            loop {
                interval.tick().await;
                let now = Utc::now();
                let events = processor.tracker.sweep_timeouts(now).await;
                processor.fan_out_events(&events);
                processor.tracker.cleanup_stale_states(now);
            }
        });
        tracing::info!(
            "Started flight timeout sweeper (every {} seconds)",
            sweep_interval_secs
        );
    }
}
