pub mod replay;
pub mod run;

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aircraft::{Aircraft, AircraftRegistry};
use crate::airports::AirportsRepository;
use crate::config::AloftConfig;
use crate::fix_processor::FixProcessor;
use crate::fixes_repo::FixesRepository;
use crate::flight_tracker::FlightTracker;
use crate::flights_repo::FlightsRepository;

/// Load the config file, falling back to defaults when it does not exist
pub(crate) fn load_config(path: &Path) -> Result<AloftConfig> {
    if path.exists() {
        info!("Loading configuration from {}", path.display());
        AloftConfig::load(path)
    } else {
        warn!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        Ok(AloftConfig::default())
    }
}

pub(crate) struct Pipeline {
    pub registry: AircraftRegistry,
    pub fixes_repo: FixesRepository,
    pub flights_repo: FlightsRepository,
    pub processor: FixProcessor,
}

/// Wire the ingestion pipeline up from configuration
pub(crate) fn build_pipeline(config: &AloftConfig) -> Result<Pipeline> {
    let registry = AircraftRegistry::new();
    for seed in &config.aircraft {
        registry.register(Aircraft {
            id: Uuid::new_v4(),
            address: seed.parsed_address()?,
            address_type: seed.address_type,
            registration: seed.registration.clone(),
            aircraft_type: seed.aircraft_type,
            is_tow_plane: seed.is_tow_plane,
            club_id: seed.club_id,
        });
    }
    info!("Aircraft registry seeded with {} entries", registry.len());

    let airports = AirportsRepository::new(config.airports.clone());
    info!("Airport reference list holds {} airports", airports.len());

    let fixes_repo = FixesRepository::new(config.ingest.dedup_cutover);
    let flights_repo = FlightsRepository::new();
    let tracker = FlightTracker::new(
        flights_repo.clone(),
        fixes_repo.clone(),
        airports,
        registry.clone(),
        config.tracker.clone(),
    );
    let processor = FixProcessor::new(
        registry.clone(),
        fixes_repo.clone(),
        tracker,
        config.live.clone(),
    );

    Ok(Pipeline {
        registry,
        fixes_repo,
        flights_repo,
        processor,
    })
}
