use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::aircraft::{AddressType, AircraftType};
use crate::airports::Airport;

/// Top-level configuration, loaded from `aloft.toml`.
///
/// Every flight-detection threshold lives here: the heuristics are tunable
/// per deployment, with the 5-minute inactivity window as the default the
/// rest of the defaults were observed alongside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AloftConfig {
    pub ingest: IngestConfig,
    pub tracker: TrackerConfig,
    pub live: LiveConfig,
    pub web: WebConfig,
    /// Airport reference data; the import pipeline that would populate this
    /// in production is out of scope, so deployments list their fields here
    pub airports: Vec<Airport>,
    /// Aircraft registry seed
    pub aircraft: Vec<AircraftSeed>,
}

impl AloftConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AloftConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// NATS server URL; overridden by the NATS_URL environment variable
    pub nats_url: String,
    /// JetStream stream holding raw reports
    pub stream: String,
    /// Durable consumer name for this instance
    pub consumer: String,
    /// Subject for OGN/APRS text reports
    pub ogn_subject: String,
    /// Subject for ADS-B JSON records
    pub adsb_subject: String,
    /// Dedup uniqueness applies from this instant forward; rows older than
    /// this may lack a content hash and never conflict (fast-forward cutover)
    pub dedup_cutover: Option<DateTime<Utc>>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            stream: "REPORTS_RAW".to_string(),
            consumer: "aloft-run".to_string(),
            ogn_subject: "reports.raw.ogn".to_string(),
            adsb_subject: "reports.raw.adsb".to_string(),
            dedup_cutover: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Ground speed at or above which a fix counts as airborne
    pub active_speed_knots: f32,
    /// With no altitude data at all, speed below this means "on the ground"
    pub no_altitude_active_speed_knots: f32,
    /// A slow fix at or above this AGL is still airborne (hover, slow glider)
    pub landing_agl_ft: i32,
    /// Below this AGL a first fix counts as a takeoff rather than a
    /// mid-flight appearance
    pub takeoff_agl_ft: i32,
    /// Consecutive inactive fixes required before a landing is declared
    pub landing_debounce_fixes: usize,
    /// No fix for this long while nominally airborne times the flight out.
    /// The one constant with an observed production value: 5 minutes.
    pub inactivity_timeout_secs: u64,
    /// Period of the background timeout sweep
    pub sweep_interval_secs: u64,
    /// Departure/arrival airports are looked up within this radius
    pub airport_radius_m: f64,
    pub towing: TowingConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            active_speed_knots: 25.0,
            no_altitude_active_speed_knots: 80.0,
            landing_agl_ft: 250,
            takeoff_agl_ft: 100,
            landing_debounce_fixes: 5,
            inactivity_timeout_secs: 300,
            sweep_interval_secs: 30,
            airport_radius_m: 3000.0,
            towing: TowingConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn inactivity_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inactivity_timeout_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TowingConfig {
    /// A towplane this close at takeoff is considered the tug
    pub capture_radius_m: f64,
    pub capture_altitude_diff_ft: i32,
    /// Towplane fix must be at most this old to be considered
    pub capture_window_secs: i64,
    /// 3-D separation beyond which the tow is released
    pub release_separation_ft: f64,
    /// Diverging tracks beyond this angle also mean release
    pub release_heading_diff_deg: f64,
    /// Heading divergence only counts beyond this distance
    pub release_min_distance_m: f64,
    /// A silent towplane is assumed to have released
    pub towplane_silence_secs: i64,
}

impl Default for TowingConfig {
    fn default() -> Self {
        Self {
            capture_radius_m: 200.0,
            capture_altitude_diff_ft: 200,
            capture_window_secs: 30,
            release_separation_ft: 500.0,
            release_heading_diff_deg: 45.0,
            release_min_distance_m: 100.0,
            towplane_silence_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Outbound buffer per connection; overflow tears the connection down
    pub channel_capacity: usize,
    /// Recent fixes sent with each aircraft_received message
    pub recent_fixes_limit: usize,
    /// Latest-fix cutoff when answering "who is in this area"
    pub freshness_window_secs: i64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            recent_fixes_limit: 20,
            freshness_window_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub interface: String,
    pub port: u16,
    /// Individual aircraft are returned up to this count; beyond it the
    /// search response switches to clusters
    pub cluster_threshold: usize,
    /// Prometheus exporter listen address, disabled when absent
    pub metrics_listen: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            interface: "0.0.0.0".to_string(),
            port: 8064,
            cluster_threshold: 250,
            metrics_listen: None,
        }
    }
}

/// One registry entry in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftSeed {
    pub address: String,
    pub address_type: AddressType,
    #[serde(default)]
    pub registration: Option<String>,
    pub aircraft_type: AircraftType,
    #[serde(default)]
    pub is_tow_plane: bool,
    #[serde(default)]
    pub club_id: Option<uuid::Uuid>,
}

impl AircraftSeed {
    pub fn parsed_address(&self) -> Result<u32> {
        u32::from_str_radix(self.address.trim_start_matches("0x"), 16)
            .with_context(|| format!("invalid hex aircraft address {:?}", self.address))
    }
}
