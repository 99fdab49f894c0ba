//! Parser for ADS-B position records.
//!
//! The feed delivers one JSON object per aircraft state, in the shape
//! produced by the usual 1090 MHz decoder chains:
//!
//! ```json
//! {"hex":"39d304","time":1717230000.5,"lat":43.74,"lon":5.78,
//!  "alt_baro":3200,"gs":93.1,"track":271.2,"baro_rate":-640,
//!  "nic":8,"nac_p":9,"category":"A1"}
//! ```
//!
//! `alt_baro` is the string `"ground"` for surface reports.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::aircraft::AddressType;

#[derive(Debug, Error)]
pub enum AdsbParseError {
    #[error("invalid json: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error("malformed icao address")]
    BadAddress,
    #[error("record carries no position")]
    MissingPosition,
}

#[derive(Debug, Deserialize)]
struct AdsbRecord {
    hex: String,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    alt_baro: Option<AltBaro>,
    #[serde(default)]
    gs: Option<f32>,
    #[serde(default)]
    track: Option<f32>,
    #[serde(default)]
    baro_rate: Option<i32>,
    #[serde(default)]
    nic: Option<u8>,
    #[serde(default)]
    nac_p: Option<u8>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AltBaro {
    Feet(i32),
    Text(String),
}

/// A parsed ADS-B position report. Addresses are always ICAO.
#[derive(Debug, Clone, PartialEq)]
pub struct AdsbPosition {
    pub address: u32,
    pub address_type: AddressType,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// None for surface reports
    pub altitude_msl_ft: Option<i32>,
    pub on_ground: bool,
    pub ground_speed_knots: Option<f32>,
    pub track_degrees: Option<f32>,
    pub climb_fpm: Option<i32>,
    pub nic: Option<u8>,
    pub nac_p: Option<u8>,
    pub emitter_category: Option<String>,
}

/// Parse one JSON record. Records without a decoded position (e.g. velocity
/// or ident-only updates) report `MissingPosition` and are skipped upstream.
pub fn parse_record(
    bytes: &[u8],
    received_at: DateTime<Utc>,
) -> Result<AdsbPosition, AdsbParseError> {
    let record: AdsbRecord = serde_json::from_slice(bytes)?;

    let address =
        u32::from_str_radix(record.hex.trim_start_matches('~'), 16).map_err(|_| AdsbParseError::BadAddress)?;
    if address > 0xFF_FFFF {
        return Err(AdsbParseError::BadAddress);
    }

    let (latitude, longitude) = match (record.lat, record.lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(AdsbParseError::MissingPosition),
    };

    let timestamp = record
        .time
        .and_then(|epoch| DateTime::from_timestamp_millis((epoch * 1000.0) as i64))
        .unwrap_or(received_at);

    let (altitude_msl_ft, on_ground) = match record.alt_baro {
        Some(AltBaro::Feet(feet)) => (Some(feet), false),
        Some(AltBaro::Text(text)) => (None, text == "ground"),
        None => (None, false),
    };

    Ok(AdsbPosition {
        address,
        address_type: AddressType::Icao,
        timestamp,
        latitude,
        longitude,
        altitude_msl_ft,
        on_ground,
        ground_speed_knots: record.gs,
        track_degrees: record.track,
        climb_fpm: record.baro_rate,
        nic: record.nic,
        nac_p: record.nac_p,
        emitter_category: record.category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_airborne_record() {
        let json = br#"{"hex":"39d304","time":1748772000.5,"lat":43.74,"lon":5.78,"alt_baro":3200,"gs":93.1,"track":271.2,"baro_rate":-640,"nic":8,"nac_p":9,"category":"A1"}"#;
        let position = parse_record(json, received_at()).unwrap();

        assert_eq!(position.address, 0x39D304);
        assert_eq!(position.address_type, AddressType::Icao);
        assert_eq!(position.latitude, 43.74);
        assert_eq!(position.altitude_msl_ft, Some(3200));
        assert!(!position.on_ground);
        assert_eq!(position.climb_fpm, Some(-640));
        assert_eq!(position.nic, Some(8));
        assert_eq!(position.nac_p, Some(9));
        assert_eq!(position.emitter_category.as_deref(), Some("A1"));
        assert_eq!(position.timestamp.timestamp(), 1_748_772_000);
    }

    #[test]
    fn test_parse_surface_record() {
        let json = br#"{"hex":"39d304","lat":43.74,"lon":5.78,"alt_baro":"ground","gs":4.0}"#;
        let position = parse_record(json, received_at()).unwrap();
        assert!(position.on_ground);
        assert_eq!(position.altitude_msl_ft, None);
        // No time field: fall back to arrival time
        assert_eq!(position.timestamp, received_at());
    }

    #[test]
    fn test_record_without_position_is_skipped() {
        let json = br#"{"hex":"39d304","gs":120.0,"track":90.0}"#;
        assert!(matches!(
            parse_record(json, received_at()),
            Err(AdsbParseError::MissingPosition)
        ));
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            parse_record(b"not json", received_at()),
            Err(AdsbParseError::BadJson(_))
        ));
    }

    #[test]
    fn test_bad_address() {
        let json = br#"{"hex":"zzz","lat":1.0,"lon":2.0}"#;
        assert!(matches!(
            parse_record(json, received_at()),
            Err(AdsbParseError::BadAddress)
        ));
    }
}
