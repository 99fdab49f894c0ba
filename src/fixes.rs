use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::aircraft::{AddressType, AircraftKey, AircraftType};

/// Wire format of a raw position report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Ogn,
    Adsb,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Ogn => write!(f, "ogn"),
            ReportFormat::Adsb => write!(f, "adsb"),
        }
    }
}

/// SHA-256 digest of a raw report's bytes, the deduplication key component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportHash([u8; 32]);

impl ReportHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ReportHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for ReportHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ReportHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("hash must be 32 bytes"))?;
        Ok(Self(array))
    }
}

/// One raw position report as delivered by the ingestion bus.
/// Exists only while being processed; the content hash is what survives.
#[derive(Debug, Clone)]
pub struct RawReport {
    pub bytes: Vec<u8>,
    pub format: ReportFormat,
    pub received_at: DateTime<Utc>,
}

impl RawReport {
    pub fn new(bytes: Vec<u8>, format: ReportFormat, received_at: DateTime<Utc>) -> Self {
        Self {
            bytes,
            format,
            received_at,
        }
    }

    pub fn content_hash(&self) -> ReportHash {
        ReportHash::of(&self.bytes)
    }
}

/// Protocol-specific measurement bag, one variant per source protocol.
/// The open-map representation exists only at the serde boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum SourceMetadata {
    Ogn {
        snr_db: Option<f32>,
        bit_errors_corrected: Option<u32>,
        freq_offset_khz: Option<f32>,
    },
    Adsb {
        nic: Option<u8>,
        nac_p: Option<u8>,
        emitter_category: Option<String>,
    },
}

/// A single georeferenced observation for one aircraft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub id: Uuid,

    /// Broadcast identity of the tracker
    pub address: u32,
    pub address_type: AddressType,

    /// Registry reference, None when the identity is unknown to us.
    /// Unidentified fixes are stored for audit but drive no flight state.
    pub aircraft_id: Option<Uuid>,

    /// Position timestamp as reported by the tracker
    pub timestamp: DateTime<Utc>,
    /// When we pulled the report off the bus
    pub received_at: DateTime<Utc>,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude_msl_ft: Option<i32>,
    /// Derived from ground elevation where known, otherwise None
    pub altitude_agl_ft: Option<i32>,

    pub ground_speed_knots: Option<f32>,
    pub track_degrees: Option<f32>,
    pub climb_fpm: Option<i32>,

    /// Content hash of the raw report. None only for rows adopted from
    /// before the dedup cutover ("fast-forward" records).
    pub raw_hash: Option<ReportHash>,

    pub source_metadata: Option<SourceMetadata>,

    pub aircraft_type: Option<AircraftType>,

    /// Flight this fix was attributed to, assigned by the flight tracker
    pub flight_id: Option<Uuid>,
}

impl Fix {
    pub fn key(&self) -> AircraftKey {
        AircraftKey::new(self.address, self.address_type)
    }

    pub fn ground_speed_or_zero(&self) -> f32 {
        self.ground_speed_knots.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let report = RawReport::new(b"FLRDDA5BA>APRS:test".to_vec(), ReportFormat::Ogn, Utc::now());
        let again = RawReport::new(b"FLRDDA5BA>APRS:test".to_vec(), ReportFormat::Ogn, Utc::now());
        assert_eq!(report.content_hash(), again.content_hash());

        let different = RawReport::new(b"FLRDDA5BB>APRS:test".to_vec(), ReportFormat::Ogn, Utc::now());
        assert_ne!(report.content_hash(), different.content_hash());
    }

    #[test]
    fn test_report_hash_serde_roundtrip() {
        let hash = ReportHash::of(b"payload");
        let json = serde_json::to_string(&hash).unwrap();
        assert!(json.contains(&hex::encode(hash.as_bytes())));
        let back: ReportHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn test_source_metadata_tagged_repr() {
        let metadata = SourceMetadata::Adsb {
            nic: Some(8),
            nac_p: Some(9),
            emitter_category: Some("A1".to_string()),
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["protocol"], "adsb");
        assert_eq!(json["nic"], 8);
    }
}
