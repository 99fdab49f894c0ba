use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Which addressing scheme a tracker uses for its 24-bit address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Unknown,
    Icao,
    Flarm,
    Ogn,
}

impl AddressType {
    pub fn as_prefix(&self) -> &'static str {
        match self {
            AddressType::Icao => "ICAO",
            AddressType::Flarm => "FLARM",
            AddressType::Ogn => "OGN",
            AddressType::Unknown => "Unknown",
        }
    }
}

impl From<u8> for AddressType {
    fn from(v: u8) -> Self {
        match v & 0x03 {
            0b01 => AddressType::Icao,
            0b10 => AddressType::Flarm,
            0b11 => AddressType::Ogn,
            _ => AddressType::Unknown,
        }
    }
}

/// OGN aircraft type table (4-bit field in the tracker id flags)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AircraftType {
    Reserved0,
    Glider,
    TowTug,
    HelicopterGyro,
    SkydiverParachute,
    DropPlane,
    HangGlider,
    Paraglider,
    RecipEngine,
    JetTurboprop,
    Unknown,
    Balloon,
    Airship,
    Uav,
    ReservedE,
    StaticObstacle,
}

impl From<u8> for AircraftType {
    fn from(v: u8) -> Self {
        match v & 0x0F {
            0x0 => AircraftType::Reserved0,
            0x1 => AircraftType::Glider,
            0x2 => AircraftType::TowTug,
            0x3 => AircraftType::HelicopterGyro,
            0x4 => AircraftType::SkydiverParachute,
            0x5 => AircraftType::DropPlane,
            0x6 => AircraftType::HangGlider,
            0x7 => AircraftType::Paraglider,
            0x8 => AircraftType::RecipEngine,
            0x9 => AircraftType::JetTurboprop,
            0xA => AircraftType::Unknown,
            0xB => AircraftType::Balloon,
            0xC => AircraftType::Airship,
            0xD => AircraftType::Uav,
            0xE => AircraftType::ReservedE,
            _ => AircraftType::StaticObstacle,
        }
    }
}

/// The identity a tracker broadcasts: 24-bit address plus addressing scheme.
/// Two trackers with the same raw address but different schemes are
/// different aircraft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AircraftKey {
    pub address: u32,
    pub address_type: AddressType,
}

impl AircraftKey {
    pub fn new(address: u32, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
        }
    }

    /// Canonical 6-character uppercase hex form of the address
    pub fn address_hex(&self) -> String {
        format!("{:06X}", self.address)
    }
}

impl std::fmt::Display for AircraftKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.address_type.as_prefix(), self.address_hex())
    }
}

/// A known aircraft from the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: Uuid,
    pub address: u32,
    pub address_type: AddressType,
    pub registration: Option<String>,
    pub aircraft_type: AircraftType,
    pub is_tow_plane: bool,
    pub club_id: Option<Uuid>,
}

impl Aircraft {
    pub fn key(&self) -> AircraftKey {
        AircraftKey::new(self.address, self.address_type)
    }
}

/// In-memory aircraft registry keyed by broadcast identity.
///
/// Population is a seed/config concern; the hot path only ever looks up.
#[derive(Clone, Default)]
pub struct AircraftRegistry {
    by_key: Arc<DashMap<AircraftKey, Arc<Aircraft>>>,
    by_id: Arc<DashMap<Uuid, AircraftKey>>,
}

impl AircraftRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, aircraft: Aircraft) -> Arc<Aircraft> {
        let aircraft = Arc::new(aircraft);
        self.by_id.insert(aircraft.id, aircraft.key());
        self.by_key.insert(aircraft.key(), Arc::clone(&aircraft));
        aircraft
    }

    pub fn lookup(&self, key: &AircraftKey) -> Option<Arc<Aircraft>> {
        self.by_key.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn lookup_by_id(&self, id: Uuid) -> Option<Arc<Aircraft>> {
        let key = *self.by_id.get(&id)?.value();
        self.lookup(&key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_is_padded() {
        let key = AircraftKey::new(0xDA5BA, AddressType::Flarm);
        assert_eq!(key.address_hex(), "0DA5BA");
        assert_eq!(key.to_string(), "FLARM-0DA5BA");
    }

    #[test]
    fn test_registry_lookup_roundtrip() {
        let registry = AircraftRegistry::new();
        let aircraft = registry.register(Aircraft {
            id: Uuid::new_v4(),
            address: 0xDDA5BA,
            address_type: AddressType::Flarm,
            registration: Some("F-CABC".to_string()),
            aircraft_type: AircraftType::Glider,
            is_tow_plane: false,
            club_id: None,
        });

        let key = AircraftKey::new(0xDDA5BA, AddressType::Flarm);
        let found = registry.lookup(&key).expect("aircraft should be registered");
        assert_eq!(found.id, aircraft.id);
        assert!(registry.lookup_by_id(aircraft.id).is_some());

        let other = AircraftKey::new(0xDDA5BA, AddressType::Icao);
        assert!(registry.lookup(&other).is_none());
    }
}
