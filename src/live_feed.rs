//! Wire types for the live WebSocket feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aircraft::{AddressType, AircraftRegistry, AircraftType};
use crate::fixes::Fix;
use crate::flights::FlightState;
use crate::geometry::BoundingBox;

/// A fix as sent to live viewers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFix {
    pub id: Uuid,
    pub address: String,
    pub address_type: AddressType,
    pub aircraft_id: Option<Uuid>,
    pub flight_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_msl_ft: Option<i32>,
    pub altitude_agl_ft: Option<i32>,
    pub ground_speed_knots: Option<f32>,
    pub track_degrees: Option<f32>,
    pub climb_fpm: Option<i32>,
}

impl From<&Fix> for LiveFix {
    fn from(fix: &Fix) -> Self {
        Self {
            id: fix.id,
            address: fix.key().address_hex(),
            address_type: fix.address_type,
            aircraft_id: fix.aircraft_id,
            flight_id: fix.flight_id,
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude_msl_ft: fix.altitude_msl_ft,
            altitude_agl_ft: fix.altitude_agl_ft,
            ground_speed_knots: fix.ground_speed_knots,
            track_degrees: fix.track_degrees,
            climb_fpm: fix.climb_fpm,
        }
    }
}

/// Aircraft summary carried by `aircraft_received`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AircraftStatus {
    pub aircraft_id: Option<Uuid>,
    pub address: String,
    pub address_type: AddressType,
    pub registration: Option<String>,
    pub aircraft_type: Option<AircraftType>,
    pub club_id: Option<Uuid>,
    pub flight_id: Option<Uuid>,
    pub flight_state: Option<FlightState>,
    pub latitude: f64,
    pub longitude: f64,
}

impl AircraftStatus {
    /// Build the status for an aircraft from its latest fix, enriched from
    /// the registry where the identity is known
    pub fn for_fix(registry: &AircraftRegistry, fix: &Fix, flight_state: Option<FlightState>) -> Self {
        let aircraft = registry.lookup(&fix.key());
        Self {
            aircraft_id: fix.aircraft_id.or(aircraft.as_ref().map(|a| a.id)),
            address: fix.key().address_hex(),
            address_type: fix.address_type,
            registration: aircraft.as_ref().and_then(|a| a.registration.clone()),
            aircraft_type: aircraft
                .as_ref()
                .map(|a| a.aircraft_type)
                .or(fix.aircraft_type),
            club_id: aircraft.as_ref().and_then(|a| a.club_id),
            flight_id: fix.flight_id,
            flight_state,
            latitude: fix.latitude,
            longitude: fix.longitude,
        }
    }
}

/// Server-to-client messages on the live socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionOpened,
    FixReceived {
        fix: LiveFix,
    },
    AircraftReceived {
        aircraft: AircraftStatus,
        recent_fixes: Vec<LiveFix>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Area,
}

/// Client-to-server messages on the live socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ClientAction,
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    pub bounds: BoundingBox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let raw = r#"{"action":"subscribe","type":"area","bounds":{"north":49.0,"south":48.0,"east":6.0,"west":5.0}}"#;
        let message: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message.action, ClientAction::Subscribe);
        assert_eq!(message.kind, SubscriptionKind::Area);
        assert_eq!(message.bounds.north, 49.0);
    }

    #[test]
    fn test_server_message_tags() {
        let json = serde_json::to_value(&ServerMessage::ConnectionOpened).unwrap();
        assert_eq!(json["type"], "connection_opened");
    }
}
