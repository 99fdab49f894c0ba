use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aircraft::{AddressType, AircraftKey};
use crate::geometry::BoundingBox;

/// Lifecycle state of a flight. `Landed` and `TimedOut` are terminal; a
/// later fix for the same aircraft opens a new flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightState {
    Active,
    Landed,
    TimedOut,
}

/// One continuous airborne episode for one aircraft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flight {
    pub id: Uuid,

    /// Broadcast identity the flight was derived from
    pub address: u32,
    pub address_type: AddressType,
    /// Registry reference when the aircraft is known
    pub aircraft_id: Option<Uuid>,

    /// None when the aircraft was first seen already airborne
    pub takeoff_time: Option<DateTime<Utc>>,
    /// Set exactly once, at the transition into `Landed`
    pub landing_time: Option<DateTime<Utc>>,
    /// Set exactly once, at the transition into `TimedOut`
    pub timed_out_at: Option<DateTime<Utc>>,

    pub departure_airport_id: Option<u32>,
    pub arrival_airport_id: Option<u32>,
    /// Landed away from any known airport
    pub outlanding: bool,

    pub towed_by_aircraft_id: Option<Uuid>,
    pub towed_by_flight_id: Option<Uuid>,
    pub tow_release_altitude_msl_ft: Option<i32>,
    pub tow_release_time: Option<DateTime<Utc>>,

    /// Running bounding box over every fix attributed to this flight.
    /// Only ever expands while the flight is active.
    pub bounding_box: BoundingBox,
    /// Cumulative great-circle track distance in meters
    pub total_distance_meters: f64,
    /// Maximum great-circle displacement from the first point, in meters
    pub maximum_displacement_meters: f64,

    pub club_id: Option<Uuid>,

    pub first_fix_at: DateTime<Utc>,
    pub last_fix_at: DateTime<Utc>,
}

impl Flight {
    pub fn key(&self) -> AircraftKey {
        AircraftKey::new(self.address, self.address_type)
    }

    /// State from the terminal markers alone
    pub fn state(&self) -> FlightState {
        if self.landing_time.is_some() {
            FlightState::Landed
        } else if self.timed_out_at.is_some() {
            FlightState::TimedOut
        } else {
            FlightState::Active
        }
    }

    /// State as it must be reported at `now`: a nominally active flight whose
    /// last fix is older than the inactivity window is already timed out,
    /// whether or not the sweeper has caught up with it.
    pub fn state_at(&self, now: DateTime<Utc>, inactivity_timeout: Duration) -> FlightState {
        match self.state() {
            FlightState::Active if now - self.last_fix_at > inactivity_timeout => {
                FlightState::TimedOut
            }
            state => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_flight(last_fix_at: DateTime<Utc>) -> Flight {
        Flight {
            id: Uuid::now_v7(),
            address: 0xDDA5BA,
            address_type: AddressType::Flarm,
            aircraft_id: None,
            takeoff_time: Some(last_fix_at),
            landing_time: None,
            timed_out_at: None,
            departure_airport_id: None,
            arrival_airport_id: None,
            outlanding: false,
            towed_by_aircraft_id: None,
            towed_by_flight_id: None,
            tow_release_altitude_msl_ft: None,
            tow_release_time: None,
            bounding_box: BoundingBox::from_point(43.7, 5.8),
            total_distance_meters: 0.0,
            maximum_displacement_meters: 0.0,
            club_id: None,
            first_fix_at: last_fix_at,
            last_fix_at,
        }
    }

    #[test]
    fn test_state_from_terminal_markers() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut flight = test_flight(base);
        assert_eq!(flight.state(), FlightState::Active);

        flight.timed_out_at = Some(base + Duration::minutes(5));
        assert_eq!(flight.state(), FlightState::TimedOut);

        flight.timed_out_at = None;
        flight.landing_time = Some(base + Duration::hours(1));
        assert_eq!(flight.state(), FlightState::Landed);
    }

    #[test]
    fn test_state_at_applies_lazy_timeout() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let flight = test_flight(base);
        let window = Duration::minutes(5);

        assert_eq!(
            flight.state_at(base + Duration::minutes(4), window),
            FlightState::Active
        );
        assert_eq!(
            flight.state_at(base + Duration::minutes(6), window),
            FlightState::TimedOut
        );
    }
}
