use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::aircraft::AircraftKey;
use crate::flights::{Flight, FlightState};
use crate::geometry::BoundingBox;

/// Snapshot of the incremental aggregates written through on each fix
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub last_fix_at: DateTime<Utc>,
    pub bounding_box: BoundingBox,
    pub total_distance_meters: f64,
    pub maximum_displacement_meters: f64,
}

struct Inner {
    flights: DashMap<Uuid, Flight>,
    /// At most one active flight per aircraft
    active: DashMap<AircraftKey, Uuid>,
}

/// In-memory flight store
#[derive(Clone)]
pub struct FlightsRepository {
    inner: Arc<Inner>,
}

impl Default for FlightsRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightsRepository {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flights: DashMap::new(),
                active: DashMap::new(),
            }),
        }
    }

    /// Register a newly opened flight. Fails if the aircraft already has an
    /// active flight; callers serialize per aircraft so this indicates a bug.
    pub fn create_flight(&self, flight: Flight) -> Result<()> {
        let key = flight.key();
        match self.inner.active.entry(key) {
            Entry::Occupied(existing) => {
                anyhow::bail!(
                    "aircraft {} already has active flight {}",
                    key,
                    existing.get()
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(flight.id);
            }
        }
        self.inner.flights.insert(flight.id, flight);
        Ok(())
    }

    pub fn get_flight_by_id(&self, id: Uuid) -> Option<Flight> {
        self.inner.flights.get(&id).map(|entry| entry.value().clone())
    }

    pub fn active_flight_for(&self, key: &AircraftKey) -> Option<Flight> {
        let id = *self.inner.active.get(key)?.value();
        self.get_flight_by_id(id)
    }

    /// Write through the aggregates maintained by the flight tracker
    pub fn update_progress(&self, id: Uuid, update: ProgressUpdate) {
        if let Some(mut flight) = self.inner.flights.get_mut(&id) {
            flight.last_fix_at = update.last_fix_at;
            flight.bounding_box = update.bounding_box;
            flight.total_distance_meters = update.total_distance_meters;
            flight.maximum_displacement_meters = update.maximum_displacement_meters;
        }
    }

    /// Transition to `Landed`. The landing time is set exactly once; a flight
    /// already in a terminal state is left untouched and `false` is returned.
    pub fn complete_flight(
        &self,
        id: Uuid,
        landing_time: DateTime<Utc>,
        arrival_airport_id: Option<u32>,
        outlanding: bool,
    ) -> Result<bool> {
        let Some(mut flight) = self.inner.flights.get_mut(&id) else {
            anyhow::bail!("flight {} not found", id);
        };
        if flight.state() != FlightState::Active {
            warn!("Ignoring landing for flight {} already in state {:?}", id, flight.state());
            return Ok(false);
        }

        flight.landing_time = Some(landing_time);
        flight.arrival_airport_id = arrival_airport_id;
        flight.outlanding = outlanding;
        flight.last_fix_at = landing_time;
        let key = flight.value().key();
        drop(flight);

        self.remove_active(key, id);
        metrics::counter!("flight_tracker.flights_completed_total").increment(1);
        Ok(true)
    }

    /// Transition to `TimedOut`. Terminal flights are left untouched.
    pub fn timeout_flight(&self, id: Uuid, timed_out_at: DateTime<Utc>) -> Result<bool> {
        let Some(mut flight) = self.inner.flights.get_mut(&id) else {
            anyhow::bail!("flight {} not found", id);
        };
        if flight.state() != FlightState::Active {
            return Ok(false);
        }

        flight.timed_out_at = Some(timed_out_at);
        let key = flight.value().key();
        drop(flight);

        self.remove_active(key, id);
        metrics::counter!("flight_tracker.flights_timed_out_total").increment(1);
        Ok(true)
    }

    fn remove_active(&self, key: AircraftKey, id: Uuid) {
        // Only clear the slot if it still points at this flight
        self.inner
            .active
            .remove_if(&key, |_, active_id| *active_id == id);
    }

    pub fn record_tow(
        &self,
        glider_flight_id: Uuid,
        tow_aircraft_id: Option<Uuid>,
        tow_flight_id: Uuid,
    ) {
        if let Some(mut flight) = self.inner.flights.get_mut(&glider_flight_id) {
            flight.towed_by_aircraft_id = tow_aircraft_id;
            flight.towed_by_flight_id = Some(tow_flight_id);
        }
    }

    pub fn record_tow_release(
        &self,
        glider_flight_id: Uuid,
        altitude_msl_ft: i32,
        release_time: DateTime<Utc>,
    ) {
        if let Some(mut flight) = self.inner.flights.get_mut(&glider_flight_id) {
            // First divergence wins
            if flight.tow_release_time.is_none() {
                flight.tow_release_altitude_msl_ft = Some(altitude_msl_ft);
                flight.tow_release_time = Some(release_time);
            }
        }
    }

    /// Active flights whose last fix is older than `cutoff`, for the sweeper
    pub fn stale_active_flights(&self, cutoff: DateTime<Utc>) -> Vec<Flight> {
        self.inner
            .active
            .iter()
            .filter_map(|entry| self.get_flight_by_id(*entry.value()))
            .filter(|flight| flight.last_fix_at < cutoff)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn total_flights(&self) -> usize {
        self.inner.flights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft::AddressType;
    use chrono::TimeZone;

    fn test_flight(address: u32) -> Flight {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        Flight {
            id: Uuid::now_v7(),
            address,
            address_type: AddressType::Flarm,
            aircraft_id: None,
            takeoff_time: Some(base),
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
            first_fix_at: base,
            last_fix_at: base,
        }
    }

    #[test]
    fn test_single_active_flight_per_aircraft() {
        let repo = FlightsRepository::new();
        let flight = test_flight(0x111111);
        let key = flight.key();
        repo.create_flight(flight).unwrap();

        assert!(repo.active_flight_for(&key).is_some());
        assert!(repo.create_flight(test_flight(0x111111)).is_err());
        // A different aircraft is unaffected
        repo.create_flight(test_flight(0x222222)).unwrap();
        assert_eq!(repo.active_count(), 2);
    }

    #[test]
    fn test_landing_time_set_exactly_once() {
        let repo = FlightsRepository::new();
        let flight = test_flight(0x111111);
        let id = flight.id;
        let key = flight.key();
        repo.create_flight(flight).unwrap();

        let landing = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
        assert!(repo.complete_flight(id, landing, Some(1), false).unwrap());
        assert!(repo.active_flight_for(&key).is_none());

        // Second landing attempt is a no-op
        let later = landing + chrono::Duration::hours(1);
        assert!(!repo.complete_flight(id, later, None, true).unwrap());
        let stored = repo.get_flight_by_id(id).unwrap();
        assert_eq!(stored.landing_time, Some(landing));
        assert_eq!(stored.arrival_airport_id, Some(1));
        assert!(!stored.outlanding);
    }

    #[test]
    fn test_timeout_does_not_touch_landed_flight() {
        let repo = FlightsRepository::new();
        let flight = test_flight(0x111111);
        let id = flight.id;
        repo.create_flight(flight).unwrap();

        let landing = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
        repo.complete_flight(id, landing, None, true).unwrap();
        assert!(!repo.timeout_flight(id, landing + chrono::Duration::hours(1)).unwrap());
        assert_eq!(repo.get_flight_by_id(id).unwrap().state(), FlightState::Landed);
    }

    #[test]
    fn test_stale_active_flights() {
        let repo = FlightsRepository::new();
        let flight = test_flight(0x111111);
        let last_fix = flight.last_fix_at;
        repo.create_flight(flight).unwrap();

        assert!(repo.stale_active_flights(last_fix - chrono::Duration::minutes(1)).is_empty());
        assert_eq!(repo.stale_active_flights(last_fix + chrono::Duration::minutes(6)).len(), 1);
    }
}
