use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::geometry::haversine_distance;

/// Reference data for one airport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Airport {
    pub id: u32,
    /// Airport identifier (e.g. "LFNM")
    pub ident: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Field elevation, also used as the ground-elevation estimate for
    /// AGL derivation in the airport's vicinity
    pub elevation_ft: Option<i32>,
}

/// In-memory airport reference list.
///
/// The fleet of airports a deployment cares about is small (hundreds), so a
/// linear nearest scan is fine; the import pipeline that would feed this in
/// production is out of scope here.
#[derive(Clone, Default)]
pub struct AirportsRepository {
    airports: Arc<Vec<Airport>>,
}

impl AirportsRepository {
    pub fn new(airports: Vec<Airport>) -> Self {
        Self {
            airports: Arc::new(airports),
        }
    }

    pub fn get_by_id(&self, id: u32) -> Option<&Airport> {
        self.airports.iter().find(|a| a.id == id)
    }

    /// Nearest airport within `radius_m` of the given point, if any
    pub fn nearest_within(&self, latitude: f64, longitude: f64, radius_m: f64) -> Option<&Airport> {
        self.airports
            .iter()
            .map(|airport| {
                let distance =
                    haversine_distance(latitude, longitude, airport.latitude, airport.longitude);
                (airport, distance)
            })
            .filter(|(_, distance)| *distance <= radius_m)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(airport, _)| airport)
    }

    /// Ground elevation estimate at a point: the elevation of the nearest
    /// airport within 10 km. Away from any airport we have no terrain data
    /// and return None, which keeps AGL null rather than inventing it.
    pub fn ground_elevation_ft(&self, latitude: f64, longitude: f64) -> Option<i32> {
        self.nearest_within(latitude, longitude, 10_000.0)
            .and_then(|airport| airport.elevation_ft)
    }

    pub fn len(&self) -> usize {
        self.airports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.airports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_airports() -> AirportsRepository {
        AirportsRepository::new(vec![
            Airport {
                id: 1,
                ident: "LFNM".to_string(),
                name: "Vinon".to_string(),
                latitude: 43.737,
                longitude: 5.784,
                elevation_ft: Some(902),
            },
            Airport {
                id: 2,
                ident: "LFNA".to_string(),
                name: "Gap Tallard".to_string(),
                latitude: 44.455,
                longitude: 6.038,
                elevation_ft: Some(1986),
            },
        ])
    }

    #[test]
    fn test_nearest_within_radius() {
        let airports = test_airports();
        let found = airports.nearest_within(43.74, 5.79, 3000.0);
        assert_eq!(found.map(|a| a.id), Some(1));
    }

    #[test]
    fn test_nearest_outside_radius() {
        let airports = test_airports();
        // Roughly 40 km from either airport
        assert!(airports.nearest_within(44.0, 5.3, 3000.0).is_none());
    }

    #[test]
    fn test_ground_elevation_near_airport() {
        let airports = test_airports();
        assert_eq!(airports.ground_elevation_ft(43.74, 5.79), Some(902));
        assert_eq!(airports.ground_elevation_ft(50.0, 0.0), None);
    }
}
