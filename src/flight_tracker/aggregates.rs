use crate::geometry::{BoundingBox, haversine_distance};

/// Incremental spatial statistics for one open flight.
///
/// Everything here is O(1) per fix; nothing on the hot path ever walks the
/// flight's full fix history. (Recomputation from history is reserved for
/// offline repair tooling.)
#[derive(Debug, Clone)]
pub struct FlightAggregates {
    /// Expands to cover every point, never shrinks
    pub bounding_box: BoundingBox,
    /// Sum of great-circle legs between consecutive points, meters
    pub total_distance_meters: f64,
    /// Greatest great-circle distance from the first point, meters
    pub maximum_displacement_meters: f64,
    origin: (f64, f64),
    previous: (f64, f64),
}

impl FlightAggregates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            bounding_box: BoundingBox::from_point(latitude, longitude),
            total_distance_meters: 0.0,
            maximum_displacement_meters: 0.0,
            origin: (latitude, longitude),
            previous: (latitude, longitude),
        }
    }

    pub fn update(&mut self, latitude: f64, longitude: f64) {
        self.bounding_box.expand_to(latitude, longitude);

        let leg = haversine_distance(self.previous.0, self.previous.1, latitude, longitude);
        self.total_distance_meters += leg;

        let displacement = haversine_distance(self.origin.0, self.origin.1, latitude, longitude);
        if displacement > self.maximum_displacement_meters {
            self.maximum_displacement_meters = displacement;
        }

        self.previous = (latitude, longitude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_is_exact() {
        let mut aggregates = FlightAggregates::new(10.0, 20.0);
        aggregates.update(12.0, 19.0);
        aggregates.update(9.0, 22.0);

        let bbox = aggregates.bounding_box;
        assert_eq!(bbox.south, 9.0);
        assert_eq!(bbox.north, 12.0);
        assert_eq!(bbox.west, 19.0);
        assert_eq!(bbox.east, 22.0);
    }

    #[test]
    fn test_distance_accumulates_over_legs() {
        let mut aggregates = FlightAggregates::new(45.0, 5.0);
        aggregates.update(45.0, 5.1);
        let after_one_leg = aggregates.total_distance_meters;
        assert!(after_one_leg > 0.0);

        aggregates.update(45.0, 5.0);
        // Out and back: total distance doubles, displacement does not grow
        assert!((aggregates.total_distance_meters - 2.0 * after_one_leg).abs() < 1.0);
        assert!(aggregates.maximum_displacement_meters <= after_one_leg + 1.0);
    }

    #[test]
    fn test_displacement_is_monotonic() {
        let mut aggregates = FlightAggregates::new(45.0, 5.0);
        aggregates.update(45.0, 5.2);
        let far = aggregates.maximum_displacement_meters;
        aggregates.update(45.0, 5.05);
        assert_eq!(aggregates.maximum_displacement_meters, far);
    }
}
