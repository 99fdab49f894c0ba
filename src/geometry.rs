use serde::{Deserialize, Serialize};

/// Calculate the distance between two points using the Haversine formula
/// Returns distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Smallest absolute difference between two track angles, in degrees (0..=180)
pub fn angular_difference(a_deg: f64, b_deg: f64) -> f64 {
    let diff = (a_deg - b_deg).rem_euclid(360.0);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// A geographic bounding rectangle
///
/// `west > east` is valid and means the rectangle crosses the antimeridian;
/// `contains` and the cell enumeration in `geo_cells` handle that case by
/// splitting into two rectangles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// A degenerate box covering exactly one point
    pub fn from_point(latitude: f64, longitude: f64) -> Self {
        Self {
            north: latitude,
            south: latitude,
            east: longitude,
            west: longitude,
        }
    }

    /// Empty or inverted rectangles are used by clients to clear a subscription
    pub fn is_empty(&self) -> bool {
        (self.north == 0.0 && self.south == 0.0 && self.east == 0.0 && self.west == 0.0)
            || self.north <= self.south
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(-90.0..=90.0).contains(&self.north) || !(-90.0..=90.0).contains(&self.south) {
            anyhow::bail!("latitude must be between -90 and 90 degrees");
        }
        if !(-180.0..=180.0).contains(&self.east) || !(-180.0..=180.0).contains(&self.west) {
            anyhow::bail!("longitude must be between -180 and 180 degrees");
        }
        if self.south >= self.north {
            anyhow::bail!("south must be less than north");
        }
        Ok(())
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        if latitude > self.north || latitude < self.south {
            return false;
        }
        if self.west <= self.east {
            longitude >= self.west && longitude <= self.east
        } else {
            // Crosses the antimeridian
            longitude >= self.west || longitude <= self.east
        }
    }

    /// Grow the box so it includes the given point. Never shrinks.
    pub fn expand_to(&mut self, latitude: f64, longitude: f64) {
        if latitude > self.north {
            self.north = latitude;
        }
        if latitude < self.south {
            self.south = latitude;
        }
        if longitude > self.east {
            self.east = longitude;
        }
        if longitude < self.west {
            self.west = longitude;
        }
    }

    pub fn latitude_span(&self) -> f64 {
        self.north - self.south
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // LFNM (Nimes) to LFMT (Montpellier) is roughly 44 km
        let d = haversine_distance(43.7574, 4.4162, 43.5762, 3.9630);
        assert!((40_000.0..50_000.0).contains(&d), "got {d}");
    }

    #[test]
    fn test_haversine_zero() {
        assert_eq!(haversine_distance(45.0, 5.0, 45.0, 5.0), 0.0);
    }

    #[test]
    fn test_angular_difference_wraps() {
        assert_eq!(angular_difference(350.0, 10.0), 20.0);
        assert_eq!(angular_difference(10.0, 350.0), 20.0);
        assert_eq!(angular_difference(0.0, 180.0), 180.0);
    }

    #[test]
    fn test_bounding_box_expand() {
        let mut bbox = BoundingBox::from_point(10.0, 20.0);
        bbox.expand_to(12.0, 19.0);
        bbox.expand_to(9.0, 22.0);
        assert_eq!(bbox.south, 9.0);
        assert_eq!(bbox.north, 12.0);
        assert_eq!(bbox.west, 19.0);
        assert_eq!(bbox.east, 22.0);
    }

    #[test]
    fn test_bounding_box_contains_across_antimeridian() {
        let bbox = BoundingBox::new(10.0, -10.0, -170.0, 170.0);
        assert!(bbox.contains(0.0, 175.0));
        assert!(bbox.contains(0.0, -175.0));
        assert!(!bbox.contains(0.0, 0.0));
    }
}
