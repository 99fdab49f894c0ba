//! Whole-degree grid cells shared by the subscription router and its tests.
//!
//! A cell is identified by the floor of its south-west corner, so the cell
//! containing (48.3, 5.7) is `CellId { lat: 48, lon: 5 }` and the cell
//! containing (-0.5, -0.5) is `CellId { lat: -1, lon: -1 }`.

use crate::geometry::BoundingBox;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId {
    pub lat: i16,
    pub lon: i16,
}

impl CellId {
    /// The cell containing the given position
    pub fn containing(latitude: f64, longitude: f64) -> Self {
        Self {
            lat: latitude.floor().clamp(-90.0, 89.0) as i16,
            lon: normalize_longitude(longitude).floor().clamp(-180.0, 179.0) as i16,
        }
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell.{}.{}", self.lat, self.lon)
    }
}

fn normalize_longitude(longitude: f64) -> f64 {
    let mut lon = longitude;
    while lon >= 180.0 {
        lon -= 360.0;
    }
    while lon < -180.0 {
        lon += 360.0;
    }
    lon
}

/// Enumerate every whole-degree cell overlapped by the rectangle.
///
/// Rectangles with `west > east` cross the antimeridian and are split into
/// an eastern and a western half before enumeration.
pub fn cells_covering(bounds: &BoundingBox) -> Vec<CellId> {
    if bounds.is_empty() {
        return Vec::new();
    }

    let mut cells = Vec::new();
    let lat_min = bounds.south.floor().clamp(-90.0, 89.0) as i16;
    let lat_max = bounds.north.floor().clamp(-90.0, 89.0) as i16;

    let spans: &[(f64, f64)] = if bounds.west <= bounds.east {
        &[(bounds.west, bounds.east)]
    } else {
        &[(bounds.west, 180.0), (-180.0, bounds.east)]
    };

    for &(west, east) in spans {
        let lon_min = west.floor().clamp(-180.0, 179.0) as i16;
        // A span ending exactly on a cell boundary does not enter the next cell
        let east_floor = if east == 180.0 { 179.0 } else { east.floor() };
        let lon_max = east_floor.clamp(-180.0, 179.0) as i16;
        for lat in lat_min..=lat_max {
            for lon in lon_min..=lon_max {
                cells.push(CellId { lat, lon });
            }
        }
    }

    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_containing() {
        assert_eq!(CellId::containing(48.3, 5.7), CellId { lat: 48, lon: 5 });
        assert_eq!(CellId::containing(-0.5, -0.5), CellId { lat: -1, lon: -1 });
        assert_eq!(CellId::containing(10.0, 20.0), CellId { lat: 10, lon: 20 });
    }

    #[test]
    fn test_cells_covering_single_cell() {
        let bounds = BoundingBox::new(10.5, 10.2, 20.9, 20.1);
        assert_eq!(cells_covering(&bounds), vec![CellId { lat: 10, lon: 20 }]);
    }

    #[test]
    fn test_cells_covering_multiple() {
        let bounds = BoundingBox::new(11.5, 10.5, 21.5, 19.5);
        let cells = cells_covering(&bounds);
        assert_eq!(cells.len(), 6); // 2 lat rows x 3 lon columns
        assert!(cells.contains(&CellId { lat: 10, lon: 19 }));
        assert!(cells.contains(&CellId { lat: 11, lon: 21 }));
    }

    #[test]
    fn test_cells_covering_antimeridian() {
        let bounds = BoundingBox::new(1.0, 0.5, -179.5, 179.5);
        let cells = cells_covering(&bounds);
        assert!(cells.contains(&CellId { lat: 0, lon: 179 }));
        assert!(cells.contains(&CellId { lat: 0, lon: -180 }));
        assert!(!cells.contains(&CellId { lat: 0, lon: 0 }));
    }

    #[test]
    fn test_cells_covering_empty_rect() {
        let bounds = BoundingBox::new(0.0, 0.0, 0.0, 0.0);
        assert!(cells_covering(&bounds).is_empty());
    }
}
