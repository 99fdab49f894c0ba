//! Point-in-time "aircraft in this rectangle" queries, degrading to spatial
//! clusters when the viewport holds more aircraft than the caller can show.
//!
//! Clients in clustered mode poll this query periodically instead of
//! following the per-event push path; the `clustered` flag in the response
//! is their signal to switch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::aircraft::AircraftRegistry;
use crate::fixes::Fix;
use crate::fixes_repo::FixesRepository;
use crate::flights::FlightState;
use crate::flights_repo::FlightsRepository;
use crate::geometry::BoundingBox;
use crate::live_feed::{AircraftStatus, LiveFix};

/// Grid sizes tried from coarsest to finest, degrees
const GRID_SIZE_LADDER: &[f64] = &[10.0, 5.0, 2.0, 1.0, 0.5, 0.25, 0.1];
/// Aim for at least this many grid rows across the viewport, so zooming
/// into a cluster's bounds reliably de-clusters it
const MIN_GRID_DIVISIONS: f64 = 6.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub id: String,
    /// Centroid of the member positions
    pub latitude: f64,
    pub longitude: f64,
    pub count: usize,
    /// Grid-aligned rectangle a client can zoom into to de-cluster
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchItem {
    Aircraft {
        aircraft: AircraftStatus,
        fix: LiveFix,
    },
    Cluster {
        cluster: ClusterView,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,
    pub total: usize,
    pub clustered: bool,
}

#[derive(Clone)]
pub struct ViewportService {
    fixes_repo: FixesRepository,
    flights_repo: FlightsRepository,
    registry: AircraftRegistry,
    inactivity_timeout: Duration,
    freshness_window: Duration,
}

impl ViewportService {
    pub fn new(
        fixes_repo: FixesRepository,
        flights_repo: FlightsRepository,
        registry: AircraftRegistry,
        inactivity_timeout: Duration,
        freshness_window: Duration,
    ) -> Self {
        Self {
            fixes_repo,
            flights_repo,
            registry,
            inactivity_timeout,
            freshness_window,
        }
    }

    /// Aircraft in the rectangle with a latest fix newer than `after`
    /// (default: the freshness window), individually up to `limit`, as
    /// clusters beyond it.
    pub fn search(
        &self,
        bounds: &BoundingBox,
        after: Option<DateTime<Utc>>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> SearchResponse {
        let after = after.unwrap_or(now - self.freshness_window);
        let found = self.fixes_repo.aircraft_in_bounding_box(bounds, after);
        let total = found.len();

        if total > limit {
            let items = self.cluster(bounds, &found);
            metrics::counter!("viewport.search.clustered").increment(1);
            SearchResponse {
                items,
                total,
                clustered: true,
            }
        } else {
            let items = found
                .iter()
                .map(|fix| SearchItem::Aircraft {
                    aircraft: AircraftStatus::for_fix(
                        &self.registry,
                        fix,
                        self.flight_state_for(fix, now),
                    ),
                    fix: LiveFix::from(fix),
                })
                .collect();
            metrics::counter!("viewport.search.individual").increment(1);
            SearchResponse {
                items,
                total,
                clustered: false,
            }
        }
    }

    /// The flight state as it must be reported now: lazily timed out when
    /// the inactivity window has elapsed, even if the sweeper has not run
    fn flight_state_for(&self, fix: &Fix, now: DateTime<Utc>) -> Option<FlightState> {
        let flight = self.flights_repo.get_flight_by_id(fix.flight_id?)?;
        Some(flight.state_at(now, self.inactivity_timeout))
    }

    fn cluster(&self, bounds: &BoundingBox, fixes: &[Fix]) -> Vec<SearchItem> {
        let grid_size = grid_size_for_span(bounds.latitude_span());

        // Every aircraft lands in exactly one bucket, so cluster counts sum
        // to the total found
        let mut buckets: HashMap<(i64, i64), Vec<&Fix>> = HashMap::new();
        for fix in fixes {
            let key = (
                (fix.latitude / grid_size).floor() as i64,
                (fix.longitude / grid_size).floor() as i64,
            );
            buckets.entry(key).or_default().push(fix);
        }

        let mut items: Vec<SearchItem> = buckets
            .into_iter()
            .map(|((lat_bucket, lon_bucket), members)| {
                let count = members.len();
                let centroid_lat =
                    members.iter().map(|f| f.latitude).sum::<f64>() / count as f64;
                let centroid_lon =
                    members.iter().map(|f| f.longitude).sum::<f64>() / count as f64;

                let south = lat_bucket as f64 * grid_size;
                let west = lon_bucket as f64 * grid_size;
                SearchItem::Cluster {
                    cluster: ClusterView {
                        id: format!("cluster_{lat_bucket}_{lon_bucket}"),
                        latitude: centroid_lat,
                        longitude: centroid_lon,
                        count,
                        bounds: BoundingBox::new(south + grid_size, south, west + grid_size, west),
                    },
                }
            })
            .collect();

        // Stable order for clients: biggest clusters first
        items.sort_by(|a, b| {
            let count = |item: &SearchItem| match item {
                SearchItem::Cluster { cluster } => cluster.count,
                SearchItem::Aircraft { .. } => 0,
            };
            count(b).cmp(&count(a))
        });
        items
    }
}

/// Largest grid size that still divides the viewport into a useful number
/// of rows
fn grid_size_for_span(latitude_span: f64) -> f64 {
    for &size in GRID_SIZE_LADDER {
        if latitude_span / size >= MIN_GRID_DIVISIONS {
            return size;
        }
    }
    *GRID_SIZE_LADDER.last().expect("ladder is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft::AddressType;
    use crate::fixes::{RawReport, ReportFormat};
    use uuid::Uuid;

    fn service_with_fixes(positions: &[(f64, f64)]) -> (ViewportService, DateTime<Utc>) {
        let fixes_repo = FixesRepository::new(None);
        let now = Utc::now();
        for (i, (lat, lon)) in positions.iter().enumerate() {
            let payload = format!("report-{i}");
            let report = RawReport::new(payload.into_bytes(), ReportFormat::Ogn, now);
            let fix = Fix {
                id: Uuid::now_v7(),
                address: 0x100000 + i as u32,
                address_type: AddressType::Flarm,
                aircraft_id: None,
                timestamp: now,
                received_at: now,
                latitude: *lat,
                longitude: *lon,
                altitude_msl_ft: Some(3000),
                altitude_agl_ft: None,
                ground_speed_knots: Some(60.0),
                track_degrees: None,
                climb_fpm: None,
                raw_hash: Some(report.content_hash()),
                source_metadata: None,
                aircraft_type: None,
                flight_id: None,
            };
            fixes_repo.insert(&fix).unwrap();
        }
        let service = ViewportService::new(
            fixes_repo,
            FlightsRepository::new(),
            AircraftRegistry::new(),
            Duration::minutes(5),
            Duration::minutes(15),
        );
        (service, now)
    }

    #[test]
    fn test_individual_aircraft_within_limit() {
        let (service, now) = service_with_fixes(&[(45.1, 5.1), (45.2, 5.2), (45.3, 5.3)]);
        let bounds = BoundingBox::new(46.0, 44.0, 6.0, 4.0);
        let response = service.search(&bounds, None, 50, now);

        assert!(!response.clustered);
        assert_eq!(response.total, 3);
        assert_eq!(response.items.len(), 3);
        assert!(response
            .items
            .iter()
            .all(|item| matches!(item, SearchItem::Aircraft { .. })));
    }

    #[test]
    fn test_clusters_conserve_aircraft_count() {
        // 30 aircraft spread across two far-apart groups
        let mut positions = Vec::new();
        for i in 0..18 {
            positions.push((45.0 + (i as f64) * 0.01, 5.0 + (i as f64) * 0.01));
        }
        for i in 0..12 {
            positions.push((52.0 + (i as f64) * 0.01, 13.0 + (i as f64) * 0.01));
        }
        let (service, now) = service_with_fixes(&positions);

        let bounds = BoundingBox::new(60.0, 40.0, 20.0, 0.0);
        let response = service.search(&bounds, None, 10, now);

        assert!(response.clustered);
        assert_eq!(response.total, 30);
        let summed: usize = response
            .items
            .iter()
            .map(|item| match item {
                SearchItem::Cluster { cluster } => cluster.count,
                SearchItem::Aircraft { .. } => panic!("expected only clusters"),
            })
            .sum();
        assert_eq!(summed, response.total);
    }

    #[test]
    fn test_cluster_bounds_contain_centroid() {
        let positions: Vec<(f64, f64)> = (0..20)
            .map(|i| (45.0 + (i as f64) * 0.01, 5.0 + (i as f64) * 0.01))
            .collect();
        let (service, now) = service_with_fixes(&positions);

        let bounds = BoundingBox::new(60.0, 40.0, 20.0, 0.0);
        let response = service.search(&bounds, None, 5, now);

        for item in &response.items {
            if let SearchItem::Cluster { cluster } = item {
                assert!(cluster.bounds.contains(cluster.latitude, cluster.longitude));
            }
        }
    }

    #[test]
    fn test_after_filter_excludes_stale_aircraft() {
        let (service, now) = service_with_fixes(&[(45.1, 5.1)]);
        let bounds = BoundingBox::new(46.0, 44.0, 6.0, 4.0);

        let response = service.search(&bounds, Some(now + Duration::seconds(1)), 50, now);
        assert_eq!(response.total, 0);
    }

    #[test]
    fn test_grid_size_ladder() {
        assert_eq!(grid_size_for_span(180.0), 10.0);
        assert_eq!(grid_size_for_span(20.0), 2.0);
        assert_eq!(grid_size_for_span(1.0), 0.1);
    }
}
