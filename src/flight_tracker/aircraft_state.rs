use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

use super::aggregates::FlightAggregates;
use crate::aircraft::AircraftKey;
use crate::fixes::Fix;

/// Compact fix data for in-memory state tracking; only the fields flight
/// decisions need
#[derive(Debug, Clone)]
pub struct CompactFix {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub altitude_msl_ft: Option<i32>,
    pub altitude_agl_ft: Option<i32>,
    pub ground_speed_knots: Option<f32>,
    pub track_degrees: Option<f32>,
    pub climb_fpm: Option<i32>,
    /// Pre-computed from speed/altitude by should_be_active()
    pub is_active: bool,
}

impl CompactFix {
    pub fn from_fix(fix: &Fix, is_active: bool) -> Self {
        Self {
            timestamp: fix.timestamp,
            lat: fix.latitude,
            lng: fix.longitude,
            altitude_msl_ft: fix.altitude_msl_ft,
            altitude_agl_ft: fix.altitude_agl_ft,
            ground_speed_knots: fix.ground_speed_knots,
            track_degrees: fix.track_degrees,
            climb_fpm: fix.climb_fpm,
            is_active,
        }
    }
}

/// Link from a glider's state to the flight of the towplane pulling it
#[derive(Debug, Clone)]
pub struct TowState {
    pub towplane_key: AircraftKey,
    pub towplane_flight_id: Uuid,
}

/// Per-aircraft in-memory tracking state.
///
/// The recent history window (10 fixes) is enough for every decision:
/// takeoff detection, the landing debounce, climb rate, tow release.
#[derive(Debug, Clone)]
pub struct AircraftState {
    /// Oldest first
    pub recent_fixes: VecDeque<CompactFix>,
    pub current_flight_id: Option<Uuid>,
    /// Aggregates of the open flight, None while on the ground
    pub aggregates: Option<FlightAggregates>,
    /// Present on a glider's state while under tow
    pub tow: Option<TowState>,
    /// Wall-clock time of the last update, for state cleanup
    pub last_update_time: DateTime<Utc>,
}

const RECENT_FIX_WINDOW: usize = 10;

impl AircraftState {
    pub fn new(fix: &Fix, is_active: bool) -> Self {
        let mut recent_fixes = VecDeque::with_capacity(RECENT_FIX_WINDOW);
        recent_fixes.push_back(CompactFix::from_fix(fix, is_active));
        Self {
            recent_fixes,
            current_flight_id: None,
            aggregates: None,
            tow: None,
            last_update_time: Utc::now(),
        }
    }

    pub fn add_fix(&mut self, fix: &Fix, is_active: bool) {
        self.last_update_time = Utc::now();
        if self.recent_fixes.len() >= RECENT_FIX_WINDOW {
            self.recent_fixes.pop_front();
        }
        self.recent_fixes.push_back(CompactFix::from_fix(fix, is_active));
    }

    pub fn last_fix(&self) -> Option<&CompactFix> {
        self.recent_fixes.back()
    }

    pub fn last_fix_timestamp(&self) -> Option<DateTime<Utc>> {
        self.recent_fixes.back().map(|f| f.timestamp)
    }

    /// True when the last `n` fixes are all inactive
    pub fn last_n_inactive(&self, n: usize) -> bool {
        if self.recent_fixes.len() < n {
            return false;
        }
        self.recent_fixes.iter().rev().take(n).all(|f| !f.is_active)
    }

    /// Climb rate from the first and last fix with altitude data within the
    /// last 60 seconds; None when the data is too sparse or too close
    /// together to be meaningful
    pub fn calculate_climb_rate(&self) -> Option<i32> {
        let most_recent = self.recent_fixes.back()?.timestamp;

        let with_altitude: Vec<&CompactFix> = self
            .recent_fixes
            .iter()
            .filter(|f| {
                let age = most_recent.signed_duration_since(f.timestamp);
                age.num_seconds() <= 60 && f.altitude_msl_ft.is_some()
            })
            .collect();

        if with_altitude.len() < 2 {
            return None;
        }

        let first = with_altitude.first()?;
        let last = with_altitude.last()?;
        let time_delta_seconds = (last.timestamp - first.timestamp).num_seconds();
        if time_delta_seconds < 5 {
            return None;
        }

        let altitude_change_ft = last.altitude_msl_ft? - first.altitude_msl_ft?;
        let climb_rate_fpm = (altitude_change_ft as f64 / time_delta_seconds as f64) * 60.0;
        Some(climb_rate_fpm.round() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft::AddressType;
    use chrono::TimeZone;

    fn test_fix(timestamp: DateTime<Utc>, altitude_msl: Option<i32>) -> Fix {
        Fix {
            id: Uuid::now_v7(),
            address: 0xDDA5BA,
            address_type: AddressType::Flarm,
            aircraft_id: None,
            timestamp,
            received_at: timestamp,
            latitude: 43.7,
            longitude: 5.8,
            altitude_msl_ft: altitude_msl,
            altitude_agl_ft: None,
            ground_speed_knots: Some(60.0),
            track_degrees: None,
            climb_fpm: None,
            raw_hash: None,
            source_metadata: None,
            aircraft_type: None,
            flight_id: None,
        }
    }

    #[test]
    fn test_climb_rate_ascending() {
        // 1000 ft at T+0s, 1600 ft at T+60s: +600 fpm
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut state = AircraftState::new(&test_fix(base, Some(1000)), true);
        state.add_fix(&test_fix(base + chrono::Duration::seconds(60), Some(1600)), true);
        assert_eq!(state.calculate_climb_rate(), Some(600));
    }

    #[test]
    fn test_climb_rate_descending() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut state = AircraftState::new(&test_fix(base, Some(5000)), true);
        state.add_fix(&test_fix(base + chrono::Duration::seconds(60), Some(4000)), true);
        assert_eq!(state.calculate_climb_rate(), Some(-1000));
    }

    #[test]
    fn test_climb_rate_insufficient_data() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut state = AircraftState::new(&test_fix(base, Some(1000)), true);
        state.add_fix(&test_fix(base + chrono::Duration::seconds(60), None), true);
        assert_eq!(state.calculate_climb_rate(), None);
    }

    #[test]
    fn test_climb_rate_time_too_short() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut state = AircraftState::new(&test_fix(base, Some(1000)), true);
        state.add_fix(&test_fix(base + chrono::Duration::seconds(2), Some(1020)), true);
        assert_eq!(state.calculate_climb_rate(), None);
    }

    #[test]
    fn test_recent_window_is_capped() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut state = AircraftState::new(&test_fix(base, None), false);
        for i in 1..20 {
            state.add_fix(&test_fix(base + chrono::Duration::seconds(i), None), false);
        }
        assert_eq!(state.recent_fixes.len(), 10);
    }

    #[test]
    fn test_last_n_inactive() {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut state = AircraftState::new(&test_fix(base, None), true);
        for i in 1..=4 {
            state.add_fix(&test_fix(base + chrono::Duration::seconds(i), None), false);
        }
        assert!(state.last_n_inactive(4));
        assert!(!state.last_n_inactive(5));
    }
}
