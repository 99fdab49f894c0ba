use dashmap::DashMap;
use tracing::{debug, info};

use super::aircraft_state::{AircraftState, TowState};
use crate::aircraft::{AircraftKey, AircraftRegistry, AircraftType};
use crate::config::TowingConfig;
use crate::fixes::Fix;
use crate::geometry::{angular_difference, haversine_distance};

const FEET_PER_METER: f64 = 3.28084;

/// Could this aircraft plausibly be pulling a glider?
fn is_likely_towplane(aircraft_type: AircraftType, is_tow_plane: bool) -> bool {
    if is_tow_plane {
        return true;
    }
    match aircraft_type {
        AircraftType::TowTug => true,
        AircraftType::RecipEngine => true,
        AircraftType::JetTurboprop => false,
        AircraftType::Glider => false,
        _ => true,
    }
}

/// Look for a towplane departing together with a glider.
///
/// Scans the in-memory states for an aircraft with an open flight whose
/// latest fix is fresh, close and at a similar altitude. Returns the link to
/// record on the glider's flight.
pub(crate) fn detect_towing_at_takeoff(
    states: &DashMap<AircraftKey, AircraftState>,
    registry: &AircraftRegistry,
    glider_key: &AircraftKey,
    glider_fix: &Fix,
    config: &TowingConfig,
) -> Option<TowState> {
    let Some(glider_alt) = glider_fix.altitude_msl_ft else {
        return None;
    };

    for entry in states.iter() {
        let candidate_key = *entry.key();
        if candidate_key == *glider_key {
            continue;
        }
        let state = entry.value();
        let Some(flight_id) = state.current_flight_id else {
            continue;
        };
        let Some(last) = state.last_fix() else {
            continue;
        };

        // Candidate must have reported within the capture window
        let age = glider_fix
            .timestamp
            .signed_duration_since(last.timestamp)
            .num_seconds();
        if age.abs() > config.capture_window_secs {
            continue;
        }

        // Only aircraft from the registry can be linked as tugs
        let Some(aircraft) = registry.lookup(&candidate_key) else {
            continue;
        };
        if !is_likely_towplane(aircraft.aircraft_type, aircraft.is_tow_plane) {
            continue;
        }

        let distance_m = haversine_distance(
            glider_fix.latitude,
            glider_fix.longitude,
            last.lat,
            last.lng,
        );
        if distance_m > config.capture_radius_m {
            continue;
        }

        let Some(towplane_alt) = last.altitude_msl_ft else {
            continue;
        };
        if (glider_alt - towplane_alt).abs() > config.capture_altitude_diff_ft {
            continue;
        }

        info!(
            "Detected towing: glider {} behind towplane {} (distance {:.0}m, alt diff {}ft)",
            glider_key,
            candidate_key,
            distance_m,
            (glider_alt - towplane_alt).abs()
        );
        return Some(TowState {
            towplane_key: candidate_key,
            towplane_flight_id: flight_id,
        });
    }

    None
}

/// Has the glider separated from its towplane?
pub(crate) fn check_tow_release(
    tow: &TowState,
    glider_fix: &Fix,
    states: &DashMap<AircraftKey, AircraftState>,
    config: &TowingConfig,
) -> bool {
    let towplane_last = states
        .get(&tow.towplane_key)
        .and_then(|state| state.last_fix().cloned());

    let Some(towplane_fix) = towplane_last else {
        // Towplane state vanished entirely; treat as released
        info!(
            "Lost towplane {} state for glider {} - assuming release",
            tow.towplane_key,
            glider_fix.key()
        );
        return true;
    };

    // A silent towplane has probably landed or dropped off the receiver
    let silence = glider_fix
        .timestamp
        .signed_duration_since(towplane_fix.timestamp)
        .num_seconds();
    if silence > config.towplane_silence_secs {
        info!(
            "Towplane {} silent for {}s - assuming release for glider {}",
            tow.towplane_key,
            silence,
            glider_fix.key()
        );
        return true;
    }

    let distance_m = haversine_distance(
        glider_fix.latitude,
        glider_fix.longitude,
        towplane_fix.lat,
        towplane_fix.lng,
    );

    // 3-D separation when both altitudes are known, horizontal otherwise
    let separation_ft = if let (Some(glider_alt), Some(towplane_alt)) =
        (glider_fix.altitude_msl_ft, towplane_fix.altitude_msl_ft)
    {
        let horizontal_ft = distance_m * FEET_PER_METER;
        let vertical_ft = (glider_alt - towplane_alt).abs() as f64;
        (horizontal_ft.powi(2) + vertical_ft.powi(2)).sqrt()
    } else {
        distance_m * FEET_PER_METER
    };

    if separation_ft > config.release_separation_ft {
        info!(
            "Tow release: glider {} separated {:.0}ft from towplane {}",
            glider_fix.key(),
            separation_ft,
            tow.towplane_key
        );
        return true;
    }

    if let (Some(glider_track), Some(towplane_track)) =
        (glider_fix.track_degrees, towplane_fix.track_degrees)
    {
        let heading_diff = angular_difference(glider_track as f64, towplane_track as f64);
        if heading_diff > config.release_heading_diff_deg
            && distance_m > config.release_min_distance_m
        {
            info!(
                "Tow release: glider {} diverged {:.0} degrees from towplane {} at {:.0}m",
                glider_fix.key(),
                heading_diff,
                tow.towplane_key,
                distance_m
            );
            return true;
        }
    }

    debug!(
        "Glider {} still on tow behind {} ({:.0}ft separation)",
        glider_fix.key(),
        tow.towplane_key,
        separation_ft
    );
    false
}
