use anyhow::Result;
use dashmap::DashMap;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::FlightEvent;
use super::aggregates::FlightAggregates;
use super::aircraft_state::AircraftState;
use super::towing;
use crate::aircraft::{AircraftKey, AircraftRegistry, AircraftType};
use crate::airports::AirportsRepository;
use crate::config::TrackerConfig;
use crate::fixes::Fix;
use crate::flights::Flight;
use crate::flights_repo::{FlightsRepository, ProgressUpdate};
use crate::geometry::BoundingBox;

/// Everything a state transition needs, borrowed from the tracker
pub(crate) struct TransitionContext<'a> {
    pub flights_repo: &'a FlightsRepository,
    pub airports: &'a AirportsRepository,
    pub registry: &'a AircraftRegistry,
    pub states: &'a DashMap<AircraftKey, AircraftState>,
    pub config: &'a TrackerConfig,
}

/// Determine if the aircraft is airborne based on fix data.
/// Ground speed is checked first, then AGL altitude where available.
pub fn should_be_active(fix: &Fix, config: &TrackerConfig) -> bool {
    // With no altitude data at all we can only infer from speed
    if fix.altitude_agl_ft.is_none() && fix.altitude_msl_ft.is_none() {
        return fix.ground_speed_or_zero() >= config.no_altitude_active_speed_knots;
    }

    if fix
        .ground_speed_knots
        .map(|s| s >= config.active_speed_knots)
        .unwrap_or(false)
    {
        return true;
    }

    // Slow but well above the ground: hovering helicopter, slow glider
    if let Some(altitude_agl) = fix.altitude_agl_ft
        && altitude_agl >= config.landing_agl_ft
    {
        return true;
    }

    false
}

/// Process one fix through the state machine and return it with its
/// flight attribution plus any lifecycle events it triggered.
///
/// Callers hold the per-aircraft lock, so this function owns the aircraft's
/// state for the duration: it is cloned out, mutated, and written back.
pub(crate) fn process_state_transition(
    ctx: &TransitionContext<'_>,
    mut fix: Fix,
) -> Result<(Fix, Vec<FlightEvent>)> {
    let mut events = Vec::new();
    let key = fix.key();

    derive_agl(ctx, &mut fix);
    let is_active = should_be_active(&fix, ctx.config);

    let mut state = ctx.states.get(&key).map(|entry| entry.value().clone());

    let last_timestamp = state.as_ref().and_then(|s| s.last_fix_timestamp());
    let open_flight_id = state.as_ref().and_then(|s| s.current_flight_id);

    // Out-of-order arrival: feed the aggregator of an open flight, but never
    // touch the landing debounce and never reopen a terminal flight
    if let Some(last_timestamp) = last_timestamp
        && fix.timestamp < last_timestamp
    {
        if let Some(flight_id) = open_flight_id {
            fix.flight_id = Some(flight_id);
            let mut updated = state.take().expect("state present");
            if let Some(aggregates) = updated.aggregates.as_mut() {
                aggregates.update(fix.latitude, fix.longitude);
                ctx.flights_repo.update_progress(
                    flight_id,
                    ProgressUpdate {
                        // An old fix must not refresh the flight's recency
                        last_fix_at: last_timestamp,
                        bounding_box: aggregates.bounding_box,
                        total_distance_meters: aggregates.total_distance_meters,
                        maximum_displacement_meters: aggregates.maximum_displacement_meters,
                    },
                );
            }
            ctx.states.insert(key, updated);
        } else {
            trace!("Out-of-order fix for {} with no open flight - stored only", key);
        }
        return Ok((fix, events));
    }

    // Lazy timeout: the aircraft reappeared after a gap longer than the
    // inactivity window, so the old flight is already over
    if let Some(current) = state.as_mut()
        && let Some(flight_id) = current.current_flight_id
        && let Some(last_timestamp) = current.last_fix_timestamp()
        && fix.timestamp - last_timestamp > ctx.config.inactivity_timeout()
    {
        let timed_out_at = last_timestamp + ctx.config.inactivity_timeout();
        info!(
            "Aircraft {} reappeared after {}s gap - timing out flight {}",
            key,
            (fix.timestamp - last_timestamp).num_seconds(),
            flight_id
        );
        if ctx.flights_repo.timeout_flight(flight_id, timed_out_at)?
            && let Some(flight) = ctx.flights_repo.get_flight_by_id(flight_id)
        {
            events.push(FlightEvent::TimedOut(flight));
        }
        current.current_flight_id = None;
        current.aggregates = None;
        current.tow = None;
        current.recent_fixes.clear();
    }

    let current_flight_id = state.as_ref().and_then(|s| s.current_flight_id);

    match (current_flight_id, is_active) {
        // Airborne on an open flight
        (Some(flight_id), true) => {
            let mut updated = state.take().expect("state present");
            updated.add_fix(&fix, true);
            continue_flight(ctx, &mut fix, &mut updated, flight_id, &mut events);
            ctx.states.insert(key, updated);
        }

        // Airborne with no open flight: open one
        (None, true) => {
            let previous_inactive = state
                .as_ref()
                .map(|s| s.last_n_inactive(3))
                .unwrap_or(false);
            let near_ground = fix
                .altitude_agl_ft
                .map(|agl| agl < ctx.config.takeoff_agl_ft)
                .unwrap_or(false);
            let is_takeoff = previous_inactive || near_ground;

            let mut updated = match state.take() {
                Some(mut existing) => {
                    existing.add_fix(&fix, true);
                    existing
                }
                None => AircraftState::new(&fix, true),
            };

            match open_flight(ctx, &mut fix, &mut updated, is_takeoff) {
                Ok(flight) => events.push(FlightEvent::Opened(flight)),
                Err(e) => {
                    // Leave the state without a flight; the next fix retries
                    tracing::error!("Failed to open flight for {}: {}", key, e);
                }
            }
            ctx.states.insert(key, updated);
        }

        // On the ground with no flight: idle, history only
        (None, false) => {
            trace!("Aircraft {} idle on ground", key);
            let updated = match state.take() {
                Some(mut existing) => {
                    existing.add_fix(&fix, false);
                    existing
                }
                None => AircraftState::new(&fix, false),
            };
            ctx.states.insert(key, updated);
        }

        // Open flight but the fix looks inactive: landing debounce
        (Some(flight_id), false) => {
            let mut updated = state.take().expect("state present");

            let still_airborne = fix
                .altitude_agl_ft
                .map(|agl| agl >= ctx.config.landing_agl_ft)
                .unwrap_or(false);
            if still_airborne {
                // Slow but high: not a landing
                updated.add_fix(&fix, true);
                continue_flight(ctx, &mut fix, &mut updated, flight_id, &mut events);
                ctx.states.insert(key, updated);
                return Ok((fix, events));
            }

            updated.add_fix(&fix, false);
            fix.flight_id = Some(flight_id);
            update_aggregates(ctx, &fix, &mut updated, flight_id);

            if updated.last_n_inactive(ctx.config.landing_debounce_fixes) {
                debug!(
                    "Aircraft {} landing after {} consecutive inactive fixes - completing flight {}",
                    key, ctx.config.landing_debounce_fixes, flight_id
                );
                let arrival = ctx.airports.nearest_within(
                    fix.latitude,
                    fix.longitude,
                    ctx.config.airport_radius_m,
                );
                let outlanding = arrival.is_none();
                let arrival_id = arrival.map(|airport| airport.id);

                if ctx
                    .flights_repo
                    .complete_flight(flight_id, fix.timestamp, arrival_id, outlanding)?
                    && let Some(flight) = ctx.flights_repo.get_flight_by_id(flight_id)
                {
                    if outlanding {
                        info!("Flight {} ended in an outlanding at ({:.4}, {:.4})",
                            flight_id, fix.latitude, fix.longitude);
                    }
                    events.push(FlightEvent::Landed(flight));
                }

                updated.current_flight_id = None;
                updated.aggregates = None;
                updated.tow = None;
            }
            ctx.states.insert(key, updated);
        }
    }

    Ok((fix, events))
}

/// Fill in AGL from the ground-elevation estimate where we have one
fn derive_agl(ctx: &TransitionContext<'_>, fix: &mut Fix) {
    if fix.altitude_agl_ft.is_none()
        && let Some(msl) = fix.altitude_msl_ft
        && let Some(ground) = ctx.airports.ground_elevation_ft(fix.latitude, fix.longitude)
    {
        fix.altitude_agl_ft = Some(msl - ground);
    }
}

fn continue_flight(
    ctx: &TransitionContext<'_>,
    fix: &mut Fix,
    state: &mut AircraftState,
    flight_id: Uuid,
    events: &mut Vec<FlightEvent>,
) {
    fix.flight_id = Some(flight_id);
    update_aggregates(ctx, fix, state, flight_id);

    // Glider under tow: check for release
    if let Some(tow) = &state.tow
        && towing::check_tow_release(tow, fix, ctx.states, &ctx.config.towing)
    {
        if let Some(altitude) = fix.altitude_msl_ft {
            ctx.flights_repo
                .record_tow_release(flight_id, altitude, fix.timestamp);
        }
        events.push(FlightEvent::TowReleased {
            flight_id,
            altitude_msl_ft: fix.altitude_msl_ft,
        });
        state.tow = None;
    }
}

fn update_aggregates(
    ctx: &TransitionContext<'_>,
    fix: &Fix,
    state: &mut AircraftState,
    flight_id: Uuid,
) {
    let aggregates = state
        .aggregates
        .get_or_insert_with(|| FlightAggregates::new(fix.latitude, fix.longitude));
    aggregates.update(fix.latitude, fix.longitude);
    ctx.flights_repo.update_progress(
        flight_id,
        ProgressUpdate {
            last_fix_at: fix.timestamp,
            bounding_box: aggregates.bounding_box,
            total_distance_meters: aggregates.total_distance_meters,
            maximum_displacement_meters: aggregates.maximum_displacement_meters,
        },
    );
}

fn open_flight(
    ctx: &TransitionContext<'_>,
    fix: &mut Fix,
    state: &mut AircraftState,
    is_takeoff: bool,
) -> Result<Flight> {
    let key = fix.key();
    let aircraft = ctx.registry.lookup(&key);

    let departure_airport_id = if is_takeoff {
        ctx.airports
            .nearest_within(fix.latitude, fix.longitude, ctx.config.airport_radius_m)
            .map(|airport| airport.id)
    } else {
        None
    };

    let mut flight = Flight {
        id: Uuid::now_v7(),
        address: fix.address,
        address_type: fix.address_type,
        aircraft_id: aircraft.as_ref().map(|a| a.id),
        takeoff_time: is_takeoff.then_some(fix.timestamp),
        landing_time: None,
        timed_out_at: None,
        departure_airport_id,
        arrival_airport_id: None,
        outlanding: false,
        towed_by_aircraft_id: None,
        towed_by_flight_id: None,
        tow_release_altitude_msl_ft: None,
        tow_release_time: None,
        bounding_box: BoundingBox::from_point(fix.latitude, fix.longitude),
        total_distance_meters: 0.0,
        maximum_displacement_meters: 0.0,
        club_id: aircraft.as_ref().and_then(|a| a.club_id),
        first_fix_at: fix.timestamp,
        last_fix_at: fix.timestamp,
    };

    if is_takeoff {
        debug!(
            "Aircraft {} taking off - creating flight {} (departure airport {:?})",
            key, flight.id, departure_airport_id
        );
    } else {
        debug!(
            "Aircraft {} appearing in-flight - creating flight {} without airport lookup \
             (speed {:?} kt, altitude {:?} ft)",
            key, flight.id, fix.ground_speed_knots, fix.altitude_msl_ft
        );
    }

    // A glider leaving the ground next to a climbing towplane is on tow
    let is_glider = aircraft
        .as_ref()
        .map(|a| a.aircraft_type == AircraftType::Glider)
        .unwrap_or(fix.aircraft_type == Some(AircraftType::Glider));
    if is_takeoff
        && is_glider
        && let Some(tow) =
            towing::detect_towing_at_takeoff(ctx.states, ctx.registry, &key, fix, &ctx.config.towing)
    {
        flight.towed_by_flight_id = Some(tow.towplane_flight_id);
        flight.towed_by_aircraft_id = ctx
            .registry
            .lookup(&tow.towplane_key)
            .map(|towplane| towplane.id);
        state.tow = Some(tow);
    }

    ctx.flights_repo.create_flight(flight.clone())?;
    fix.flight_id = Some(flight.id);
    state.current_flight_id = Some(flight.id);
    state.aggregates = Some(FlightAggregates::new(fix.latitude, fix.longitude));

    if is_takeoff {
        metrics::counter!("flight_tracker.flight_created.takeoff").increment(1);
    } else {
        metrics::counter!("flight_tracker.flight_created.airborne").increment(1);
    }

    Ok(flight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft::AddressType;
    use chrono::Utc;

    fn fix_with(speed: Option<f32>, msl: Option<i32>, agl: Option<i32>) -> Fix {
        let now = Utc::now();
        Fix {
            id: Uuid::now_v7(),
            address: 0xDDA5BA,
            address_type: AddressType::Flarm,
            aircraft_id: None,
            timestamp: now,
            received_at: now,
            latitude: 43.7,
            longitude: 5.8,
            altitude_msl_ft: msl,
            altitude_agl_ft: agl,
            ground_speed_knots: speed,
            track_degrees: None,
            climb_fpm: None,
            raw_hash: None,
            source_metadata: None,
            aircraft_type: None,
            flight_id: None,
        }
    }

    #[test]
    fn test_should_be_active_speed_threshold() {
        let config = TrackerConfig::default();
        assert!(should_be_active(&fix_with(Some(30.0), Some(1000), Some(50)), &config));
        assert!(!should_be_active(&fix_with(Some(5.0), Some(1000), Some(50)), &config));
    }

    #[test]
    fn test_should_be_active_slow_but_high() {
        let config = TrackerConfig::default();
        // Hovering helicopter: 5 kt at 400 ft AGL is still airborne
        assert!(should_be_active(&fix_with(Some(5.0), Some(2000), Some(400)), &config));
        assert!(!should_be_active(&fix_with(Some(5.0), Some(2000), Some(100)), &config));
    }

    #[test]
    fn test_should_be_active_without_altitude() {
        let config = TrackerConfig::default();
        assert!(!should_be_active(&fix_with(Some(60.0), None, None), &config));
        assert!(should_be_active(&fix_with(Some(90.0), None, None), &config));
        assert!(!should_be_active(&fix_with(None, None, None), &config));
    }
}
