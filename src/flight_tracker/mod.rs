//! Flight lifecycle derivation from the per-aircraft fix stream.
//!
//! Processing for one aircraft is serialized by a per-aircraft mutex held
//! from the duplicate check through the store insert; distinct aircraft
//! proceed in parallel on the shared maps.

mod aggregates;
mod aircraft_state;
mod state_transitions;
mod towing;

pub use aggregates::FlightAggregates;
pub use aircraft_state::{AircraftState, CompactFix};
pub use state_transitions::should_be_active;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::aircraft::{AircraftKey, AircraftRegistry};
use crate::airports::AirportsRepository;
use crate::config::TrackerConfig;
use crate::fixes::Fix;
use crate::fixes_repo::{FixesRepository, InsertOutcome};
use crate::flights::{Flight, FlightState};
use crate::flights_repo::FlightsRepository;

use state_transitions::TransitionContext;

/// Aircraft states are dropped after this long without a fix
const STATE_RETENTION_HOURS: i64 = 18;

/// A lifecycle transition produced while processing a fix, for fan-out
#[derive(Debug, Clone)]
pub enum FlightEvent {
    Opened(Flight),
    Landed(Flight),
    TimedOut(Flight),
    TowReleased {
        flight_id: Uuid,
        altitude_msl_ft: Option<i32>,
    },
}

impl FlightEvent {
    pub fn flight(&self) -> Option<&Flight> {
        match self {
            FlightEvent::Opened(flight)
            | FlightEvent::Landed(flight)
            | FlightEvent::TimedOut(flight) => Some(flight),
            FlightEvent::TowReleased { .. } => None,
        }
    }
}

/// Result of pushing one fix through the tracker
#[derive(Debug)]
pub enum ProcessOutcome {
    Stored { fix: Fix, events: Vec<FlightEvent> },
    /// The same physical report was already processed; nothing new stored
    Duplicate { fix_id: Uuid },
}

pub struct FlightTracker {
    flights_repo: FlightsRepository,
    fixes_repo: FixesRepository,
    airports: AirportsRepository,
    registry: AircraftRegistry,
    config: TrackerConfig,
    states: Arc<DashMap<AircraftKey, AircraftState>>,
    locks: Arc<DashMap<AircraftKey, Arc<Mutex<()>>>>,
}

impl Clone for FlightTracker {
    fn clone(&self) -> Self {
        Self {
            flights_repo: self.flights_repo.clone(),
            fixes_repo: self.fixes_repo.clone(),
            airports: self.airports.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            states: Arc::clone(&self.states),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl FlightTracker {
    pub fn new(
        flights_repo: FlightsRepository,
        fixes_repo: FixesRepository,
        airports: AirportsRepository,
        registry: AircraftRegistry,
        config: TrackerConfig,
    ) -> Self {
        Self {
            flights_repo,
            fixes_repo,
            airports,
            registry,
            config,
            states: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
        }
    }

    fn context(&self) -> TransitionContext<'_> {
        TransitionContext {
            flights_repo: &self.flights_repo,
            airports: &self.airports,
            registry: &self.registry,
            states: &self.states,
            config: &self.config,
        }
    }

    fn lock_for(&self, key: AircraftKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process a fix and insert it into the store, holding the per-aircraft
    /// lock through the whole sequence so transitions never race.
    pub async fn process_and_insert_fix(&self, fix: Fix) -> anyhow::Result<ProcessOutcome> {
        let key = fix.key();
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        // Redelivery short-circuit: the same physical report resolves to the
        // fix it already produced, before any state is touched
        if let Some(existing) = self.fixes_repo.find_duplicate(&fix) {
            trace!("Raw report redelivery for {} resolved to fix {}", key, existing);
            return Ok(ProcessOutcome::Duplicate { fix_id: existing });
        }

        let start = std::time::Instant::now();
        let (fix, events) = state_transitions::process_state_transition(&self.context(), fix)?;
        metrics::histogram!("flight_tracker.state_transition_ms")
            .record(start.elapsed().as_micros() as f64 / 1000.0);

        match self.fixes_repo.insert(&fix)? {
            InsertOutcome::Inserted(_) => {
                metrics::counter!("flight_tracker.fixes_processed_total").increment(1);
                Ok(ProcessOutcome::Stored { fix, events })
            }
            InsertOutcome::Duplicate(fix_id) => Ok(ProcessOutcome::Duplicate { fix_id }),
        }
    }

    /// Time out active flights that have not seen a fix for the inactivity
    /// window, as of `now`. Returns the events for fan-out.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Vec<FlightEvent> {
        let cutoff = now - self.config.inactivity_timeout();
        let mut events = Vec::new();

        for stale in self.flights_repo.stale_active_flights(cutoff) {
            let key = stale.key();
            let lock = self.lock_for(key);
            let _guard = lock.lock().await;

            // Re-check under the lock: a fix may have just arrived
            let Some(flight) = self.flights_repo.get_flight_by_id(stale.id) else {
                continue;
            };
            if flight.state() != FlightState::Active || flight.last_fix_at >= cutoff {
                continue;
            }

            let timed_out_at = flight.last_fix_at + self.config.inactivity_timeout();
            match self.flights_repo.timeout_flight(flight.id, timed_out_at) {
                Ok(true) => {
                    info!(
                        "Timed out flight {} for {} (last fix {})",
                        flight.id, key, flight.last_fix_at
                    );
                    if let Some(mut state) = self.states.get_mut(&key)
                        && state.current_flight_id == Some(flight.id)
                    {
                        state.current_flight_id = None;
                        state.aggregates = None;
                        state.tow = None;
                    }
                    metrics::counter!("flight_tracker.timeouts_detected_total").increment(1);
                    if let Some(flight) = self.flights_repo.get_flight_by_id(flight.id) {
                        events.push(FlightEvent::TimedOut(flight));
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to timeout flight {} for {}: {}", flight.id, key, e);
                }
            }
        }

        metrics::gauge!("flight_tracker.active_flights").set(self.flights_repo.active_count() as f64);
        events
    }

    /// Drop aircraft state (and its lock) after a long silence
    pub fn cleanup_stale_states(&self, now: DateTime<Utc>) {
        let retention = chrono::Duration::hours(STATE_RETENTION_HOURS);
        let mut removed = 0usize;
        self.states.retain(|key, state| {
            let stale = now.signed_duration_since(state.last_update_time) > retention;
            if stale {
                debug!("Removing stale aircraft state for {}", key);
                removed += 1;
            }
            !stale
        });
        if removed > 0 {
            info!("Cleaned up {} stale aircraft states", removed);
            metrics::counter!("flight_tracker.state_cleanup.removed_total")
                .increment(removed as u64);
            // Locks for forgotten aircraft go too
            self.locks
                .retain(|key, _| self.states.contains_key(key));
        }
    }

    pub fn tracked_aircraft(&self) -> usize {
        self.states.len()
    }
}
