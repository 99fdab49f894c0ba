use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::actions::{DataResponse, json_error};
use crate::flights::{Flight, FlightState};
use crate::web::AppState;

/// Flight record plus its state as it must be reported right now
#[derive(Debug, Serialize)]
pub struct FlightView {
    #[serde(flatten)]
    pub flight: Flight,
    pub state: FlightState,
}

/// GET /data/flights/{id}
pub async fn get_flight_by_id(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.flights_repo.get_flight_by_id(id) {
        Some(flight) => {
            // Lazy timeout: a silent flight is never reported active
            let current_state = flight.state_at(
                Utc::now(),
                state.config.tracker.inactivity_timeout(),
            );
            Json(DataResponse {
                data: FlightView {
                    flight,
                    state: current_state,
                },
            })
            .into_response()
        }
        None => json_error(StatusCode::NOT_FOUND, "Flight not found").into_response(),
    }
}
