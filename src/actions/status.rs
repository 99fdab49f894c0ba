use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::Serialize;

use crate::actions::DataResponse;
use crate::web::AppState;

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub fixes_stored: usize,
    pub flights_total: usize,
    pub flights_active: usize,
    pub live_connections: usize,
}

/// GET /data/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(DataResponse {
        data: StatusView {
            fixes_stored: state.fixes_repo.total_fixes(),
            flights_total: state.flights_repo.total_flights(),
            flights_active: state.flights_repo.active_count(),
            live_connections: state.router.connection_count(),
        },
    })
}
