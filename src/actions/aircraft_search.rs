use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::instrument;

use crate::actions::json_error;
use crate::geometry::BoundingBox;
use crate::web::AppState;

#[derive(Debug, Deserialize)]
pub struct AircraftSearchQuery {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    /// Only aircraft with a fix after this instant (ISO 8601)
    pub after: Option<DateTime<Utc>>,
    /// Individual aircraft are returned up to this count
    pub limit: Option<usize>,
}

/// GET /data/aircraft/search
///
/// Bounding-box pull query: an aircraft list when the viewport is sparse
/// enough, clusters plus a total count otherwise.
#[instrument(skip(state))]
pub async fn search_aircraft(
    Query(query): Query<AircraftSearchQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let bounds = BoundingBox::new(query.north, query.south, query.east, query.west);
    if let Err(e) = bounds.validate() {
        return json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response();
    }

    let limit = query
        .limit
        .unwrap_or(state.config.web.cluster_threshold)
        .min(1000);

    let response = state
        .viewport
        .search(&bounds, query.after, limit, Utc::now());
    Json(response).into_response()
}
