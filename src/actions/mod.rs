pub mod aircraft_search;
pub mod flights;
pub mod live;
pub mod status;

pub use aircraft_search::search_aircraft;
pub use flights::get_flight_by_id;
pub use live::live_websocket;
pub use status::get_status;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

/// Standard `{"data": ...}` envelope
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// JSON error response with the given status
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}
