use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::actions;
use crate::aircraft::AircraftRegistry;
use crate::clustering::ViewportService;
use crate::config::AloftConfig;
use crate::fixes_repo::FixesRepository;
use crate::flights_repo::FlightsRepository;
use crate::subscriptions::SubscriptionRouter;

/// Shared state for the serving layer. Everything here is cheap to clone;
/// the live router in particular is an explicit object owned by the
/// composition root, never a global.
#[derive(Clone)]
pub struct AppState {
    pub registry: AircraftRegistry,
    pub fixes_repo: FixesRepository,
    pub flights_repo: FlightsRepository,
    pub router: Arc<SubscriptionRouter>,
    pub viewport: ViewportService,
    pub config: Arc<AloftConfig>,
}

// Request logging with a short correlation id
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);
    let response = next.run(request).await;
    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );
    response
}

pub fn build_router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/aircraft/search", get(actions::search_aircraft))
        .route("/flights/{id}", get(actions::get_flight_by_id))
        .route("/live", get(actions::live_websocket))
        .route("/status", get(actions::get_status))
        .with_state(state);

    Router::new()
        .nest("/data", api_router)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(interface: String, port: u16, state: AppState) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);
    axum::serve(listener, app).await?;
    Ok(())
}
