use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::Utc;
use futures_util::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, error, info, warn};

use crate::live_feed::{AircraftStatus, ClientAction, ClientMessage, LiveFix, ServerMessage};
use crate::subscriptions::ConnectionId;
use crate::web::AppState;

/// GET /data/live - the live subscription socket
pub async fn live_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (connection_id, mut outbound) = state.router.register();
    let (mut sink, mut stream) = socket.split();

    // Writer: drain the router's channel into the socket. A send failure
    // ends the task; cleanup happens below.
    let write_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize live message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: subscription changes from the client
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_message) => {
                    handle_client_message(&state, connection_id, client_message);
                }
                Err(e) => {
                    warn!("Ignoring malformed subscription message: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                info!("Live connection {} closed by client", connection_id);
                break;
            }
            Ok(_) => {
                // Binary, ping and pong frames are ignored
            }
            Err(e) => {
                debug!("Live connection {} socket error: {}", connection_id, e);
                break;
            }
        }
    }

    state.router.disconnect(connection_id);
    write_task.abort();
}

fn handle_client_message(state: &AppState, connection_id: ConnectionId, message: ClientMessage) {
    match message.action {
        ClientAction::Subscribe => {
            state.router.subscribe(connection_id, message.bounds);
            if !message.bounds.is_empty() {
                send_area_snapshot(state, connection_id, &message);
            }
        }
        ClientAction::Unsubscribe => {
            state.router.unsubscribe(connection_id, message.bounds);
        }
    }
}

/// After a subscribe, tell the client about every aircraft already inside
/// the area, with its recent track
fn send_area_snapshot(state: &AppState, connection_id: ConnectionId, message: &ClientMessage) {
    let now = Utc::now();
    let freshness = chrono::Duration::seconds(state.config.live.freshness_window_secs);
    let current = state
        .fixes_repo
        .aircraft_in_bounding_box(&message.bounds, now - freshness);

    debug!(
        "Sending {} aircraft snapshots to connection {}",
        current.len(),
        connection_id
    );

    for fix in current {
        let flight_state = fix
            .flight_id
            .and_then(|flight_id| state.flights_repo.get_flight_by_id(flight_id))
            .map(|flight| flight.state_at(now, state.config.tracker.inactivity_timeout()));
        let recent_fixes = state
            .fixes_repo
            .recent_fixes(&fix.key(), state.config.live.recent_fixes_limit)
            .iter()
            .map(LiveFix::from)
            .collect();
        let aircraft = AircraftStatus::for_fix(&state.registry, &fix, flight_state);
        state.router.send_to(
            connection_id,
            ServerMessage::AircraftReceived {
                aircraft,
                recent_fixes,
            },
        );
    }
}
