//! Fan-out of live events to area-subscribed connections.
//!
//! Dispatch is cell-indexed: an event resolves to its whole-degree cell and
//! only the connections subscribed to that cell are considered, so cost
//! scales with the subscribers of one cell rather than with every open
//! connection. The exact requested rectangle is kept per connection as a
//! precision filter on top of the coarse cells.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::geo_cells::{CellId, cells_covering};
use crate::geometry::BoundingBox;
use crate::live_feed::ServerMessage;

pub type ConnectionId = Uuid;

#[derive(Default)]
struct RouterIndex {
    /// cell -> connections subscribed to it
    cells: HashMap<CellId, HashSet<ConnectionId>>,
    /// connection -> its current interest
    connections: HashMap<ConnectionId, Interest>,
}

struct Interest {
    cells: Vec<CellId>,
    /// Exact rectangle when the client subscribed with one; None after a
    /// partial unsubscribe left only bare cells
    bounds: Option<BoundingBox>,
}

impl RouterIndex {
    fn remove_connection_cells(&mut self, connection_id: &ConnectionId) {
        if let Some(interest) = self.connections.remove(connection_id) {
            for cell in interest.cells {
                if let Some(subscribers) = self.cells.get_mut(&cell) {
                    subscribers.remove(connection_id);
                    if subscribers.is_empty() {
                        self.cells.remove(&cell);
                    }
                }
            }
        }
    }
}

/// Routes fix and flight events to live connections by area of interest.
///
/// Constructed once by the composition root and handed to whoever needs it;
/// there is deliberately no global instance.
pub struct SubscriptionRouter {
    index: RwLock<RouterIndex>,
    senders: DashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    channel_capacity: usize,
}

impl SubscriptionRouter {
    pub fn new(channel_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            index: RwLock::new(RouterIndex::default()),
            senders: DashMap::new(),
            channel_capacity,
        })
    }

    /// Register a new live connection. The caller owns the receiving half;
    /// the first message on it is always `connection_opened`.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.channel_capacity);
        // Freshly created channel with capacity >= 1 cannot be full
        let _ = sender.try_send(ServerMessage::ConnectionOpened);
        self.senders.insert(connection_id, sender);
        metrics::gauge!("live.connections").set(self.senders.len() as f64);
        info!("Live connection {} opened", connection_id);
        (connection_id, receiver)
    }

    /// Replace the connection's area of interest. The swap is atomic: there
    /// is no window where both the old and new areas, or neither, match.
    pub fn subscribe(&self, connection_id: ConnectionId, bounds: BoundingBox) {
        if bounds.is_empty() {
            self.clear_interest(connection_id);
            return;
        }

        let cells = cells_covering(&bounds);
        let mut index = self.index.write().expect("router index poisoned");
        index.remove_connection_cells(&connection_id);
        for cell in &cells {
            index.cells.entry(*cell).or_default().insert(connection_id);
        }
        debug!(
            "Connection {} subscribed to {} cells",
            connection_id,
            cells.len()
        );
        index.connections.insert(
            connection_id,
            Interest {
                cells,
                bounds: Some(bounds),
            },
        );
    }

    /// Drop interest in an area. An empty/zero rectangle clears all interest
    /// for the connection.
    pub fn unsubscribe(&self, connection_id: ConnectionId, bounds: BoundingBox) {
        if bounds.is_empty() {
            self.clear_interest(connection_id);
            return;
        }

        let removed: HashSet<CellId> = cells_covering(&bounds).into_iter().collect();
        let mut guard = self.index.write().expect("router index poisoned");
        let index = &mut *guard;
        let Some(interest) = index.connections.get_mut(&connection_id) else {
            return;
        };
        interest.cells.retain(|cell| !removed.contains(cell));
        // The exact rectangle no longer describes the remaining cells
        interest.bounds = None;
        let now_empty = interest.cells.is_empty();
        for cell in &removed {
            if let Some(subscribers) = index.cells.get_mut(cell) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    index.cells.remove(cell);
                }
            }
        }
        if now_empty {
            index.connections.remove(&connection_id);
        }
    }

    fn clear_interest(&self, connection_id: ConnectionId) {
        let mut index = self.index.write().expect("router index poisoned");
        index.remove_connection_cells(&connection_id);
        debug!("Connection {} cleared all interest", connection_id);
    }

    /// Tear down a connection entirely (socket closed or send failed)
    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.clear_interest(connection_id);
        self.senders.remove(&connection_id);
        metrics::gauge!("live.connections").set(self.senders.len() as f64);
        info!("Live connection {} closed", connection_id);
    }

    /// Connections whose interest covers the given position
    fn matching_connections(&self, latitude: f64, longitude: f64) -> Vec<ConnectionId> {
        let cell = CellId::containing(latitude, longitude);
        let index = self.index.read().expect("router index poisoned");
        let Some(subscribers) = index.cells.get(&cell) else {
            return Vec::new();
        };
        subscribers
            .iter()
            .filter(|connection_id| {
                index
                    .connections
                    .get(*connection_id)
                    .and_then(|interest| interest.bounds)
                    .map(|bounds| bounds.contains(latitude, longitude))
                    // Bare cell interest matches the whole cell
                    .unwrap_or(true)
            })
            .copied()
            .collect()
    }

    /// Fan an event out to every connection interested in the position.
    /// Sending never blocks: a slow consumer whose buffer is full is torn
    /// down and is expected to reconnect.
    pub fn publish_at(&self, latitude: f64, longitude: f64, message: &ServerMessage) {
        let matches = self.matching_connections(latitude, longitude);
        if matches.is_empty() {
            return;
        }
        metrics::counter!("live.events_fanned_out_total").increment(matches.len() as u64);

        for connection_id in matches {
            self.send_to(connection_id, message.clone());
        }
    }

    /// Send directly to one connection (used for the aircraft snapshot burst
    /// after a subscribe)
    pub fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) {
        let Some(sender) = self
            .senders
            .get(&connection_id)
            .map(|entry| entry.value().clone())
        else {
            return;
        };
        if let Err(e) = sender.try_send(message) {
            warn!(
                "Dropping live connection {} (outbound buffer: {})",
                connection_id, e
            );
            metrics::counter!("live.connections_dropped_total").increment(1);
            self.disconnect(connection_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }
}
