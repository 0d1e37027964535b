//! Connection hub: who is connected and which room channel they sit in.
//!
//! DESIGN
//! ======
//! Every websocket task registers an `mpsc` sender here. Room channels are
//! plain membership sets; emitting to a room walks the set and `try_send`s to
//! each member, so a slow client drops frames instead of stalling the sender.
//!
//! Each non-empty room channel owns one sweep ticker task. The ticker is
//! started by the first `join_room` and aborted when the last member leaves.
//! Both happen under the hub write lock, so a room never ends up with two
//! tickers or with a ticker and no members.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::frame::Frame;
use crate::models::ConnId;
use crate::services::ticker;
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

/// What a connection task receives from the rest of the server.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Frame),
    /// Close the socket after flushing anything queued before this.
    Close,
}

struct Connection {
    tx: mpsc::Sender<Outbound>,
    room_id: Option<String>,
}

#[derive(Default)]
struct RoomChannel {
    members: HashSet<ConnId>,
    ticker: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct Hub {
    connections: HashMap<ConnId, Connection>,
    rooms: HashMap<String, RoomChannel>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `client_id` from its room channel, stopping the ticker if the
    /// channel becomes empty.
    fn detach(&mut self, client_id: ConnId) -> Option<String> {
        let room_id = self.connections.get_mut(&client_id)?.room_id.take()?;
        if let Some(channel) = self.rooms.get_mut(&room_id) {
            channel.members.remove(&client_id);
            if channel.members.is_empty() {
                if let Some(ticker) = channel.ticker.take() {
                    ticker.abort();
                }
                self.rooms.remove(&room_id);
                info!(%room_id, "hub: room channel emptied");
            }
        }
        Some(room_id)
    }

    fn send(&self, client_id: ConnId, outbound: Outbound) -> bool {
        let Some(conn) = self.connections.get(&client_id) else {
            return false;
        };
        match conn.tx.try_send(outbound) {
            Ok(()) => true,
            Err(e) => {
                warn!(%client_id, error = %e, "hub: dropped outbound frame");
                false
            }
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

pub async fn register(state: &AppState, client_id: ConnId, tx: mpsc::Sender<Outbound>) {
    let mut hub = state.hub.write().await;
    hub.connections.insert(client_id, Connection { tx, room_id: None });
}

/// Remove a connection entirely. Returns the room it was in, if any.
pub async fn unregister(state: &AppState, client_id: ConnId) -> Option<String> {
    let mut hub = state.hub.write().await;
    let room_id = hub.detach(client_id);
    hub.connections.remove(&client_id);
    room_id
}

// =============================================================================
// ROOM CHANNELS
// =============================================================================

/// Put a connection into `room_id`, leaving any previous room first.
pub async fn join_room(state: &AppState, client_id: ConnId, room_id: &str) {
    let mut hub = state.hub.write().await;
    let Some(conn) = hub.connections.get(&client_id) else {
        return;
    };
    if conn.room_id.as_deref() == Some(room_id) {
        return;
    }
    hub.detach(client_id);

    if let Some(conn) = hub.connections.get_mut(&client_id) {
        conn.room_id = Some(room_id.to_string());
    }
    let channel = hub.rooms.entry(room_id.to_string()).or_default();
    channel.members.insert(client_id);

    let running = channel.ticker.as_ref().is_some_and(|t| !t.is_finished());
    if !running {
        channel.ticker = Some(ticker::spawn_room_ticker(state.clone(), room_id.to_string()));
        info!(%room_id, "hub: room ticker started");
    }
}

pub async fn room_members(state: &AppState, room_id: &str) -> Vec<ConnId> {
    let hub = state.hub.read().await;
    hub.rooms
        .get(room_id)
        .map(|c| c.members.iter().copied().collect())
        .unwrap_or_default()
}

#[cfg(test)]
pub async fn has_ticker(state: &AppState, room_id: &str) -> bool {
    let hub = state.hub.read().await;
    hub.rooms
        .get(room_id)
        .and_then(|c| c.ticker.as_ref())
        .is_some_and(|t| !t.is_finished())
}

// =============================================================================
// EMIT
// =============================================================================

/// Queue a frame for one connection. Returns `false` if it is gone or full.
pub async fn emit_to_client(state: &AppState, client_id: ConnId, frame: Frame) -> bool {
    let hub = state.hub.read().await;
    hub.send(client_id, Outbound::Frame(frame))
}

/// Queue a frame for every member of `room_id`, optionally skipping one.
pub async fn emit_to_room(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<ConnId>) {
    let hub = state.hub.read().await;
    let Some(channel) = hub.rooms.get(room_id) else {
        return;
    };
    let frame = frame.clone().with_room_id(room_id);
    for member in &channel.members {
        if Some(*member) == exclude {
            continue;
        }
        hub.send(*member, Outbound::Frame(frame.clone()));
    }
}

/// Force-close a connection: pull it from its room and tell its task to close.
pub async fn disconnect(state: &AppState, client_id: ConnId) {
    let mut hub = state.hub.write().await;
    hub.detach(client_id);
    hub.send(client_id, Outbound::Close);
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
