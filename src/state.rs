//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! passed by reference into every service function. It holds:
//! - the persistence collaborator (`Store`) and the time source (`Clock`),
//! - the room-code generator,
//! - the connection hub (live sockets and room channels),
//! - one creation mutex per room, so poll-creation checks and the quota
//!   increment cannot interleave.
//!
//! Clone is required by Axum; every field is an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::clock::Clock;
use crate::config::Config;
use crate::services::hub::Hub;
use crate::services::room::RoomCodes;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub codes: Arc<dyn RoomCodes>,
    pub hub: Arc<RwLock<Hub>>,
    poll_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn Store>, clock: Arc<dyn Clock>, codes: Arc<dyn RoomCodes>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
            codes,
            hub: Arc::new(RwLock::new(Hub::new())),
            poll_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current time in ms from the injected clock.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Poll-creation mutex for `room_id`, created on first use.
    pub async fn poll_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.poll_locks.lock().await;
        Arc::clone(locks.entry(room_id.to_string()).or_default())
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;
    use crate::frame::Frame;
    use crate::models::{Answer, ConnId, Poll, Role, Room, User};
    use crate::services::hub::{self, Outbound};
    use crate::services::room::ScriptedCodes;
    use crate::store::MemoryStore;

    /// Fixed start time for manual clocks: 2023-11-14T22:13:20Z.
    pub const T0: i64 = 1_700_000_000_000;

    /// In-memory app with a manual clock at `T0` and scripted room codes.
    ///
    /// The sweep interval is an hour so background tickers stay quiet unless
    /// a test drives them directly.
    #[must_use]
    pub fn test_app(codes: &[&str]) -> (AppState, Arc<ManualClock>) {
        let config = Config { sweep_interval: Duration::from_secs(3600), ..Config::default() };
        test_app_with_config(config, codes)
    }

    #[must_use]
    pub fn test_app_with_config(config: Config, codes: &[&str]) -> (AppState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(ScriptedCodes::new(codes)),
        );
        (state, clock)
    }

    /// Register a fake connection in the hub and return its id and inbox.
    pub async fn connect_client(state: &AppState) -> (ConnId, mpsc::Receiver<Outbound>) {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        hub::register(state, client_id, tx).await;
        (client_id, rx)
    }

    /// Next frame queued for a fake connection. Panics on timeout or close.
    pub async fn recv_frame(rx: &mut mpsc::Receiver<Outbound>) -> Frame {
        match timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(Outbound::Frame(frame))) => frame,
            Ok(Some(Outbound::Close)) => panic!("expected frame, got close"),
            Ok(None) => panic!("outbound channel closed"),
            Err(_) => panic!("timed out waiting for frame"),
        }
    }

    /// Everything queued right now, without waiting.
    pub fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    /// Event names of the frames queued right now.
    pub fn drain_events(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        drain(rx)
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Frame(f) => Some(f.event),
                Outbound::Close => None,
            })
            .collect()
    }

    #[must_use]
    pub fn sample_room(room_id: &str) -> Room {
        Room {
            room_id: room_id.to_string(),
            teacher_id: Some(Uuid::new_v4()),
            teacher_name: "Ms. Frizzle".into(),
            is_active: true,
            max_polls: 15,
            current_poll_count: 0,
            kicked_users: Vec::new(),
            created_at: T0,
        }
    }

    #[must_use]
    pub fn sample_user(room_id: &str, name: &str, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            room_id: room_id.to_string(),
            socket_id: Some(Uuid::new_v4()),
            kicked: false,
            last_kicked_at: None,
        }
    }

    /// "2+2?" with options `["3", "4"]`.
    #[must_use]
    pub fn sample_poll(room_id: &str, created_at: i64, duration_secs: i64) -> Poll {
        Poll {
            id: Uuid::new_v4(),
            room_id: room_id.to_string(),
            question: "2+2?".into(),
            options: vec!["3".into(), "4".into()],
            duration: duration_secs,
            created_at,
            end_time: created_at + duration_secs * 1000,
            is_active: true,
            answers: Vec::new(),
            created_by: Uuid::new_v4(),
        }
    }

    #[must_use]
    pub fn sample_answer(user_id: Uuid, option: usize, answered_at: i64) -> Answer {
        Answer {
            user_id,
            user_name: "student".into(),
            option,
            option_text: ["3", "4"].get(option).copied().unwrap_or("?").into(),
            answered_at,
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
