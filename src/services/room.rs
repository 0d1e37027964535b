//! Room registry: room codes, poll quota and the ban list.
//!
//! DESIGN
//! ======
//! Rooms are created when a teacher joins without an existing session and
//! are never deleted. The room code is a 6-character `A-Z0-9` string; the
//! store's uniqueness check decides collisions and creation retries with a
//! fresh code a bounded number of times.
//!
//! Bans match by display name, case-insensitively, and expire on their own
//! (`now >= can_rejoin_at`). `prune_bans` only tidies the list.

#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, ErrorKind};
use crate::models::{BanEntry, ConnId, Room};
use crate::state::AppState;
use crate::store::StoreError;

pub const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 8;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("could not allocate a unique room code after {0} attempts")]
    CodeExhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::CodeExhausted(_) => "E_ROOM_CODE_CONFLICT",
            Self::Store(_) => "E_STORE",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::CodeExhausted(_) => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

// =============================================================================
// ROOM CODES
// =============================================================================

/// Source of candidate room codes.
pub trait RoomCodes: Send + Sync {
    fn next_code(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodes;

impl RoomCodes for RandomCodes {
    fn next_code(&self) -> String {
        let mut rng = rand::rng();
        (0..CODE_LEN)
            .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
            .collect()
    }
}

/// Hands out a fixed sequence of codes, then falls back to random ones.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedCodes {
    queue: Mutex<VecDeque<String>>,
}

#[cfg(test)]
impl ScriptedCodes {
    #[must_use]
    pub fn new(codes: &[&str]) -> Self {
        Self { queue: Mutex::new(codes.iter().map(|c| (*c).to_string()).collect()) }
    }
}

#[cfg(test)]
impl RoomCodes for ScriptedCodes {
    fn next_code(&self) -> String {
        let next = match self.queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| RandomCodes.next_code())
    }
}

// =============================================================================
// CREATE / LOOKUP
// =============================================================================

/// Create a room owned by the teacher connection `teacher_id`.
///
/// # Errors
///
/// `CodeExhausted` if every candidate code collided; store errors otherwise.
pub async fn create_room(state: &AppState, teacher_id: ConnId, teacher_name: &str) -> Result<Room, RoomError> {
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let room = Room {
            room_id: state.codes.next_code(),
            teacher_id: Some(teacher_id),
            teacher_name: teacher_name.to_string(),
            is_active: true,
            max_polls: state.config.max_polls_per_room,
            current_poll_count: 0,
            kicked_users: Vec::new(),
            created_at: state.now(),
        };
        match state.store.insert_room(&room).await {
            Ok(()) => {
                info!(room_id = %room.room_id, %teacher_name, "room: created");
                return Ok(room);
            }
            Err(StoreError::Conflict(_)) => {
                warn!(room_id = %room.room_id, attempt, "room: code collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(RoomError::CodeExhausted(MAX_CODE_ATTEMPTS))
}

/// # Errors
///
/// Store errors only.
pub async fn get_room_info(state: &AppState, room_id: &str) -> Result<Option<Room>, RoomError> {
    Ok(state.store.find_room(room_id).await?)
}

/// Reserve one poll slot. `false` when the room is full or missing.
///
/// # Errors
///
/// Store errors only.
pub async fn increment_poll_count(state: &AppState, room_id: &str) -> Result<bool, RoomError> {
    Ok(state.store.increment_poll_count(room_id).await?)
}

// =============================================================================
// BANS
// =============================================================================

/// Append a ban for a kicked user lasting the configured window from `now`.
///
/// # Errors
///
/// Store errors only.
pub async fn record_kick(
    state: &AppState,
    room_id: &str,
    user_id: Uuid,
    name: &str,
    now: i64,
) -> Result<BanEntry, RoomError> {
    let ban = BanEntry {
        user_id,
        name: name.to_string(),
        kicked_at: now,
        can_rejoin_at: now + state.config.ban_duration_ms(),
    };
    state.store.push_ban(room_id, &ban).await?;
    Ok(ban)
}

/// The active ban on `name` in `room_id`, if any.
///
/// # Errors
///
/// Store errors only.
pub async fn ban_for_name(state: &AppState, room_id: &str, name: &str) -> Result<Option<BanEntry>, RoomError> {
    let Some(room) = state.store.find_room(room_id).await? else {
        return Ok(None);
    };
    Ok(active_ban_by_name(&room, name, state.now()).cloned())
}

/// # Errors
///
/// Store errors only.
pub async fn is_banned(state: &AppState, room_id: &str, name: &str) -> Result<bool, RoomError> {
    Ok(ban_for_name(state, room_id, name).await?.is_some())
}

/// Drop lapsed bans. Returns how many were removed.
///
/// # Errors
///
/// Store errors only.
pub async fn prune_bans(state: &AppState, room_id: &str) -> Result<u64, RoomError> {
    let removed = state.store.pull_expired_bans(room_id, state.now()).await?;
    if removed > 0 {
        info!(%room_id, removed, "room: pruned expired bans");
    }
    Ok(removed)
}

#[must_use]
pub fn active_ban_by_name<'a>(room: &'a Room, name: &str, now: i64) -> Option<&'a BanEntry> {
    room.kicked_users
        .iter()
        .filter(|b| b.is_active(now) && b.name.eq_ignore_ascii_case(name))
        .max_by_key(|b| b.can_rejoin_at)
}

#[must_use]
pub fn active_ban_by_user(room: &Room, user_id: Uuid, now: i64) -> Option<&BanEntry> {
    room.kicked_users
        .iter()
        .filter(|b| b.is_active(now) && b.user_id == user_id)
        .max_by_key(|b| b.can_rejoin_at)
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
