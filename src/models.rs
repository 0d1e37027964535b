//! Persisted entities: rooms, users, polls, answers and chat messages.
//!
//! DESIGN
//! ======
//! These structs mirror the rows kept by a `Store` and double as the JSON
//! payloads sent to clients, so field names serialize in camelCase. All
//! timestamps are milliseconds since the Unix epoch, matching `Frame::ts`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Connection handle assigned by the websocket layer.
pub type ConnId = Uuid;

// =============================================================================
// ROOM
// =============================================================================

/// One timed exclusion from a room after a kick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanEntry {
    pub user_id: Uuid,
    pub name: String,
    pub kicked_at: i64,
    pub can_rejoin_at: i64,
}

impl BanEntry {
    /// Whether the ban still blocks at `now`.
    #[must_use]
    pub fn is_active(&self, now: i64) -> bool {
        now < self.can_rejoin_at
    }

    /// Whole minutes until the ban lifts, rounded up.
    #[must_use]
    pub fn minutes_left(&self, now: i64) -> i64 {
        let remaining = (self.can_rejoin_at - now).max(0);
        (remaining + 59_999) / 60_000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub teacher_id: Option<ConnId>,
    pub teacher_name: String,
    pub is_active: bool,
    pub max_polls: i32,
    pub current_poll_count: i32,
    pub kicked_users: Vec<BanEntry>,
    pub created_at: i64,
}

// =============================================================================
// USER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub room_id: String,
    pub socket_id: Option<ConnId>,
    pub kicked: bool,
    pub last_kicked_at: Option<i64>,
}

/// Field updates applied to a user on reconnect. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct UserRebind {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub room_id: Option<String>,
    pub socket_id: Option<ConnId>,
    pub clear_kicked: bool,
}

// =============================================================================
// POLL
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub user_id: Uuid,
    pub user_name: String,
    pub option: usize,
    pub option_text: String,
    pub answered_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub room_id: String,
    pub question: String,
    pub options: Vec<String>,
    /// Seconds the poll stays open.
    pub duration: i64,
    pub created_at: i64,
    pub end_time: i64,
    pub is_active: bool,
    pub answers: Vec<Answer>,
    pub created_by: Uuid,
}

impl Poll {
    /// The authoritative activity check: active flag set and deadline not reached.
    #[must_use]
    pub fn is_live(&self, now: i64) -> bool {
        self.is_active && now < self.end_time
    }

    #[must_use]
    pub fn has_answer_from(&self, user_id: Uuid) -> bool {
        self.answers.iter().any(|a| a.user_id == user_id)
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: Uuid,
    pub sender_name: String,
    pub sender_role: Role,
    pub room_id: String,
    pub text: String,
    pub created_at: i64,
}

#[cfg(test)]
#[path = "models_test.rs"]
mod tests;
