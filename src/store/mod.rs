//! Persistence collaborator.
//!
//! DESIGN
//! ======
//! Services talk to storage only through the `Store` trait. Every method is
//! one atomic operation against the backing store: conditional increments,
//! conditional appends and pushes/pulls on the ban list happen inside a single
//! critical section (memory) or a single statement/transaction (Postgres), so
//! concurrent handlers never lose updates through read-modify-write.
//!
//! Time never comes from the store. Callers pass `now` (ms since epoch) to the
//! operations whose filters depend on it.

pub mod memory;
pub mod postgres;

use uuid::Uuid;

use crate::models::{Answer, BanEntry, ConnId, Message, Poll, Room, User, UserRebind};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result of a conditional answer append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerWrite {
    Appended,
    /// The user already has an answer on this poll.
    Duplicate,
    /// The poll is missing, closed, or past its deadline.
    NotLive,
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    // --- rooms ---------------------------------------------------------------

    /// Insert a room. `Conflict` when the room code is taken.
    async fn insert_room(&self, room: &Room) -> Result<(), StoreError>;

    async fn find_room(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    /// Increment `current_poll_count` iff it is below `max_polls`.
    /// Returns `false` when the room is missing or full.
    async fn increment_poll_count(&self, room_id: &str) -> Result<bool, StoreError>;

    async fn push_ban(&self, room_id: &str, ban: &BanEntry) -> Result<(), StoreError>;

    /// Remove bans with `can_rejoin_at <= now`. Returns the number removed.
    async fn pull_expired_bans(&self, room_id: &str, now: i64) -> Result<u64, StoreError>;

    // --- users ---------------------------------------------------------------

    /// Insert a user. `Conflict` when an active student with the same name
    /// already exists in the room, or the socket handle is bound elsewhere.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_socket(&self, socket_id: ConnId) -> Result<Option<User>, StoreError>;

    /// Student with `name` in the room. Non-kicked records win over kicked ones.
    async fn find_student_by_name(&self, room_id: &str, name: &str) -> Result<Option<User>, StoreError>;

    /// Apply a rebind. A socket handle moved onto this user is cleared from
    /// any other user holding it. Returns the updated user.
    async fn rebind_user(&self, user_id: Uuid, rebind: &UserRebind) -> Result<Option<User>, StoreError>;

    /// Set `kicked`, clear the socket handle and stamp `last_kicked_at`.
    /// Returns the updated user and the handle it held before.
    async fn mark_kicked(&self, user_id: Uuid, now: i64) -> Result<Option<(User, Option<ConnId>)>, StoreError>;

    /// Non-kicked students of a room in join order.
    async fn list_students(&self, room_id: &str) -> Result<Vec<User>, StoreError>;

    async fn find_teacher(&self, room_id: &str) -> Result<Option<User>, StoreError>;

    // --- polls ---------------------------------------------------------------

    async fn insert_poll(&self, poll: &Poll) -> Result<(), StoreError>;

    async fn find_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError>;

    /// Every poll of the room, newest first.
    async fn list_polls(&self, room_id: &str) -> Result<Vec<Poll>, StoreError>;

    /// Polls with `is_active && end_time > now`, oldest first.
    async fn list_live_polls(&self, room_id: &str, now: i64) -> Result<Vec<Poll>, StoreError>;

    /// Set `is_active = false`. Returns `false` if the poll does not exist.
    async fn close_poll(&self, poll_id: Uuid) -> Result<bool, StoreError>;

    /// Close every poll in the room with `is_active && end_time <= now`.
    async fn close_expired_polls(&self, room_id: &str, now: i64) -> Result<u64, StoreError>;

    async fn count_polls(&self, room_id: &str) -> Result<u64, StoreError>;

    async fn count_live_polls(&self, room_id: &str, now: i64) -> Result<u64, StoreError>;

    /// Append an answer iff the poll is live at `now` and the user has not
    /// answered yet. Check and append are one atomic step.
    async fn push_answer(&self, poll_id: Uuid, answer: &Answer, now: i64) -> Result<AnswerWrite, StoreError>;

    // --- messages ------------------------------------------------------------

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Messages of a room, oldest first.
    async fn list_messages(&self, room_id: &str) -> Result<Vec<Message>, StoreError>;

    async fn delete_messages(&self, room_id: &str) -> Result<u64, StoreError>;
}
