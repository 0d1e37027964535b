//! User directory: join, reconnect, kick and ban status.
//!
//! DESIGN
//! ======
//! A user is bound to at most one live connection handle (`socket_id`). A
//! connection that joins again rebinds its existing user instead of creating
//! a second one. Students are otherwise matched by display name within a
//! room: a live record with the same name is rebound to the new connection,
//! and a kicked record whose ban has lapsed is reactivated.
//!
//! The store enforces name uniqueness for active students. When two joins
//! race on the same name, the loser rebinds the winner's record.

use tracing::info;
use uuid::Uuid;

use crate::frame::{ErrorCode, ErrorKind};
use crate::models::{ConnId, Role, User, UserRebind};
use crate::services::room::{self, RoomError};
use crate::state::AppState;
use crate::store::StoreError;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Name is required")]
    NameRequired,
    #[error("Students must provide a room ID")]
    RoomIdRequired,
    #[error("Room not found or inactive")]
    RoomNotFound,
    #[error("You are temporarily banned from this room. Try again in {minutes} minutes.")]
    Banned { minutes: i64 },
    #[error("Student not found in this room")]
    NotFound,
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for UserError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NameRequired => "E_NAME_REQUIRED",
            Self::RoomIdRequired => "E_ROOM_ID_REQUIRED",
            Self::RoomNotFound => "E_ROOM_NOT_FOUND",
            Self::Banned { .. } => "E_BANNED",
            Self::NotFound => "E_USER_NOT_FOUND",
            Self::Room(e) => e.error_code(),
            Self::Store(_) => "E_STORE",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::NameRequired | Self::RoomIdRequired => ErrorKind::Validation,
            Self::RoomNotFound | Self::NotFound => ErrorKind::NotFound,
            Self::Banned { .. } => ErrorKind::Banned,
            Self::Room(e) => e.kind(),
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Inbound `join` payload.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub name: String,
    pub role: Role,
    pub room_id: Option<String>,
}

/// A kicked user and the connection handle it held at kick time.
#[derive(Debug, Clone)]
pub struct KickedUser {
    pub user: User,
    pub prior_socket: Option<ConnId>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanStatus {
    pub banned: bool,
    pub reason: Option<String>,
}

impl BanStatus {
    fn clear() -> Self {
        Self { banned: false, reason: None }
    }

    fn banned(reason: impl Into<String>) -> Self {
        Self { banned: true, reason: Some(reason.into()) }
    }
}

// =============================================================================
// JOIN
// =============================================================================

/// Admit a connection into a room, creating or rebinding its user.
///
/// # Errors
///
/// `NameRequired`, `RoomIdRequired`, `RoomNotFound`, `Banned`, or store errors.
pub async fn join_or_reconnect(state: &AppState, req: JoinRequest, conn: ConnId) -> Result<User, UserError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(UserError::NameRequired);
    }
    let room_id = req
        .room_id
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    // Same connection joining again: refresh its record. A student moving
    // rooms passes the same admission gate as a fresh join.
    if let Some(existing) = state.store.find_user_by_socket(conn).await? {
        if req.role == Role::Student {
            let target = room_id.as_deref().unwrap_or(&existing.room_id);
            admit_student(state, &name, target, Some(existing.id)).await?;
        }
        let rebind = UserRebind {
            name: Some(name),
            role: Some(req.role),
            room_id,
            socket_id: Some(conn),
            clear_kicked: true,
        };
        let user = state
            .store
            .rebind_user(existing.id, &rebind)
            .await?
            .ok_or(UserError::NotFound)?;
        info!(user_id = %user.id, room_id = %user.room_id, "user: reconnected by handle");
        return Ok(user);
    }

    match req.role {
        Role::Teacher => join_teacher(state, &name, conn).await,
        Role::Student => {
            let room_id = room_id.ok_or(UserError::RoomIdRequired)?;
            join_student(state, &name, &room_id, conn).await
        }
    }
}

async fn join_teacher(state: &AppState, name: &str, conn: ConnId) -> Result<User, UserError> {
    let room = room::create_room(state, conn, name).await?;
    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role: Role::Teacher,
        room_id: room.room_id,
        socket_id: Some(conn),
        kicked: false,
        last_kicked_at: None,
    };
    state.store.insert_user(&user).await?;
    info!(user_id = %user.id, room_id = %user.room_id, "user: teacher joined");
    Ok(user)
}

/// Room must be active, and neither `name` nor `user_id` may hold an active
/// ban there. Lapsed bans are pruned first.
async fn admit_student(state: &AppState, name: &str, room_id: &str, user_id: Option<Uuid>) -> Result<(), UserError> {
    let room = state.store.find_room(room_id).await?;
    if !room.is_some_and(|r| r.is_active) {
        return Err(UserError::RoomNotFound);
    }

    room::prune_bans(state, room_id).await?;
    let now = state.now();
    if room::is_banned(state, room_id, name).await? {
        let minutes = room::ban_for_name(state, room_id, name)
            .await?
            .map_or(1, |ban| ban.minutes_left(now));
        return Err(UserError::Banned { minutes });
    }
    if let Some(user_id) = user_id {
        let room = state.store.find_room(room_id).await?.ok_or(UserError::RoomNotFound)?;
        if let Some(ban) = room::active_ban_by_user(&room, user_id, now) {
            return Err(UserError::Banned { minutes: ban.minutes_left(now) });
        }
    }
    Ok(())
}

async fn join_student(state: &AppState, name: &str, room_id: &str, conn: ConnId) -> Result<User, UserError> {
    admit_student(state, name, room_id, None).await?;

    if let Some(existing) = state.store.find_student_by_name(room_id, name).await? {
        return rebind_student(state, &existing, conn).await;
    }

    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role: Role::Student,
        room_id: room_id.to_string(),
        socket_id: Some(conn),
        kicked: false,
        last_kicked_at: None,
    };
    match state.store.insert_user(&user).await {
        Ok(()) => {
            info!(user_id = %user.id, %room_id, "user: student joined");
            Ok(user)
        }
        Err(StoreError::Conflict(_)) => {
            // Lost a race on the name; adopt the winner's record.
            let winner = state
                .store
                .find_student_by_name(room_id, name)
                .await?
                .ok_or(UserError::NotFound)?;
            rebind_student(state, &winner, conn).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn rebind_student(state: &AppState, existing: &User, conn: ConnId) -> Result<User, UserError> {
    let rebind = UserRebind { socket_id: Some(conn), clear_kicked: existing.kicked, ..UserRebind::default() };
    let user = state
        .store
        .rebind_user(existing.id, &rebind)
        .await?
        .ok_or(UserError::NotFound)?;
    if existing.kicked {
        info!(user_id = %user.id, room_id = %user.room_id, "user: kicked student reactivated");
    } else {
        info!(user_id = %user.id, room_id = %user.room_id, "user: student rejoined");
    }
    Ok(user)
}

// =============================================================================
// MODERATION
// =============================================================================

/// Kick a student: flag the record, drop its connection handle, record the ban.
///
/// # Errors
///
/// `NotFound` if the user is not a student of `room_id`; store errors otherwise.
pub async fn kick(state: &AppState, user_id: Uuid, room_id: &str) -> Result<KickedUser, UserError> {
    let target = state.store.find_user(user_id).await?;
    if !target.is_some_and(|u| u.role == Role::Student && u.room_id == room_id) {
        return Err(UserError::NotFound);
    }

    let now = state.now();
    let (user, prior_socket) = state
        .store
        .mark_kicked(user_id, now)
        .await?
        .ok_or(UserError::NotFound)?;
    room::record_kick(state, room_id, user.id, &user.name, now).await?;
    info!(user_id = %user.id, %room_id, "user: kicked");
    Ok(KickedUser { user, prior_socket })
}

/// Whether `user_id` may currently act in `room_id`.
///
/// # Errors
///
/// Store errors only.
pub async fn check_ban_status(state: &AppState, user_id: Uuid, room_id: &str) -> Result<BanStatus, UserError> {
    let Some(user) = state.store.find_user(user_id).await? else {
        return Ok(BanStatus::banned("User not found"));
    };
    if user.kicked {
        return Ok(BanStatus::banned("User has been kicked from the room"));
    }
    let Some(room) = state.store.find_room(room_id).await? else {
        return Ok(BanStatus::clear());
    };
    let now = state.now();
    Ok(match room::active_ban_by_user(&room, user_id, now) {
        Some(ban) => BanStatus::banned(format!(
            "You are banned from this room. Try again in {} minutes.",
            ban.minutes_left(now)
        )),
        None => BanStatus::clear(),
    })
}

// =============================================================================
// QUERIES
// =============================================================================

/// Non-kicked students in join order.
///
/// # Errors
///
/// Store errors only.
pub async fn list_students(state: &AppState, room_id: &str) -> Result<Vec<User>, UserError> {
    Ok(state.store.list_students(room_id).await?)
}

/// # Errors
///
/// Store errors only.
pub async fn get_teacher(state: &AppState, room_id: &str) -> Result<Option<User>, UserError> {
    Ok(state.store.find_teacher(room_id).await?)
}

#[cfg(test)]
#[path = "user_test.rs"]
mod tests;
