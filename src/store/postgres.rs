//! Postgres-backed `Store`.
//!
//! DESIGN
//! ======
//! Each trait method is one SQL statement or one short transaction. Races
//! are settled by the database rather than by the caller:
//! - the poll quota is a conditional `UPDATE ... WHERE current_poll_count < max_polls`
//!   backed by a CHECK constraint,
//! - answers carry a `(poll_id, user_id)` primary key and are inserted with a
//!   live-poll guard in the same statement,
//! - partial unique indexes keep socket handles and active student names unique.
//!
//! Unique violations surface as `StoreError::Conflict`.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{AnswerWrite, Store, StoreError};
use crate::models::{Answer, BanEntry, ConnId, Message, Poll, Role, Room, User, UserRebind};

const USER_COLUMNS: &str = "id, name, role, room_id, socket_id, kicked, last_kicked_at";
const POLL_COLUMNS: &str = "id, room_id, question, options, duration, created_at, end_time, is_active, created_by";

type UserRow = (Uuid, String, String, String, Option<Uuid>, bool, Option<i64>);
type PollRow = (Uuid, String, String, Vec<String>, i64, i64, i64, bool, Uuid);
type AnswerRow = (Uuid, Uuid, String, i32, String, i64);

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn conflict_or(err: sqlx::Error, what: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what),
        _ => StoreError::Database(err),
    }
}

fn user_from_row(row: UserRow) -> Result<User, StoreError> {
    let (id, name, role, room_id, socket_id, kicked, last_kicked_at) = row;
    let role = Role::from_str(&role).ok_or_else(|| StoreError::Corrupt(format!("user {id} has role {role:?}")))?;
    Ok(User { id, name, role, room_id, socket_id, kicked, last_kicked_at })
}

fn answer_from_row(row: AnswerRow) -> Result<(Uuid, Answer), StoreError> {
    let (poll_id, user_id, user_name, option, option_text, answered_at) = row;
    let option = usize::try_from(option)
        .map_err(|_| StoreError::Corrupt(format!("answer on poll {poll_id} has option {option}")))?;
    Ok((poll_id, Answer { user_id, user_name, option, option_text, answered_at }))
}

fn count_from(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

impl PgStore {
    /// Attach answers to poll rows, preserving row order.
    async fn hydrate_polls(&self, rows: Vec<PollRow>) -> Result<Vec<Poll>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.0).collect();
        let mut polls: Vec<Poll> = rows
            .into_iter()
            .map(|(id, room_id, question, options, duration, created_at, end_time, is_active, created_by)| Poll {
                id,
                room_id,
                question,
                options,
                duration,
                created_at,
                end_time,
                is_active,
                answers: Vec::new(),
                created_by,
            })
            .collect();
        if ids.is_empty() {
            return Ok(polls);
        }

        let answer_rows = sqlx::query_as::<_, AnswerRow>(
            "SELECT poll_id, user_id, user_name, option_index, option_text, answered_at
             FROM poll_answers
             WHERE poll_id = ANY($1)
             ORDER BY answered_at ASC, user_id ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for row in answer_rows {
            let (poll_id, answer) = answer_from_row(row)?;
            if let Some(poll) = polls.iter_mut().find(|p| p.id == poll_id) {
                poll.answers.push(answer);
            }
        }
        Ok(polls)
    }
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait::async_trait]
impl Store for PgStore {
    async fn insert_room(&self, room: &Room) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rooms (room_id, teacher_id, teacher_name, is_active, max_polls, current_poll_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&room.room_id)
        .bind(room.teacher_id)
        .bind(&room.teacher_name)
        .bind(room.is_active)
        .bind(room.max_polls)
        .bind(room.current_poll_count)
        .bind(room.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "room code"))?;
        Ok(())
    }

    async fn find_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query_as::<_, (String, Option<Uuid>, String, bool, i32, i32, i64)>(
            "SELECT room_id, teacher_id, teacher_name, is_active, max_polls, current_poll_count, created_at
             FROM rooms WHERE room_id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((room_id, teacher_id, teacher_name, is_active, max_polls, current_poll_count, created_at)) = row else {
            return Ok(None);
        };

        let bans = sqlx::query_as::<_, (Uuid, String, i64, i64)>(
            "SELECT user_id, name, kicked_at, can_rejoin_at FROM room_bans WHERE room_id = $1 ORDER BY seq ASC",
        )
        .bind(&room_id)
        .fetch_all(&self.pool)
        .await?;
        let kicked_users = bans
            .into_iter()
            .map(|(user_id, name, kicked_at, can_rejoin_at)| BanEntry { user_id, name, kicked_at, can_rejoin_at })
            .collect();

        Ok(Some(Room {
            room_id,
            teacher_id,
            teacher_name,
            is_active,
            max_polls,
            current_poll_count,
            kicked_users,
            created_at,
        }))
    }

    async fn increment_poll_count(&self, room_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE rooms SET current_poll_count = current_poll_count + 1
             WHERE room_id = $1 AND current_poll_count < max_polls",
        )
        .bind(room_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn push_ban(&self, room_id: &str, ban: &BanEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO room_bans (room_id, user_id, name, kicked_at, can_rejoin_at)
             SELECT $1, $2, $3, $4, $5 WHERE EXISTS (SELECT 1 FROM rooms WHERE room_id = $1)",
        )
        .bind(room_id)
        .bind(ban.user_id)
        .bind(&ban.name)
        .bind(ban.kicked_at)
        .bind(ban.can_rejoin_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pull_expired_bans(&self, room_id: &str, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM room_bans WHERE room_id = $1 AND can_rejoin_at <= $2")
            .bind(room_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, role, room_id, socket_id, kicked, last_kicked_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(&user.room_id)
        .bind(user.socket_id)
        .bind(user.kicked)
        .bind(user.last_kicked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "user"))?;
        Ok(())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn find_user_by_socket(&self, socket_id: ConnId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE socket_id = $1"))
            .bind(socket_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn find_student_by_name(&self, room_id: &str, name: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE room_id = $1 AND name = $2 AND role = 'student'
             ORDER BY kicked ASC, seq ASC
             LIMIT 1"
        ))
        .bind(room_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).transpose()
    }

    async fn rebind_user(&self, user_id: Uuid, rebind: &UserRebind) -> Result<Option<User>, StoreError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        if let Some(socket_id) = rebind.socket_id {
            sqlx::query("UPDATE users SET socket_id = NULL WHERE socket_id = $1 AND id <> $2")
                .bind(socket_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET
                 name = COALESCE($2, name),
                 role = COALESCE($3, role),
                 room_id = COALESCE($4, room_id),
                 socket_id = COALESCE($5, socket_id),
                 kicked = CASE WHEN $6 THEN FALSE ELSE kicked END
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(rebind.name.as_deref())
        .bind(rebind.role.map(Role::as_str))
        .bind(rebind.room_id.as_deref())
        .bind(rebind.socket_id)
        .bind(rebind.clear_kicked)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "user"))?;

        tx.commit().await?;
        row.map(user_from_row).transpose()
    }

    async fn mark_kicked(&self, user_id: Uuid, now: i64) -> Result<Option<(User, Option<ConnId>)>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String, Option<Uuid>, bool, Option<i64>, Option<Uuid>)>(
            "UPDATE users u
             SET kicked = TRUE, socket_id = NULL, last_kicked_at = $2
             FROM (SELECT id, socket_id FROM users WHERE id = $1 FOR UPDATE) prior
             WHERE u.id = prior.id
             RETURNING u.id, u.name, u.role, u.room_id, u.socket_id, u.kicked, u.last_kicked_at,
                       prior.socket_id",
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, name, role, room_id, socket_id, kicked, last_kicked_at, prior)) = row else {
            return Ok(None);
        };
        let user = user_from_row((id, name, role, room_id, socket_id, kicked, last_kicked_at))?;
        Ok(Some((user, prior)))
    }

    async fn list_students(&self, room_id: &str) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE room_id = $1 AND role = 'student' AND NOT kicked
             ORDER BY seq ASC"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn find_teacher(&self, room_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE room_id = $1 AND role = 'teacher'
             ORDER BY seq ASC
             LIMIT 1"
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).transpose()
    }

    async fn insert_poll(&self, poll: &Poll) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO polls (id, room_id, question, options, duration, created_at, end_time, is_active, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(poll.id)
        .bind(&poll.room_id)
        .bind(&poll.question)
        .bind(&poll.options)
        .bind(poll.duration)
        .bind(poll.created_at)
        .bind(poll.end_time)
        .bind(poll.is_active)
        .bind(poll.created_by)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "poll id"))?;
        Ok(())
    }

    async fn find_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, StoreError> {
        let rows = sqlx::query_as::<_, PollRow>(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
            .bind(poll_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(self.hydrate_polls(rows).await?.into_iter().next())
    }

    async fn list_polls(&self, room_id: &str) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE room_id = $1 ORDER BY created_at DESC, seq DESC"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_polls(rows).await
    }

    async fn list_live_polls(&self, room_id: &str, now: i64) -> Result<Vec<Poll>, StoreError> {
        let rows = sqlx::query_as::<_, PollRow>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls
             WHERE room_id = $1 AND is_active AND end_time > $2
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(room_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_polls(rows).await
    }

    async fn close_poll(&self, poll_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE polls SET is_active = FALSE WHERE id = $1")
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn close_expired_polls(&self, room_id: &str, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE polls SET is_active = FALSE WHERE room_id = $1 AND is_active AND end_time <= $2")
            .bind(room_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_polls(&self, room_id: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM polls WHERE room_id = $1")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count_from(n))
    }

    async fn count_live_polls(&self, room_id: &str, now: i64) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM polls WHERE room_id = $1 AND is_active AND end_time > $2")
            .bind(room_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(count_from(n))
    }

    async fn push_answer(&self, poll_id: Uuid, answer: &Answer, now: i64) -> Result<AnswerWrite, StoreError> {
        let option = i32::try_from(answer.option)
            .map_err(|_| StoreError::Corrupt(format!("option index {} out of range", answer.option)))?;
        let result = sqlx::query(
            "INSERT INTO poll_answers (poll_id, user_id, user_name, option_index, option_text, answered_at)
             SELECT $1, $2, $3, $4, $5, $6
             WHERE EXISTS (SELECT 1 FROM polls WHERE id = $1 AND is_active AND end_time > $7)
             ON CONFLICT (poll_id, user_id) DO NOTHING",
        )
        .bind(poll_id)
        .bind(answer.user_id)
        .bind(&answer.user_name)
        .bind(option)
        .bind(&answer.option_text)
        .bind(answer.answered_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(AnswerWrite::Appended);
        }

        let already: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM poll_answers WHERE poll_id = $1 AND user_id = $2)")
                .bind(poll_id)
                .bind(answer.user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(if already { AnswerWrite::Duplicate } else { AnswerWrite::NotLive })
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO messages (id, room_id, sender, sender_name, sender_role, text, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id)
        .bind(&message.room_id)
        .bind(message.sender)
        .bind(&message.sender_name)
        .bind(message.sender_role.as_str())
        .bind(&message.text)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, String, String, String, i64)>(
            "SELECT id, sender, sender_name, sender_role, room_id, text, created_at
             FROM messages WHERE room_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, sender, sender_name, sender_role, room_id, text, created_at)| {
                let sender_role = Role::from_str(&sender_role)
                    .ok_or_else(|| StoreError::Corrupt(format!("message {id} has role {sender_role:?}")))?;
                Ok(Message { id, sender, sender_name, sender_role, room_id, text, created_at })
            })
            .collect()
    }

    async fn delete_messages(&self, room_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE room_id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
