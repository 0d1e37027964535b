//! Poll engine: creation gate, answers, expiry and aggregation.
//!
//! DESIGN
//! ======
//! A poll is `Open` while `is_active && now < end_time`, `Expired` once the
//! deadline passes but the sweep has not run, and `Closed` after the sweep or
//! an explicit close. Every read that reports activity uses `Poll::is_live`,
//! so an expired-but-unswept poll is never treated as open.
//!
//! CONCURRENCY
//! ===========
//! Creation runs under the room's poll mutex: existence, quota and the
//! pending-answer gate are checked, the poll is inserted, then the quota
//! slot is taken with a conditional increment. Answers are appended by a
//! single conditional store write, so concurrent submits from one user
//! produce one answer.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, ErrorKind};
use crate::models::{Answer, Poll};
use crate::services::room::{self, RoomError};
use crate::state::AppState;
use crate::store::{AnswerWrite, StoreError};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Room not found or inactive")]
    RoomNotFound,
    #[error("Room has reached maximum poll limit of {0}")]
    QuotaExceeded(i32),
    #[error("Cannot create new poll: {0} student(s) haven't answered the current poll yet")]
    PendingAnswers(usize),
    #[error("Poll not found")]
    NotFound,
    #[error("Poll is not active or has expired")]
    NotActive,
    #[error("User not found")]
    UserNotFound,
    #[error("You have already answered this poll")]
    DuplicateAnswer,
    #[error("Invalid option selected")]
    InvalidOption,
    #[error("{0}")]
    Validation(&'static str),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for PollError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomNotFound => "E_ROOM_NOT_FOUND",
            Self::QuotaExceeded(_) => "E_POLL_QUOTA",
            Self::PendingAnswers(_) => "E_PENDING_ANSWERS",
            Self::NotFound => "E_POLL_NOT_FOUND",
            Self::NotActive => "E_POLL_NOT_ACTIVE",
            Self::UserNotFound => "E_USER_NOT_FOUND",
            Self::DuplicateAnswer => "E_DUPLICATE_ANSWER",
            Self::InvalidOption => "E_INVALID_OPTION",
            Self::Validation(_) => "E_VALIDATION",
            Self::Room(e) => e.error_code(),
            Self::Store(_) => "E_STORE",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::RoomNotFound | Self::NotFound | Self::UserNotFound => ErrorKind::NotFound,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::PendingAnswers(_) => ErrorKind::PendingAnswers,
            Self::NotActive | Self::InvalidOption | Self::Validation(_) => ErrorKind::Validation,
            Self::DuplicateAnswer => ErrorKind::Conflict,
            Self::Room(e) => e.kind(),
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Inbound `createPoll` payload plus the room and creator it is bound to.
#[derive(Debug, Clone)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    /// Seconds; `None` uses the configured default.
    pub duration: Option<i64>,
    pub room_id: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerUser {
    pub user_id: Uuid,
    pub user_name: String,
    pub answered_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionCount {
    pub option: String,
    pub index: usize,
    pub count: usize,
    pub percentage: u32,
    pub users: Vec<AnswerUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSummary {
    pub total_answers: usize,
    pub option_counts: Vec<OptionCount>,
    /// The live predicate at read time, not the stored flag.
    pub is_active: bool,
}

/// A poll with its aggregated results, as sent in `pollResults`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    #[serde(flatten)]
    pub poll: Poll,
    pub results: ResultsSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryCount {
    pub option: String,
    pub count: usize,
    pub percentage: u32,
}

/// Compact per-poll summary for the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollHistoryEntry {
    pub id: Uuid,
    pub question: String,
    pub options: Vec<String>,
    pub total_answers: usize,
    pub results: Vec<HistoryCount>,
    pub is_active: bool,
    pub created_at: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub total_polls: u64,
    pub active_polls: u64,
    pub max_polls: i32,
    pub remaining_polls: u64,
}

// =============================================================================
// AGGREGATION
// =============================================================================

/// `round(count / total * 100)`, halves rounding up; 0 when `total` is 0.
#[must_use]
pub fn percentage(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    u32::try_from((count * 200 + total) / (total * 2)).unwrap_or(100)
}

#[must_use]
pub fn tally(poll: &Poll, now: i64) -> ResultsSummary {
    let total = poll.answers.len();
    let option_counts = poll
        .options
        .iter()
        .enumerate()
        .map(|(index, option)| {
            let users: Vec<AnswerUser> = poll
                .answers
                .iter()
                .filter(|a| a.option == index)
                .map(|a| AnswerUser { user_id: a.user_id, user_name: a.user_name.clone(), answered_at: a.answered_at })
                .collect();
            OptionCount {
                option: option.clone(),
                index,
                count: users.len(),
                percentage: percentage(users.len(), total),
                users,
            }
        })
        .collect();
    ResultsSummary { total_answers: total, option_counts, is_active: poll.is_live(now) }
}

fn history_entry(poll: Poll) -> PollHistoryEntry {
    let total = poll.answers.len();
    let results = poll
        .options
        .iter()
        .enumerate()
        .map(|(index, option)| {
            let count = poll.answers.iter().filter(|a| a.option == index).count();
            HistoryCount { option: option.clone(), count, percentage: percentage(count, total) }
        })
        .collect();
    PollHistoryEntry {
        id: poll.id,
        question: poll.question,
        options: poll.options,
        total_answers: total,
        results,
        is_active: poll.is_active,
        created_at: poll.created_at,
        end_time: poll.end_time,
    }
}

// =============================================================================
// CREATE
// =============================================================================

fn validate(new: &NewPoll, default_duration: i64) -> Result<(String, Vec<String>, i64), PollError> {
    let question = new.question.trim();
    if question.is_empty() {
        return Err(PollError::Validation("Question is required"));
    }
    let options: Vec<String> = new.options.iter().map(|o| o.trim().to_string()).collect();
    if options.len() < 2 {
        return Err(PollError::Validation("At least two options are required"));
    }
    if options.iter().any(String::is_empty) {
        return Err(PollError::Validation("Options cannot be empty"));
    }
    let duration = new.duration.unwrap_or(default_duration);
    if duration <= 0 {
        return Err(PollError::Validation("Duration must be positive"));
    }
    Ok((question.to_string(), options, duration))
}

/// Create a poll if the room has quota left and nobody owes an answer.
///
/// # Errors
///
/// `Validation`, `RoomNotFound`, `QuotaExceeded`, `PendingAnswers`, or store errors.
pub async fn create_poll(state: &AppState, new: NewPoll) -> Result<Poll, PollError> {
    let (question, options, duration) = validate(&new, state.config.default_poll_duration_secs)?;
    let room_id = new.room_id.as_str();

    let lock = state.poll_lock(room_id).await;
    let _guard = lock.lock().await;

    let room = state
        .store
        .find_room(room_id)
        .await?
        .filter(|r| r.is_active)
        .ok_or(PollError::RoomNotFound)?;
    if room.current_poll_count >= room.max_polls {
        return Err(PollError::QuotaExceeded(room.max_polls));
    }

    sweep_expired(state, room_id).await?;
    let pending = pending_students(state, room_id).await?;
    if pending > 0 {
        return Err(PollError::PendingAnswers(pending));
    }

    let now = state.now();
    let end_time = duration
        .checked_mul(1000)
        .and_then(|ms| now.checked_add(ms))
        .ok_or(PollError::Validation("Duration is too long"))?;
    let poll = Poll {
        id: Uuid::new_v4(),
        room_id: room_id.to_string(),
        question,
        options,
        duration,
        created_at: now,
        end_time,
        is_active: true,
        answers: Vec::new(),
        created_by: new.created_by,
    };
    state.store.insert_poll(&poll).await?;

    if !room::increment_poll_count(state, room_id).await? {
        // Another writer took the last slot outside this process.
        warn!(%room_id, poll_id = %poll.id, "poll: quota lost after insert, closing");
        state.store.close_poll(poll.id).await?;
        return Err(PollError::QuotaExceeded(room.max_polls));
    }

    info!(%room_id, poll_id = %poll.id, duration, "poll: created");
    Ok(poll)
}

/// Number of non-kicked students missing an answer on at least one open poll.
async fn pending_students(state: &AppState, room_id: &str) -> Result<usize, PollError> {
    let open = state.store.list_live_polls(room_id, state.now()).await?;
    if open.is_empty() {
        return Ok(0);
    }
    let students = state.store.list_students(room_id).await?;
    Ok(students
        .iter()
        .filter(|s| open.iter().any(|p| !p.has_answer_from(s.id)))
        .count())
}

// =============================================================================
// ANSWER / CLOSE
// =============================================================================

/// Record `user_id`'s choice of option index `option` on a live poll of
/// `room_id`. Polls of other rooms are reported as `NotFound`.
///
/// # Errors
///
/// `NotFound`, `NotActive`, `UserNotFound`, `DuplicateAnswer`, `InvalidOption`
/// in that order of precedence; store errors otherwise.
pub async fn submit_answer(
    state: &AppState,
    room_id: &str,
    poll_id: Uuid,
    user_id: Uuid,
    option: i64,
) -> Result<Answer, PollError> {
    let poll = state
        .store
        .find_poll(poll_id)
        .await?
        .filter(|p| p.room_id == room_id)
        .ok_or(PollError::NotFound)?;
    let now = state.now();
    if !poll.is_live(now) {
        return Err(PollError::NotActive);
    }
    let user = state.store.find_user(user_id).await?.ok_or(PollError::UserNotFound)?;
    if poll.has_answer_from(user_id) {
        return Err(PollError::DuplicateAnswer);
    }
    let index = usize::try_from(option).map_err(|_| PollError::InvalidOption)?;
    let option_text = poll.options.get(index).ok_or(PollError::InvalidOption)?;

    let answer = Answer {
        user_id,
        user_name: user.name,
        option: index,
        option_text: option_text.clone(),
        answered_at: now,
    };
    match state.store.push_answer(poll_id, &answer, now).await? {
        AnswerWrite::Appended => {
            info!(%poll_id, %user_id, option = index, "poll: answer recorded");
            Ok(answer)
        }
        AnswerWrite::Duplicate => Err(PollError::DuplicateAnswer),
        AnswerWrite::NotLive => Err(PollError::NotActive),
    }
}

/// Close a poll. Closing a closed poll is a no-op.
///
/// # Errors
///
/// `NotFound` if the poll does not exist.
pub async fn close_poll(state: &AppState, poll_id: Uuid) -> Result<(), PollError> {
    if !state.store.close_poll(poll_id).await? {
        return Err(PollError::NotFound);
    }
    info!(%poll_id, "poll: closed");
    Ok(())
}

/// Close every poll in the room whose deadline has passed.
///
/// # Errors
///
/// Store errors only.
pub async fn sweep_expired(state: &AppState, room_id: &str) -> Result<u64, PollError> {
    let closed = state.store.close_expired_polls(room_id, state.now()).await?;
    if closed > 0 {
        info!(%room_id, closed, "poll: swept expired");
    }
    Ok(closed)
}

// =============================================================================
// QUERIES
// =============================================================================

/// # Errors
///
/// `NotFound` if the poll does not exist.
pub async fn get_poll_results(state: &AppState, poll_id: Uuid) -> Result<PollResults, PollError> {
    let poll = state.store.find_poll(poll_id).await?.ok_or(PollError::NotFound)?;
    let results = tally(&poll, state.now());
    Ok(PollResults { poll, results })
}

/// Open polls, oldest first. Sweeps the room first.
///
/// # Errors
///
/// Store errors only.
pub async fn get_active_polls(state: &AppState, room_id: &str) -> Result<Vec<Poll>, PollError> {
    sweep_expired(state, room_id).await?;
    Ok(state.store.list_live_polls(room_id, state.now()).await?)
}

/// Every poll of the room, newest first.
///
/// # Errors
///
/// Store errors only.
pub async fn get_all_polls(state: &AppState, room_id: &str) -> Result<Vec<Poll>, PollError> {
    Ok(state.store.list_polls(room_id).await?)
}

/// Results of every poll of the room, newest first.
///
/// # Errors
///
/// Store errors only.
pub async fn get_all_poll_results(state: &AppState, room_id: &str) -> Result<Vec<PollResults>, PollError> {
    let now = state.now();
    Ok(get_all_polls(state, room_id)
        .await?
        .into_iter()
        .map(|poll| {
            let results = tally(&poll, now);
            PollResults { poll, results }
        })
        .collect())
}

/// Counts and percentages per poll, newest first, without per-user detail.
///
/// # Errors
///
/// Store errors only.
pub async fn get_poll_history(state: &AppState, room_id: &str) -> Result<Vec<PollHistoryEntry>, PollError> {
    Ok(get_all_polls(state, room_id)
        .await?
        .into_iter()
        .map(history_entry)
        .collect())
}

/// # Errors
///
/// `RoomNotFound` if the room does not exist.
pub async fn get_room_stats(state: &AppState, room_id: &str) -> Result<RoomStats, PollError> {
    let room = state.store.find_room(room_id).await?.ok_or(PollError::RoomNotFound)?;
    let total_polls = state.store.count_polls(room_id).await?;
    let active_polls = state.store.count_live_polls(room_id, state.now()).await?;
    let max = u64::try_from(room.max_polls).unwrap_or(0);
    Ok(RoomStats {
        total_polls,
        active_polls,
        max_polls: room.max_polls,
        remaining_polls: max.saturating_sub(total_polls),
    })
}

/// # Errors
///
/// `NotFound` if the poll does not exist.
pub async fn has_user_answered(state: &AppState, poll_id: Uuid, user_id: Uuid) -> Result<bool, PollError> {
    let poll = state.store.find_poll(poll_id).await?.ok_or(PollError::NotFound)?;
    Ok(poll.has_answer_from(user_id))
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
