//! Chat log: append-only per-room transcript.

use tracing::info;
use uuid::Uuid;

use crate::frame::{ErrorCode, ErrorKind};
use crate::models::{Message, User};
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message text is required")]
    Empty,
    #[error("Message exceeds {0} characters")]
    TooLong(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "E_MESSAGE_EMPTY",
            Self::TooLong(_) => "E_MESSAGE_TOO_LONG",
            Self::Store(_) => "E_STORE",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::Empty | Self::TooLong(_) => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Append a message from `sender` to its room.
///
/// # Errors
///
/// `Empty` or `TooLong` after trimming; store errors otherwise.
pub async fn append(state: &AppState, sender: &User, text: &str) -> Result<Message, ChatError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::Empty);
    }
    let max = state.config.max_message_len;
    if text.chars().count() > max {
        return Err(ChatError::TooLong(max));
    }

    let message = Message {
        id: Uuid::new_v4(),
        sender: sender.id,
        sender_name: sender.name.clone(),
        sender_role: sender.role,
        room_id: sender.room_id.clone(),
        text: text.to_string(),
        created_at: state.now(),
    };
    state.store.insert_message(&message).await?;
    Ok(message)
}

/// # Errors
///
/// Store errors only.
pub async fn history(state: &AppState, room_id: &str) -> Result<Vec<Message>, ChatError> {
    Ok(state.store.list_messages(room_id).await?)
}

/// # Errors
///
/// Store errors only.
pub async fn clear(state: &AppState, room_id: &str) -> Result<u64, ChatError> {
    let removed = state.store.delete_messages(room_id).await?;
    info!(%room_id, removed, "chat: cleared");
    Ok(removed)
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
