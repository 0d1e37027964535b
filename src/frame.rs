//! Frame: the unit of every websocket exchange.
//!
//! ARCHITECTURE
//! ============
//! Clients send named events (`join`, `createPoll`, ...) and the server
//! answers with named events (`userJoined`, `pollResults`, ...). Both
//! directions share one envelope: an `event` name plus a JSON `data` payload.
//! The websocket handler routes on `event` and handler functions read their
//! inputs from `data` through the accessors below.
//!
//! DESIGN
//! ======
//! - Payloads are arbitrary JSON: objects for most events, arrays for list
//!   events (`activePolls`, `studentsList`), strings for `pollClosed`.
//! - Error events carry `{code, message}`; `code` is grepable.
//! - Inbound id lookups accept either `{"pollId": "..."}` or a bare string,
//!   since older clients emit the id directly.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Failure taxonomy shared by every service error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    PermissionDenied,
    QuotaExceeded,
    PendingAnswers,
    Banned,
    Conflict,
    Internal,
}

/// Grepable error code and taxonomy bucket for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn kind(&self) -> ErrorKind;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    /// Create an event frame carrying any serializable payload.
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: now_ms(),
            room_id: None,
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    /// Create an event frame with no payload.
    pub fn empty(event: impl Into<String>) -> Self {
        Self::new(event, serde_json::Value::Null)
    }

    /// Create an error event from a plain string.
    pub fn error(event: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self::new(event, serde_json::json!({ FRAME_CODE: code, FRAME_MESSAGE: message.into() }))
    }

    /// Create an error event from a typed error.
    pub fn error_from(event: impl Into<String>, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::error(event, err.error_code(), err.to_string())
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

impl Frame {
    /// String field from an object payload.
    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(serde_json::Value::as_str)
    }

    /// Id field from an object payload, or the payload itself when it is a bare string.
    #[must_use]
    pub fn data_id(&self, key: &str) -> Option<Uuid> {
        let raw = match &self.data {
            serde_json::Value::String(s) => Some(s.as_str()),
            other => other.get(key).and_then(serde_json::Value::as_str),
        };
        raw.and_then(|s| s.trim().parse().ok())
    }

    /// Error message on an error event, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.data_str(FRAME_MESSAGE)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
