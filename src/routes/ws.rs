//! WebSocket handler: the session coordinator.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID, registers it with the hub and enters
//! a `select!` loop:
//! - Incoming client frames → parse + dispatch by event name
//! - Frames queued by the hub (room fan-out, kicks) → forward to client
//!
//! Each connection owns a `Session` (client ID + the user bound by `join`)
//! and threads it through every handler. Handler functions validate,
//! authorize, call services and return a list of `Delivery` values; they
//! never send frames themselves. The dispatch layer applies the deliveries:
//! replies go straight down the socket, everything else through the hub.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `clientId`
//! 2. Client sends frames → dispatch under the request timeout
//! 3. Dispatch applies deliveries (reply / room / one client / disconnect)
//! 4. Close → `studentDisconnected` to the room (students only) → unregister

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, ErrorKind, FRAME_CODE, Frame};
use crate::models::{ConnId, Role, User};
use crate::services::hub::{self, Outbound};
use crate::services::poll::{self, NewPoll, PollError, RoomStats};
use crate::services::user::{self, JoinRequest};
use crate::services::{chat, room};
use crate::state::AppState;

// =============================================================================
// SESSION / DELIVERY
// =============================================================================

/// Per-connection context, owned by the connection task.
#[derive(Debug, Clone)]
pub struct Session {
    pub client_id: ConnId,
    /// Bound on a successful `join`.
    pub user: Option<User>,
}

impl Session {
    #[must_use]
    pub fn new(client_id: ConnId) -> Self {
        Self { client_id, user: None }
    }

    fn room_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.room_id.as_str())
    }
}

/// Who receives a frame produced by a handler.
#[derive(Debug)]
enum Delivery {
    /// The requesting connection only.
    ToSender(Frame),
    /// Every connection in the sender's room, sender included.
    ToRoom(Frame),
    /// One specific connection.
    ToClient(ConnId, Frame),
    /// Force-close another connection.
    Disconnect(ConnId),
    /// Close the requesting connection after its queued frames.
    CloseSelf,
}

/// Protocol-level failures that are not owned by any service.
#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("invalid json: {0}")]
    InvalidFrame(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("User not authenticated")]
    NotJoined,
    #[error("Only teachers can {0}")]
    NotTeacher(&'static str),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("role must be teacher or student")]
    InvalidRole,
    #[error("request timed out")]
    Timeout,
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "E_INVALID_FRAME",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::NotJoined => "E_NOT_JOINED",
            Self::NotTeacher(_) => "E_PERMISSION_DENIED",
            Self::MissingField(_) | Self::InvalidRole => "E_VALIDATION",
            Self::Timeout => "E_TIMEOUT",
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFrame(_) | Self::UnknownEvent(_) | Self::MissingField(_) | Self::InvalidRole => {
                ErrorKind::Validation
            }
            Self::NotJoined | Self::NotTeacher(_) => ErrorKind::PermissionDenied,
            Self::Timeout => ErrorKind::Internal,
        }
    }
}

type HandlerResult = Result<Vec<Delivery>, Frame>;

/// `roomInfo` payload: room identity plus current stats.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomInfo {
    room_id: String,
    teacher_name: String,
    #[serde(flatten)]
    stats: RoomStats,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let (client_tx, mut client_rx) = mpsc::channel::<Outbound>(state.config.client_channel_capacity);
    hub::register(&state, client_id, client_tx).await;

    let mut session = Session::new(client_id);
    let welcome = Frame::new("connected", serde_json::json!({ "clientId": client_id }));
    if send_frame(&mut socket, &welcome).await.is_err() {
        finish_session(&state, &session).await;
        return;
    }
    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut session, &text).await;
                        if !flush(&mut socket, replies).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(outbound) = client_rx.recv() => {
                if !flush(&mut socket, vec![outbound]).await {
                    break;
                }
            }
        }
    }

    finish_session(&state, &session).await;
    info!(%client_id, "ws: client disconnected");
}

/// Write outbound items to the socket. Returns `false` when the connection
/// should end (write failure or an explicit close).
async fn flush(socket: &mut WebSocket, items: Vec<Outbound>) -> bool {
    for item in items {
        match item {
            Outbound::Frame(frame) => {
                if send_frame(socket, &frame).await.is_err() {
                    return false;
                }
            }
            Outbound::Close => {
                let _ = socket.send(Message::Close(None)).await;
                return false;
            }
        }
    }
    true
}

/// Tell the room a student left, then drop the connection from the hub.
async fn finish_session(state: &AppState, session: &Session) {
    if let Some(user) = session.user.as_ref().filter(|u| u.role == Role::Student) {
        let frame = Frame::new("studentDisconnected", serde_json::json!({ "name": user.name, "userId": user.id }));
        hub::emit_to_room(state, &user.room_id, &frame, Some(session.client_id)).await;
    }
    hub::unregister(state, session.client_id).await;
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return what goes back down
/// this connection's socket. Fan-out to other connections happens here too.
pub(crate) async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Outbound> {
    let client_id = session.client_id;
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = SessionError::InvalidFrame(e.to_string());
            return vec![Outbound::Frame(Frame::error_from("error", &err))];
        }
    };
    info!(%client_id, id = %req.id, event = %req.event, "ws: recv frame");

    let result = match timeout(state.config.request_timeout, dispatch(state, session, &req)).await {
        Ok(result) => result,
        Err(_) => Err(fail(error_event_for(&req.event), &SessionError::Timeout)),
    };
    let deliveries = result.unwrap_or_else(|err_frame| vec![Delivery::ToSender(err_frame)]);
    apply(state, session, deliveries).await
}

async fn dispatch(state: &AppState, session: &mut Session, req: &Frame) -> HandlerResult {
    match req.event.as_str() {
        "join" => handle_join(state, session, req).await,
        "createPoll" => handle_create_poll(state, session, req).await,
        "submitAnswer" => handle_submit_answer(state, session, req).await,
        "getPollResults" => handle_get_poll_results(state, session, req).await,
        "closePoll" => handle_close_poll(state, session, req).await,
        "getAllPolls" => handle_get_all_polls(state, session).await,
        "sendMessage" => handle_send_message(state, session, req).await,
        "clearMessages" => handle_clear_messages(state, session).await,
        "kickStudent" => handle_kick_student(state, session, req).await,
        other => Err(fail("error", &SessionError::UnknownEvent(other.to_string()))),
    }
}

/// Apply deliveries. Frames for the sender are returned in order; the room
/// copy for the sender is returned too so it stays ordered with replies.
async fn apply(state: &AppState, session: &Session, deliveries: Vec<Delivery>) -> Vec<Outbound> {
    let client_id = session.client_id;
    let mut out = Vec::new();
    for delivery in deliveries {
        match delivery {
            Delivery::ToSender(frame) => out.push(Outbound::Frame(frame)),
            Delivery::ToRoom(frame) => match session.room_id() {
                Some(room_id) => {
                    hub::emit_to_room(state, room_id, &frame, Some(client_id)).await;
                    out.push(Outbound::Frame(frame.with_room_id(room_id)));
                }
                None => out.push(Outbound::Frame(frame)),
            },
            Delivery::ToClient(target, frame) if target == client_id => out.push(Outbound::Frame(frame)),
            Delivery::ToClient(target, frame) => {
                hub::emit_to_client(state, target, frame).await;
            }
            Delivery::Disconnect(target) if target == client_id => out.push(Outbound::Close),
            Delivery::Disconnect(target) => hub::disconnect(state, target).await,
            Delivery::CloseSelf => out.push(Outbound::Close),
        }
    }
    out
}

/// Error event name for failures of an inbound event.
fn error_event_for(event: &str) -> &'static str {
    match event {
        "join" => "joinError",
        "createPoll" => "pollError",
        "submitAnswer" => "answerError",
        _ => "error",
    }
}

fn fail(event: &str, err: &(impl ErrorCode + ?Sized)) -> Frame {
    if err.kind() == ErrorKind::Internal {
        error!(code = err.error_code(), error = %err, "ws: internal failure");
    }
    Frame::error_from(event, err)
}

fn require_user(session: &Session) -> Result<&User, Frame> {
    session.user.as_ref().ok_or_else(|| fail("error", &SessionError::NotJoined))
}

fn require_teacher<'a>(session: &'a Session, action: &'static str) -> Result<&'a User, Frame> {
    match &session.user {
        Some(user) if user.role == Role::Teacher => Ok(user),
        _ => Err(fail("error", &SessionError::NotTeacher(action))),
    }
}

/// `kicked` + close for a user whose ban status blocks the action.
async fn ban_gate(state: &AppState, user: &User, error_event: &str) -> Result<Option<Vec<Delivery>>, Frame> {
    let status = user::check_ban_status(state, user.id, &user.room_id)
        .await
        .map_err(|e| fail(error_event, &e))?;
    if !status.banned {
        return Ok(None);
    }
    let message = status.reason.unwrap_or_else(|| "You are banned from this room".into());
    info!(user_id = %user.id, room_id = %user.room_id, %message, "ws: banned user blocked");
    Ok(Some(vec![
        Delivery::ToSender(Frame::new("kicked", serde_json::json!({ "message": message }))),
        Delivery::CloseSelf,
    ]))
}

// =============================================================================
// JOIN
// =============================================================================

async fn handle_join(state: &AppState, session: &mut Session, req: &Frame) -> HandlerResult {
    const EV: &str = "joinError";

    let name = req.data_str("name").unwrap_or_default().to_string();
    let role = req
        .data_str("role")
        .and_then(Role::from_str)
        .ok_or_else(|| fail(EV, &SessionError::InvalidRole))?;
    let room_id = req
        .data_str("roomId")
        .map(str::to_string)
        .or_else(|| req.room_id.clone());

    let joined = user::join_or_reconnect(state, JoinRequest { name, role, room_id }, session.client_id)
        .await
        .map_err(|e| fail(EV, &e))?;
    let room_id = joined.room_id.as_str();

    let mut out = vec![Delivery::ToSender(Frame::new("userJoined", &joined))];

    let teacher_name = room::get_room_info(state, room_id)
        .await
        .map_err(|e| fail(EV, &e))?
        .map(|r| r.teacher_name)
        .unwrap_or_default();
    let stats = poll::get_room_stats(state, room_id)
        .await
        .map_err(|e| fail(EV, &e))?;
    let info = RoomInfo { room_id: room_id.to_string(), teacher_name, stats };
    out.push(Delivery::ToSender(Frame::new("roomInfo", info)));

    let active = poll::get_active_polls(state, room_id)
        .await
        .map_err(|e| fail(EV, &e))?;
    out.push(Delivery::ToSender(Frame::new("activePolls", &active)));

    if joined.role == Role::Teacher {
        let students = user::list_students(state, room_id)
            .await
            .map_err(|e| fail(EV, &e))?;
        out.push(Delivery::ToSender(Frame::new("studentsList", students)));
        for p in &active {
            let results = poll::get_poll_results(state, p.id)
                .await
                .map_err(|e| fail(EV, &e))?;
            out.push(Delivery::ToSender(Frame::new("pollResults", results)));
        }
    }

    let history = chat::history(state, room_id).await.map_err(|e| fail(EV, &e))?;
    out.push(Delivery::ToSender(Frame::new("chatHistory", history)));

    if joined.role == Role::Student {
        let teacher = user::get_teacher(state, room_id)
            .await
            .map_err(|e| fail(EV, &e))?;
        if let Some(teacher_socket) = teacher.and_then(|t| t.socket_id) {
            let students = user::list_students(state, room_id)
                .await
                .map_err(|e| fail(EV, &e))?;
            out.push(Delivery::ToClient(teacher_socket, Frame::new("studentJoined", &joined)));
            out.push(Delivery::ToClient(teacher_socket, Frame::new("studentsList", students)));
        }
    }

    // Bind only once every bootstrap read succeeded.
    hub::join_room(state, session.client_id, room_id).await;
    info!(user_id = %joined.id, role = joined.role.as_str(), %room_id, "ws: joined room");
    session.user = Some(joined);
    Ok(out)
}

// =============================================================================
// POLL HANDLERS
// =============================================================================

/// Integer option index from a number or numeric string; -1 when absent.
fn option_index(req: &Frame) -> i64 {
    match req.data.get("option") {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

async fn handle_create_poll(state: &AppState, session: &Session, req: &Frame) -> HandlerResult {
    const EV: &str = "pollError";
    let teacher = require_teacher(session, "create polls")?;

    let options = req
        .data
        .get("options")
        .and_then(serde_json::Value::as_array)
        .map(|opts| opts.iter().map(|o| o.as_str().unwrap_or_default().to_string()).collect())
        .unwrap_or_default();
    let duration = req.data.get("duration").and_then(|d| match d {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    });
    let new = NewPoll {
        question: req.data_str("question").unwrap_or_default().to_string(),
        options,
        duration,
        room_id: teacher.room_id.clone(),
        created_by: teacher.id,
    };

    let created = poll::create_poll(state, new).await.map_err(|e| fail(EV, &e))?;
    let stats = poll::get_room_stats(state, &teacher.room_id)
        .await
        .map_err(|e| fail(EV, &e))?;
    let results = poll::get_poll_results(state, created.id)
        .await
        .map_err(|e| fail(EV, &e))?;

    Ok(vec![
        Delivery::ToRoom(Frame::new("newPoll", &created)),
        Delivery::ToRoom(Frame::new("roomStats", stats)),
        Delivery::ToSender(Frame::new("pollResults", results)),
    ])
}

async fn handle_submit_answer(state: &AppState, session: &Session, req: &Frame) -> HandlerResult {
    const EV: &str = "answerError";
    let user = require_user(session)?;
    if let Some(blocked) = ban_gate(state, user, EV).await? {
        return Ok(blocked);
    }

    let poll_id = req.data_id("pollId").ok_or_else(|| fail(EV, &PollError::NotFound))?;
    poll::submit_answer(state, &user.room_id, poll_id, user.id, option_index(req))
        .await
        .map_err(|e| fail(EV, &e))?;
    let results = poll::get_poll_results(state, poll_id)
        .await
        .map_err(|e| fail(EV, &e))?;

    let mut out = vec![
        Delivery::ToSender(Frame::new(
            "answerSubmitted",
            serde_json::json!({ "pollId": poll_id, "message": "Answer submitted successfully!" }),
        )),
        Delivery::ToSender(Frame::new("pollResults", &results)),
    ];
    let teacher = user::get_teacher(state, &user.room_id)
        .await
        .map_err(|e| fail(EV, &e))?;
    if let Some(teacher_socket) = teacher.and_then(|t| t.socket_id) {
        if teacher_socket != session.client_id {
            out.push(Delivery::ToClient(teacher_socket, Frame::new("pollResults", results)));
        }
    }
    Ok(out)
}

/// Results of a poll in the teacher's own room.
async fn room_poll_results(state: &AppState, teacher: &User, req: &Frame) -> Result<poll::PollResults, Frame> {
    let poll_id = req.data_id("pollId").ok_or_else(|| fail("error", &SessionError::MissingField("pollId")))?;
    let results = poll::get_poll_results(state, poll_id)
        .await
        .map_err(|e| fail("error", &e))?;
    if results.poll.room_id != teacher.room_id {
        return Err(fail("error", &PollError::NotFound));
    }
    Ok(results)
}

async fn handle_get_poll_results(state: &AppState, session: &Session, req: &Frame) -> HandlerResult {
    let teacher = require_teacher(session, "view results")?;
    let results = room_poll_results(state, teacher, req).await?;
    Ok(vec![Delivery::ToSender(Frame::new("pollResults", results))])
}

async fn handle_close_poll(state: &AppState, session: &Session, req: &Frame) -> HandlerResult {
    let teacher = require_teacher(session, "close polls")?;
    let poll_id = room_poll_results(state, teacher, req).await?.poll.id;

    poll::close_poll(state, poll_id).await.map_err(|e| fail("error", &e))?;
    let results = poll::get_poll_results(state, poll_id)
        .await
        .map_err(|e| fail("error", &e))?;

    Ok(vec![
        Delivery::ToRoom(Frame::new("pollClosed", poll_id.to_string())),
        Delivery::ToRoom(Frame::new("pollResults", results)),
    ])
}

async fn handle_get_all_polls(state: &AppState, session: &Session) -> HandlerResult {
    let teacher = require_teacher(session, "view all polls")?;
    let all = poll::get_all_poll_results(state, &teacher.room_id)
        .await
        .map_err(|e| fail("error", &e))?;
    Ok(vec![Delivery::ToSender(Frame::new("allPolls", all))])
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_send_message(state: &AppState, session: &Session, req: &Frame) -> HandlerResult {
    let user = require_user(session)?;
    if let Some(blocked) = ban_gate(state, user, "error").await? {
        return Ok(blocked);
    }

    let text = req.data_str("text").unwrap_or_default();
    let message = chat::append(state, user, text)
        .await
        .map_err(|e| fail("error", &e))?;
    Ok(vec![Delivery::ToRoom(Frame::new("newMessage", message))])
}

async fn handle_clear_messages(state: &AppState, session: &Session) -> HandlerResult {
    let teacher = require_teacher(session, "clear messages")?;
    chat::clear(state, &teacher.room_id)
        .await
        .map_err(|e| fail("error", &e))?;
    Ok(vec![Delivery::ToRoom(Frame::empty("messagesCleared"))])
}

// =============================================================================
// MODERATION HANDLERS
// =============================================================================

async fn handle_kick_student(state: &AppState, session: &Session, req: &Frame) -> HandlerResult {
    let teacher = require_teacher(session, "kick students")?;
    let student_id = req
        .data_id("studentId")
        .ok_or_else(|| fail("error", &SessionError::MissingField("studentId")))?;

    let kicked = user::kick(state, student_id, &teacher.room_id)
        .await
        .map_err(|e| fail("error", &e))?;

    let mut out = Vec::new();
    if let Some(prior) = kicked.prior_socket {
        let notice = Frame::new(
            "kicked",
            serde_json::json!({
                "message": "You have been removed from the room",
                "banDuration": state.config.ban_duration_minutes,
            }),
        );
        out.push(Delivery::ToClient(prior, notice));
        out.push(Delivery::Disconnect(prior));
    }

    let students = user::list_students(state, &teacher.room_id)
        .await
        .map_err(|e| fail("error", &e))?;
    out.push(Delivery::ToSender(Frame::new("studentsList", students)));
    Ok(out)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if let Some(code) = frame.data.get(FRAME_CODE).and_then(serde_json::Value::as_str) {
        let message = frame.message().unwrap_or("-");
        warn!(id = %frame.id, event = %frame.event, code, message, "ws: send error frame");
    } else {
        info!(id = %frame.id, event = %frame.event, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
