//! WebSocket handler: classroom event relay.
//!
//! DESIGN
//! ======
//! On upgrade, resolves the optional bearer token into an identity, attaches
//! an outbound channel to the presence registry, and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by event name
//! - Frames queued by peers (broadcasts, targeted deliveries) → forward
//!
//! Handler functions validate, check access, mutate state, and return an
//! `Outcome`. The dispatch layer owns the reply to the sender and the
//! session broadcast that follows.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with `connection_id` (+ `user_id`, `role`)
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / reply + broadcast / nothing)
//! 4. Close, or outbound channel detached by a kick → disconnect cleanup

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::Response;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::frame::{Data, ErrorCode, Frame, Status, ack};
use crate::services::attention::{self, Telemetry};
use crate::services::gate::{self, Access};
use crate::services::identity::Identity;
use crate::services::lifecycle::{self, Connection};
use crate::services::presence::Delivery;
use crate::state::AppState;
use crate::storage::TabSwitchEvent;

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Reply to sender, then broadcast a notification to the whole session.
    ReplyAndBroadcast { reply: Data, notice: Notice },
    /// Nothing goes back to the sender (signaling relay).
    Silent,
}

/// Server-originated session notification.
struct Notice {
    session_id: String,
    event: &'static str,
    data: Data,
}

#[derive(Debug, thiserror::Error)]
enum RouteError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("session_id required")]
    MissingSessionId,
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

impl ErrorCode for RouteError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "E_INVALID_PAYLOAD",
            Self::MissingSessionId => "E_MISSING_SESSION",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Deserialize)]
struct SessionRef {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
}

#[derive(Deserialize)]
struct LockModePayload {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    enabled: bool,
}

#[derive(Deserialize)]
struct StudentPayload {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(alias = "studentId")]
    student_id: String,
}

#[derive(Deserialize)]
struct AiUpdatePayload {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default, alias = "studentId")]
    student_id: Option<String>,
    #[serde(alias = "attentionScore")]
    attention_score: f64,
    status: String,
}

#[derive(Deserialize)]
struct TabSwitchPayload {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(default, alias = "wasBlocked")]
    was_blocked: bool,
}

#[derive(Deserialize)]
struct SignalRoute {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(alias = "targetId")]
    target_id: String,
}

/// Routing keys the relay strips before forwarding a signaling payload.
const SIGNAL_ROUTING_KEYS: [&str; 6] = ["target_id", "targetId", "session_id", "sessionId", "from_id", "fromId"];

fn parse_payload<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    let map: serde_json::Map<String, Value> = req.data.clone().into_iter().collect();
    serde_json::from_value(Value::Object(map))
        .map_err(|e| req.error_from(&RouteError::InvalidPayload(e.to_string())))
}

/// Payload `session_id`, else the frame's `session_id`, else the session the
/// connection is in.
fn resolve_session(req: &Frame, conn: &Connection, explicit: Option<String>) -> Result<String, Frame> {
    explicit
        .or_else(|| req.session_id.clone())
        .or_else(|| conn.session_id.clone())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| req.error_from(&RouteError::MissingSessionId))
}

/// Students may only act in a session this connection has joined.
async fn require_member(
    state: &AppState,
    conn: &Connection,
    req: &Frame,
    identity: &Identity,
    session_id: &str,
) -> Result<(), Frame> {
    let registered = state.presence.read().await.lookup(session_id, &identity.user_id);
    gate::check(Some(identity), Access::Member { registered, connection_id: conn.id })
        .map(|_| ())
        .map_err(|e| req.error_from(&e))
}

// =============================================================================
// UPGRADE
// =============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
}

/// Credentials are optional at upgrade time. A missing or invalid token
/// yields an unauthenticated connection whose guarded requests are refused.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params.get("token").cloned().or_else(|| bearer_token(&headers));
    let identity = match token.as_deref() {
        Some(token) if !token.is_empty() => state.identity.verify(token).await,
        _ => None,
    };
    if token.is_some() && identity.is_none() {
        warn!("ws: credential rejected, connecting unauthenticated");
    }

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Option<Identity>) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.client_channel_capacity);
    let mut conn = lifecycle::connect(&state, identity, client_tx).await;

    let mut welcome = Frame::request("connected", Data::new()).with_data("connection_id", conn.id.to_string());
    if let Some(identity) = &conn.identity {
        welcome = welcome
            .with_data("user_id", identity.user_id.clone())
            .with_data("role", identity.role.as_str());
    }
    if send_frame(&mut socket, &welcome).await.is_err() {
        lifecycle::disconnect(&state, &mut conn).await;
        return;
    }

    info!(
        connection_id = %conn.id,
        user_id = conn.identity.as_ref().map_or("-", |i| i.user_id.as_str()),
        "ws: client connected"
    );

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, &mut conn, text.as_str()).await {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            outbound = client_rx.recv() => {
                // Sender detached (kick): queued frames are drained, then close.
                let Some(frame) = outbound else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    lifecycle::disconnect(&state, &mut conn).await;
    info!(connection_id = %conn.id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

fn is_high_volume(event: &str) -> bool {
    matches!(event, "ai_update" | "webrtc_ice_candidate")
}

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Transport stays in `run_ws`; tests drive this directly with a
/// hand-built [`Connection`].
async fn process_inbound_text(state: &AppState, conn: &mut Connection, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(connection_id = %conn.id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Clients only originate requests; nothing on the server awaits a reply.
    if req.status.is_terminal() {
        debug!(connection_id = %conn.id, id = %req.id, event = %req.event, "ws: dropping terminal frame from client");
        return vec![];
    }

    // Stamp the authenticated user as `from`; never trust the client's value.
    req.from = conn.identity.as_ref().map(|i| i.user_id.clone());

    if is_high_volume(&req.event) {
        debug!(connection_id = %conn.id, id = %req.id, event = %req.event, "ws: recv frame");
    } else {
        info!(
            connection_id = %conn.id,
            phase = ?conn.phase(),
            id = %req.id,
            event = %req.event,
            status = ?req.status,
            "ws: recv frame"
        );
    }

    let result = match req.event.as_str() {
        "join_session" => handle_join(state, conn, &req).await,
        "leave_session" => handle_leave(state, conn, &req).await,
        "toggle_lockmode" => handle_lockmode(state, conn, &req).await,
        "mute_student" => handle_moderation(state, conn, &req, Moderation::Mute).await,
        "camera_off_student" => handle_moderation(state, conn, &req, Moderation::CameraOff).await,
        "kick_student" => handle_moderation(state, conn, &req, Moderation::Kick).await,
        "ai_update" => handle_ai_update(state, conn, &req).await,
        "tab_switch" => handle_tab_switch(state, conn, &req).await,
        "session_ended" => handle_session_ended(state, conn, &req).await,
        "webrtc_offer" | "webrtc_answer" | "webrtc_ice_candidate" => handle_signal(state, conn, &req).await,
        other => Err(req.error_from(&RouteError::UnknownEvent(other.to_owned()))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::ReplyAndBroadcast { reply, notice }) => {
            let frame = Frame::request(notice.event, notice.data).with_session_id(notice.session_id.clone());
            state.presence.read().await.broadcast(&notice.session_id, &frame, None);
            vec![req.done_with(reply)]
        }
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// LIFECYCLE HANDLERS
// =============================================================================

async fn handle_join(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let payload: SessionRef = parse_payload(req)?;
    let session_id = payload
        .session_id
        .or_else(|| req.session_id.clone())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| req.error_from(&RouteError::MissingSessionId))?;

    lifecycle::join_session(state, conn, &session_id)
        .await
        .map_err(|e| req.error_from(&e))?;

    let mut reply = ack("joined");
    reply.insert("session_id".into(), json!(session_id));
    Ok(Outcome::Reply(reply))
}

async fn handle_leave(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    let payload: SessionRef = parse_payload(req)?;
    let requested = payload.session_id.or_else(|| req.session_id.clone());

    lifecycle::leave_session(state, conn, requested.as_deref())
        .await
        .map_err(|e| req.error_from(&e))?;

    Ok(Outcome::Reply(ack("left")))
}

async fn handle_session_ended(state: &AppState, conn: &mut Connection, req: &Frame) -> Result<Outcome, Frame> {
    gate::check(conn.identity.as_ref(), Access::Teacher).map_err(|e| req.error_from(&e))?;
    let payload: SessionRef = parse_payload(req)?;
    let session_id = resolve_session(req, conn, payload.session_id)?;

    lifecycle::end_session(state, conn, &session_id).await;

    if let Err(e) = state.storage.end_room(&session_id, OffsetDateTime::now_utc()).await {
        error!(%session_id, error = %e, "ws: failed to mark room ended");
    }

    Ok(Outcome::Reply(ack("ended")))
}

// =============================================================================
// TEACHER CONTROLS
// =============================================================================

async fn handle_lockmode(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    gate::check(conn.identity.as_ref(), Access::Teacher).map_err(|e| req.error_from(&e))?;
    let payload: LockModePayload = parse_payload(req)?;
    let session_id = resolve_session(req, conn, payload.session_id)?;

    if let Err(e) = state.storage.set_lock_mode(&session_id, payload.enabled).await {
        error!(%session_id, enabled = payload.enabled, error = %e, "ws: failed to persist lock mode");
    }
    // Live flag is mirrored after the stored one.
    state.presence.write().await.set_lock_mode(&session_id, payload.enabled);

    let mut data = Data::new();
    data.insert("session_id".into(), json!(session_id));
    data.insert("enabled".into(), json!(payload.enabled));
    Ok(Outcome::ReplyAndBroadcast {
        reply: ack("broadcasted"),
        notice: Notice { session_id, event: "lockmode_changed", data },
    })
}

#[derive(Debug, Clone, Copy)]
enum Moderation {
    Mute,
    CameraOff,
    Kick,
}

impl Moderation {
    fn notice(self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::Mute => ("student_muted", Some("muted")),
            Self::CameraOff => ("camera_off", Some("camera_off")),
            Self::Kick => ("student_kicked", None),
        }
    }

    fn reply_label(self) -> &'static str {
        match self {
            Self::Kick => "kicked",
            Self::Mute | Self::CameraOff => "sent",
        }
    }
}

/// Targeted teacher action. An absent student is a benign miss. A kick
/// detaches a present target's outbound channel even when `student_kicked`
/// could not be queued, so its socket closes after flushing what it has.
async fn handle_moderation(
    state: &AppState,
    conn: &Connection,
    req: &Frame,
    action: Moderation,
) -> Result<Outcome, Frame> {
    gate::check(conn.identity.as_ref(), Access::Teacher).map_err(|e| req.error_from(&e))?;
    let payload: StudentPayload = parse_payload(req)?;
    let session_id = resolve_session(req, conn, payload.session_id)?;

    let (event, flag) = action.notice();
    let mut frame = Frame::request(event, Data::new())
        .with_session_id(session_id.clone())
        .with_data("session_id", session_id.clone())
        .with_data("student_id", payload.student_id.clone());
    if let Some(flag) = flag {
        frame = frame.with_data(flag, true);
    }

    let delivery = {
        let mut presence = state.presence.write().await;
        presence.lookup(&session_id, &payload.student_id).map(|target| {
            let delivery = presence.send_to(target, &frame);
            if matches!(action, Moderation::Kick) {
                presence.detach(target);
            }
            delivery
        })
    };

    let label = match delivery {
        Some(Delivery::Dropped) => {
            warn!(%session_id, student_id = %payload.student_id, ?action, "ws: moderation notice dropped, target queue full");
            action.reply_label()
        }
        Some(_) => action.reply_label(),
        None => "not_delivered",
    };
    info!(%session_id, student_id = %payload.student_id, ?action, label, "ws: moderation");
    Ok(Outcome::Reply(ack(label)))
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// Persist the reading, advance the status timeline, and broadcast the update
/// whether or not the status changed.
async fn handle_ai_update(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let identity = gate::check(conn.identity.as_ref(), Access::Authenticated).map_err(|e| req.error_from(&e))?;
    let payload: AiUpdatePayload = parse_payload(req)?;
    let student_id = payload.student_id.unwrap_or_else(|| identity.user_id.clone());
    gate::check(Some(identity), Access::OnBehalfOf(&student_id)).map_err(|e| req.error_from(&e))?;
    let session_id = resolve_session(req, conn, payload.session_id)?;
    require_member(state, conn, req, identity, &session_id).await?;

    let telemetry = Telemetry::new(&session_id, &student_id, payload.attention_score, &payload.status)
        .map_err(|e| req.error_from(&e))?;
    let outcome = attention::record(state.storage.as_ref(), &telemetry, OffsetDateTime::now_utc()).await;

    let mut reply = ack("broadcasted");
    reply.insert("transitioned".into(), json!(outcome.transition.is_some()));
    reply.insert("persisted".into(), json!(outcome.persisted()));

    let mut data = Data::new();
    data.insert("student_id".into(), json!(student_id));
    data.insert("attention_score".into(), json!(telemetry.score));
    data.insert("status".into(), json!(telemetry.status.as_str()));
    Ok(Outcome::ReplyAndBroadcast {
        reply,
        notice: Notice { session_id, event: "attention_update", data },
    })
}

async fn handle_tab_switch(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let identity = gate::check(conn.identity.as_ref(), Access::Authenticated).map_err(|e| req.error_from(&e))?;
    let payload: TabSwitchPayload = parse_payload(req)?;
    let session_id = resolve_session(req, conn, payload.session_id)?;
    require_member(state, conn, req, identity, &session_id).await?;
    let student_id = identity.user_id.clone();

    let live = state.presence.read().await.lock_mode(&session_id);
    let lock_mode_active = match live {
        Some(enabled) => enabled,
        None => stored_lock_mode(state, &session_id).await,
    };
    let event = TabSwitchEvent {
        session_id: session_id.clone(),
        student_id: student_id.clone(),
        timestamp: OffsetDateTime::now_utc(),
        lock_mode_active,
        was_blocked: payload.was_blocked,
    };
    if let Err(e) = state.storage.append_tab_switch(&event).await {
        error!(%session_id, %student_id, error = %e, "ws: failed to persist tab switch");
    }

    let mut data = Data::new();
    data.insert("student_id".into(), json!(student_id));
    data.insert("was_blocked".into(), json!(payload.was_blocked));
    data.insert("lock_mode_active".into(), json!(lock_mode_active));
    Ok(Outcome::ReplyAndBroadcast {
        reply: ack("logged"),
        notice: Notice { session_id, event: "tab_switch_event", data },
    })
}

/// Room flag from storage, for sessions whose live flag was never set.
async fn stored_lock_mode(state: &AppState, session_id: &str) -> bool {
    match state.storage.find_room(session_id).await {
        Ok(room) => room.is_some_and(|r| r.lock_mode_enabled),
        Err(e) => {
            error!(%session_id, error = %e, "ws: failed to read room lock mode");
            false
        }
    }
}

// =============================================================================
// SIGNALING
// =============================================================================

/// Opaque relay. Only the routing keys are read; everything else is
/// forwarded untouched with `from_id` stamped from the sender's identity.
async fn handle_signal(state: &AppState, conn: &Connection, req: &Frame) -> Result<Outcome, Frame> {
    let identity = gate::check(conn.identity.as_ref(), Access::Authenticated).map_err(|e| req.error_from(&e))?;
    let route: SignalRoute = parse_payload(req)?;
    let session_id = resolve_session(req, conn, route.session_id)?;
    require_member(state, conn, req, identity, &session_id).await?;

    let mut data = req.data.clone();
    for key in SIGNAL_ROUTING_KEYS {
        data.remove(key);
    }
    data.insert("from_id".into(), json!(identity.user_id));

    let frame = Frame::request(req.event.clone(), data)
        .with_session_id(session_id.clone())
        .with_from(identity.user_id.clone());
    let delivery = state
        .presence
        .read()
        .await
        .send_to_user(&session_id, &route.target_id, &frame);
    if !delivery.is_delivered() {
        debug!(?delivery, %session_id, target_id = %route.target_id, event = %req.event, "ws: signal not delivered");
    }

    Ok(Outcome::Silent)
}

// =============================================================================
// TRANSPORT
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let message = frame.data.get("error").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(id = %frame.id, event = %frame.event, code, message, "ws: send frame status=Error");
    } else if is_high_volume(&frame.event) || frame.event == "attention_update" {
        debug!(id = %frame.id, event = %frame.event, "ws: send frame");
    } else {
        info!(id = %frame.id, event = %frame.event, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
