//! Connection lifecycle: connect, join, leave, session end, disconnect.
//!
//! DESIGN
//! ======
//! A [`Connection`] is owned by its websocket task. Its phase is derived from
//! what it carries: no identity is `Unauthenticated`, an identity without a
//! session is `Authenticated`, an identity with a session is `InSession`.
//!
//! Each transition takes the presence write guard once and performs the
//! registry mutation and the matching notification under it. Sends are
//! non-blocking `try_send`, so nothing awaits while the guard is held, and a
//! peer reacting to `student_joined` always finds the newcomer registered.
//!
//! Disconnect is idempotent: the registry decides what to clean up, so an
//! explicit leave followed by a transport close runs the second pass as a
//! no-op.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame};
use crate::services::gate::{self, Access, AccessError};
use crate::services::identity::Identity;
use crate::services::presence::{Delivery, PresenceKey, PresenceRegistry};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Authenticated,
    InSession,
}

/// Per-socket connection state.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub identity: Option<Identity>,
    /// Session this connection joined last, if any.
    pub session_id: Option<String>,
}

impl Connection {
    #[must_use]
    pub fn new(identity: Option<Identity>) -> Self {
        Self { id: Uuid::new_v4(), identity, session_id: None }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        match (&self.identity, &self.session_id) {
            (None, _) => Phase::Unauthenticated,
            (Some(_), None) => Phase::Authenticated,
            (Some(_), Some(_)) => Phase::InSession,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("not in session")]
    NotInSession,
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Access(e) => e.error_code(),
            Self::NotInSession => "E_NOT_IN_SESSION",
        }
    }
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

fn participant_frame(event: &str, session_id: &str, user_id: &str) -> Frame {
    let mut data = Data::new();
    data.insert("user_id".into(), json!(user_id));
    data.insert("session_id".into(), json!(session_id));
    Frame::request(event, data).with_session_id(session_id)
}

/// Unregister `(session_id, user_id)` if this connection still owns the entry,
/// then tell the remaining members. A stale connection leaving must not evict
/// the participant's newer connection.
fn part(presence: &mut PresenceRegistry, session_id: &str, user_id: &str, connection_id: Uuid) -> bool {
    if presence.lookup(session_id, user_id) != Some(connection_id) {
        return false;
    }
    presence.unregister(session_id, user_id);
    presence.broadcast(session_id, &participant_frame("student_left", session_id, user_id), None);
    true
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// New connection. Attaches its outbound channel; identity may be absent.
pub async fn connect(state: &AppState, identity: Option<Identity>, tx: tokio::sync::mpsc::Sender<Frame>) -> Connection {
    let conn = Connection::new(identity);
    state.presence.write().await.attach(conn.id, tx);
    conn
}

/// Enter a session. Rejoining the same session re-registers; joining a
/// different one parts the old session first.
///
/// # Errors
///
/// [`SessionError::Access`] when the connection is unauthenticated.
pub async fn join_session(state: &AppState, conn: &mut Connection, session_id: &str) -> Result<(), SessionError> {
    let identity = gate::check(conn.identity.as_ref(), Access::Authenticated)?;
    let user_id = identity.user_id.clone();
    let role = identity.role;

    {
        let mut presence = state.presence.write().await;

        if let Some(old) = conn.session_id.as_deref().filter(|old| *old != session_id) {
            part(&mut presence, old, &user_id, conn.id);
        }

        if let Some(stale) = presence.register(session_id, &user_id, conn.id) {
            info!(%session_id, %user_id, %stale, connection_id = %conn.id, "presence: rejoin replaced stale connection");
        }

        let joined = participant_frame("student_joined", session_id, &user_id).with_data("role", role.as_str());
        presence.broadcast(session_id, &joined, Some(conn.id));
    }

    conn.session_id = Some(session_id.to_owned());
    info!(%session_id, %user_id, connection_id = %conn.id, "lifecycle: joined session");
    Ok(())
}

/// Leave the current session. `session_id`, when given, must name it.
///
/// # Errors
///
/// [`SessionError::Access`] when unauthenticated, [`SessionError::NotInSession`]
/// when the connection is not in (that) session.
pub async fn leave_session(state: &AppState, conn: &mut Connection, session_id: Option<&str>) -> Result<(), SessionError> {
    let identity = gate::check(conn.identity.as_ref(), Access::Authenticated)?;
    let user_id = identity.user_id.clone();

    let Some(current) = conn.session_id.clone() else {
        return Err(SessionError::NotInSession);
    };
    if session_id.is_some_and(|requested| requested != current) {
        return Err(SessionError::NotInSession);
    }

    {
        let mut presence = state.presence.write().await;
        part(&mut presence, &current, &user_id, conn.id);
    }

    conn.session_id = None;
    info!(session_id = %current, %user_id, connection_id = %conn.id, "lifecycle: left session");
    Ok(())
}

/// End a session: notify every member, then clear the session's presence.
/// Returns how many connections were notified.
pub async fn end_session(state: &AppState, conn: &mut Connection, session_id: &str) -> usize {
    let mut data = Data::new();
    data.insert("session_id".into(), json!(session_id));
    let frame = Frame::request("session_ended", data).with_session_id(session_id);

    let notified = {
        let mut presence = state.presence.write().await;
        let removed = presence.drop_session(session_id);
        removed
            .iter()
            .filter(|(_, connection_id)| presence.send_to(*connection_id, &frame) == Delivery::Delivered)
            .count()
    };

    if conn.session_id.as_deref() == Some(session_id) {
        conn.session_id = None;
    }
    info!(%session_id, notified, "lifecycle: session ended");
    notified
}

/// Transport closed (or kicked). Detaches the channel and parts every session
/// the registry still maps to this connection. Safe to call repeatedly.
pub async fn disconnect(state: &AppState, conn: &mut Connection) -> Vec<PresenceKey> {
    let removed = {
        let mut presence = state.presence.write().await;
        presence.detach(conn.id);
        let removed = presence.drop_connection(conn.id);
        for key in &removed {
            presence.broadcast(
                &key.session_id,
                &participant_frame("student_left", &key.session_id, &key.user_id),
                None,
            );
        }
        removed
    };

    conn.session_id = None;
    if !removed.is_empty() {
        info!(connection_id = %conn.id, sessions = removed.len(), "lifecycle: disconnect cleanup");
    }
    removed
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
