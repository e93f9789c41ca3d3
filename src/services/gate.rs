//! Authorization gate: the single check every guarded handler goes through.

use uuid::Uuid;

use crate::services::identity::{Identity, Role};

/// What an action requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access<'a> {
    /// Any verified identity.
    Authenticated,
    /// Teacher role. Moderation and session control.
    Teacher,
    /// Acting on behalf of a student: the student themself or any teacher.
    OnBehalfOf(&'a str),
    /// Acting inside a session: the caller's own registry entry must point at
    /// this connection. Teachers may act across sessions.
    Member { registered: Option<Uuid>, connection_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("not authorized")]
    NotAuthorized,
    #[error("not a member of this session")]
    NotMember,
}

impl crate::frame::ErrorCode for AccessError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
            Self::NotAuthorized => "E_NOT_AUTHORIZED",
            Self::NotMember => "E_NOT_MEMBER",
        }
    }
}

/// Check `access` against the connection's identity.
///
/// # Errors
///
/// [`AccessError::NotAuthenticated`] without an identity,
/// [`AccessError::NotAuthorized`] when the role or subject does not match,
/// [`AccessError::NotMember`] when a student acts in a session this
/// connection has not joined.
pub fn check<'i>(identity: Option<&'i Identity>, access: Access<'_>) -> Result<&'i Identity, AccessError> {
    let identity = identity.ok_or(AccessError::NotAuthenticated)?;
    let is_teacher = identity.role == Role::Teacher;
    match access {
        Access::Authenticated => Ok(identity),
        Access::Teacher if is_teacher => Ok(identity),
        Access::OnBehalfOf(student_id) if is_teacher || identity.user_id == student_id => Ok(identity),
        Access::Teacher | Access::OnBehalfOf(_) => Err(AccessError::NotAuthorized),
        Access::Member { registered, connection_id } => {
            if is_teacher || registered == Some(connection_id) {
                Ok(identity)
            } else {
                Err(AccessError::NotMember)
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod tests;
