//! Identity resolver: turns a connection credential into `(user_id, role)`.
//!
//! ARCHITECTURE
//! ============
//! Tokens are HS256 JWTs issued by the (external) account service. The `sub`
//! claim is the user id. A `role` claim is trusted when present; otherwise the
//! role is read from the `users` table through [`Storage`].
//!
//! TRADE-OFFS
//! ==========
//! Every decoding failure (malformed, bad signature, expired, unknown user)
//! folds into `None`. The socket stays open unauthenticated and individual
//! actions reject with "not authenticated"; clients never learn why a token
//! was refused.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::Storage;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }
}

/// Verified identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self { user_id: user_id.into(), role }
    }
}

/// Resolves an opaque credential. Never errors: no identity is `None`.
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Identity>;
}

// =============================================================================
// JWT RESOLVER
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    pub(crate) sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) role: Option<String>,
    pub(crate) exp: u64,
}

pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
    storage: Arc<dyn Storage>,
}

impl JwtIdentityResolver {
    #[must_use]
    pub fn new(secret: &str, storage: Arc<dyn Storage>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key: DecodingKey::from_secret(secret.as_bytes()), validation, storage }
    }

    fn decode(&self, token: &str) -> Option<Claims> {
        match jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "identity: token rejected");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn verify(&self, token: &str) -> Option<Identity> {
        let claims = self.decode(token)?;

        if let Some(role) = claims.role.as_deref().and_then(Role::parse) {
            return Some(Identity::new(claims.sub, role));
        }

        match self.storage.user_role(&claims.sub).await {
            Ok(Some(role)) => Some(Identity::new(claims.sub, role)),
            Ok(None) => {
                debug!(user_id = %claims.sub, "identity: token subject has no user row");
                None
            }
            Err(e) => {
                warn!(error = %e, user_id = %claims.sub, "identity: role lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
