//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the presence registry (behind one async `RwLock`), the storage
//! collaborator, and the identity resolver. Collaborators are trait objects
//! so tests build a fresh state per case with in-memory doubles.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::services::identity::IdentityResolver;
use crate::services::presence::PresenceRegistry;
use crate::storage::Storage;

const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state, injected into Axum handlers via State extractor.
/// Cheap to clone: every field is an `Arc` or `Copy`.
#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<RwLock<PresenceRegistry>>,
    pub storage: Arc<dyn Storage>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Outbound queue depth per connection.
    pub client_channel_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            presence: Arc::new(RwLock::new(PresenceRegistry::new())),
            storage,
            identity,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_client_channel_capacity(mut self, capacity: usize) -> Self {
        self.client_channel_capacity = capacity.max(1);
        self
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
