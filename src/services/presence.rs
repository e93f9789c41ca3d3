//! Presence registry: who is live in which session right now.
//!
//! DESIGN
//! ======
//! One ordered map keyed by the composite `(session_id, user_id)` holds the
//! connection currently representing that participant. Ordering by session
//! first lets per-session scans use a range instead of a full walk. The
//! registry also owns each connection's outbound channel and the per-session
//! lock-mode flag, so a single write guard covers every read-then-write the
//! router needs (join, leave, session end).
//!
//! The registry is plain synchronous data. `AppState` wraps it in a
//! `tokio::sync::RwLock`; callers must never await while holding the guard.
//!
//! Nothing here survives a restart. Clients re-join after reconnecting.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::frame::Frame;

/// Composite presence key. Ordered by session, then user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PresenceKey {
    pub session_id: String,
    pub user_id: String,
}

impl PresenceKey {
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), user_id: user_id.into() }
    }
}

/// Result of a targeted delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Target not registered (or its channel is gone). Not an error.
    NotPresent,
    /// Target is attached but its outbound queue is full; the frame was lost.
    Dropped,
}

impl Delivery {
    #[must_use]
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    entries: BTreeMap<PresenceKey, Uuid>,
    clients: HashMap<Uuid, mpsc::Sender<Frame>>,
    lock_mode: HashMap<String, bool>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // ENTRIES
    // =========================================================================

    /// Upsert. A rejoin from a new connection replaces the stale mapping.
    /// Returns the connection that was replaced, if it differs.
    pub fn register(&mut self, session_id: &str, user_id: &str, connection_id: Uuid) -> Option<Uuid> {
        self.entries
            .insert(PresenceKey::new(session_id, user_id), connection_id)
            .filter(|old| *old != connection_id)
    }

    /// Remove an entry. No-op when absent. The last member leaving also
    /// clears the session's lock-mode flag.
    pub fn unregister(&mut self, session_id: &str, user_id: &str) -> Option<Uuid> {
        let removed = self.entries.remove(&PresenceKey::new(session_id, user_id));
        if removed.is_some() {
            self.forget_if_empty(session_id);
        }
        removed
    }

    #[must_use]
    pub fn lookup(&self, session_id: &str, user_id: &str) -> Option<Uuid> {
        self.entries
            .get(&PresenceKey::new(session_id, user_id))
            .copied()
    }

    /// Remove every entry of a session and its lock-mode flag. Returns the
    /// removed entries.
    pub fn drop_session(&mut self, session_id: &str) -> Vec<(PresenceKey, Uuid)> {
        let keys: Vec<PresenceKey> = self.session_range(session_id).map(|(k, _)| k.clone()).collect();
        self.lock_mode.remove(session_id);
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|c| (k, c)))
            .collect()
    }

    /// Remove every entry referencing a connection, across all sessions.
    /// Idempotent: a second call returns nothing.
    pub fn drop_connection(&mut self, connection_id: Uuid) -> Vec<PresenceKey> {
        let keys: Vec<PresenceKey> = self
            .entries
            .iter()
            .filter(|(_, c)| **c == connection_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        for key in &keys {
            self.forget_if_empty(&key.session_id);
        }
        keys
    }

    /// Live participants of a session: `(user_id, connection_id)`.
    #[must_use]
    pub fn members(&self, session_id: &str) -> Vec<(String, Uuid)> {
        self.session_range(session_id)
            .map(|(k, c)| (k.user_id.clone(), *c))
            .collect()
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn has_members(&self, session_id: &str) -> bool {
        self.session_range(session_id).next().is_some()
    }

    fn forget_if_empty(&mut self, session_id: &str) {
        if !self.has_members(session_id) {
            self.lock_mode.remove(session_id);
        }
    }

    fn session_range<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = (&'a PresenceKey, &'a Uuid)> + 'a {
        let start = PresenceKey::new(session_id, "");
        self.entries
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(k, _)| k.session_id == session_id)
    }

    // =========================================================================
    // CHANNELS
    // =========================================================================

    /// Attach a connection's outbound channel.
    pub fn attach(&mut self, connection_id: Uuid, tx: mpsc::Sender<Frame>) {
        self.clients.insert(connection_id, tx);
    }

    /// Drop a connection's outbound channel. Once the last sender is gone the
    /// connection's receive loop drains its queue and closes.
    pub fn detach(&mut self, connection_id: Uuid) -> bool {
        self.clients.remove(&connection_id).is_some()
    }

    /// Best-effort send to one connection. A closed channel is
    /// [`Delivery::NotPresent`], a full one [`Delivery::Dropped`].
    pub fn send_to(&self, connection_id: Uuid, frame: &Frame) -> Delivery {
        let Some(tx) = self.clients.get(&connection_id) else {
            return Delivery::NotPresent;
        };
        match tx.try_send(frame.clone()) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(%connection_id, event = %frame.event, "presence: outbound queue full, frame dropped");
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(%connection_id, event = %frame.event, "presence: outbound channel closed");
                Delivery::NotPresent
            }
        }
    }

    /// Targeted delivery to `(session_id, user_id)`.
    pub fn send_to_user(&self, session_id: &str, user_id: &str, frame: &Frame) -> Delivery {
        match self.lookup(session_id, user_id) {
            Some(connection_id) => self.send_to(connection_id, frame),
            None => Delivery::NotPresent,
        }
    }

    /// Session broadcast, optionally excluding one connection. Returns the
    /// number of connections the frame was queued for.
    pub fn broadcast(&self, session_id: &str, frame: &Frame, exclude: Option<Uuid>) -> usize {
        self.session_range(session_id)
            .filter(|(_, c)| exclude != Some(**c))
            .filter(|(_, c)| self.send_to(**c, frame).is_delivered())
            .count()
    }

    // =========================================================================
    // SESSION FLAGS
    // =========================================================================

    /// Record the live lock-mode flag. Only sessions with members keep one;
    /// for an empty session any stale flag is cleared and `false` returned.
    pub fn set_lock_mode(&mut self, session_id: &str, enabled: bool) -> bool {
        if !self.has_members(session_id) {
            self.lock_mode.remove(session_id);
            return false;
        }
        self.lock_mode.insert(session_id.to_owned(), enabled);
        true
    }

    /// Live lock-mode flag, `None` when no teacher toggled it since the
    /// session last had members. Callers fall back to the stored room flag.
    #[must_use]
    pub fn lock_mode(&self, session_id: &str) -> Option<bool> {
        self.lock_mode.get(session_id).copied()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
