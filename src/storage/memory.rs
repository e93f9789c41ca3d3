//! In-memory [`Storage`] for tests and database-less local runs.
//!
//! Rows live in plain vectors behind a `std::sync::Mutex`. No method awaits
//! while holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use time::OffsetDateTime;

use super::{AttentionSample, RoomRow, StatusTimelineEntry, Storage, StorageError, TabSwitchEvent};
use crate::services::identity::Role;

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, Role>,
    rooms: HashMap<String, RoomRow>,
    samples: Vec<AttentionSample>,
    timeline: Vec<StatusTimelineEntry>,
    tab_switches: Vec<TabSwitchEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

#[cfg(test)]
impl MemoryStorage {
    pub fn insert_user(&self, user_id: &str, role: Role) {
        self.with_inner(|inner| inner.users.insert(user_id.to_owned(), role));
    }

    pub fn insert_room(&self, room: RoomRow) {
        self.with_inner(|inner| inner.rooms.insert(room.id.clone(), room));
    }

    pub fn samples(&self) -> Vec<AttentionSample> {
        self.with_inner(|inner| inner.samples.clone())
    }

    pub fn timeline(&self) -> Vec<StatusTimelineEntry> {
        self.with_inner(|inner| inner.timeline.clone())
    }

    pub fn tab_switches(&self) -> Vec<TabSwitchEvent> {
        self.with_inner(|inner| inner.tab_switches.clone())
    }

    pub fn room(&self, room_id: &str) -> Option<RoomRow> {
        self.with_inner(|inner| inner.rooms.get(room_id).cloned())
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn user_role(&self, user_id: &str) -> Result<Option<Role>, StorageError> {
        Ok(self.with_inner(|inner| inner.users.get(user_id).copied()))
    }

    async fn find_room(&self, room_id: &str) -> Result<Option<RoomRow>, StorageError> {
        Ok(self.with_inner(|inner| inner.rooms.get(room_id).cloned()))
    }

    async fn set_lock_mode(&self, room_id: &str, enabled: bool) -> Result<(), StorageError> {
        self.with_inner(|inner| {
            if let Some(room) = inner.rooms.get_mut(room_id) {
                room.lock_mode_enabled = enabled;
            }
        });
        Ok(())
    }

    async fn end_room(&self, room_id: &str, _ended_at: OffsetDateTime) -> Result<(), StorageError> {
        self.with_inner(|inner| {
            if let Some(room) = inner.rooms.get_mut(room_id) {
                room.is_active = false;
            }
        });
        Ok(())
    }

    async fn append_attention_sample(&self, sample: &AttentionSample) -> Result<(), StorageError> {
        self.with_inner(|inner| inner.samples.push(sample.clone()));
        Ok(())
    }

    async fn latest_timeline_entry(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<StatusTimelineEntry>, StorageError> {
        // Later inserts win ties, matching `ORDER BY timestamp DESC, id DESC`.
        Ok(self.with_inner(|inner| {
            inner
                .timeline
                .iter()
                .enumerate()
                .filter(|(_, e)| e.session_id == session_id && e.student_id == student_id)
                .max_by_key(|(idx, e)| (e.timestamp, *idx))
                .map(|(_, e)| e.clone())
        }))
    }

    async fn append_timeline_entry(&self, entry: &StatusTimelineEntry) -> Result<(), StorageError> {
        self.with_inner(|inner| inner.timeline.push(entry.clone()));
        Ok(())
    }

    async fn append_tab_switch(&self, event: &TabSwitchEvent) -> Result<(), StorageError> {
        self.with_inner(|inner| inner.tab_switches.push(event.clone()));
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
