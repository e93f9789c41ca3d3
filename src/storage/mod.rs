//! Storage collaborator: append-only telemetry writers and room lookups.
//!
//! ARCHITECTURE
//! ============
//! The live router never touches SQL directly. Everything it persists goes
//! through the [`Storage`] trait so tests can swap in [`MemoryStorage`] or a
//! failing double, and so the server can run without Postgres during local
//! development.
//!
//! Records reference sessions and students by id only; nothing here holds a
//! live connection.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use time::OffsetDateTime;

use crate::services::attention::AttentionStatus;
use crate::services::identity::Role;

// =============================================================================
// RECORDS
// =============================================================================

/// One raw telemetry sample. Never mutated after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionSample {
    pub session_id: String,
    pub student_id: String,
    pub timestamp: OffsetDateTime,
    pub score: f64,
    pub status: AttentionStatus,
}

/// A status change for one student. `duration_in_previous_secs` describes how
/// long `previous_status` lasted and is stored with the transition that ended it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTimelineEntry {
    pub session_id: String,
    pub student_id: String,
    pub timestamp: OffsetDateTime,
    pub previous_status: Option<AttentionStatus>,
    pub new_status: AttentionStatus,
    pub duration_in_previous_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabSwitchEvent {
    pub session_id: String,
    pub student_id: String,
    pub timestamp: OffsetDateTime,
    pub lock_mode_active: bool,
    pub was_blocked: bool,
}

/// Room row. Mirrors the `rooms` table.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRow {
    pub id: String,
    pub room_code: String,
    pub teacher_id: String,
    pub lock_mode_enabled: bool,
    pub is_active: bool,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl crate::frame::ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_DATABASE",
            Self::Corrupt(_) => "E_CORRUPT_ROW",
        }
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// Persistence interface consumed by the router.
///
/// Implementations must be cheap to share (`Arc<dyn Storage>`) and safe to
/// call concurrently from many connections.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Role recorded for a user, if the user exists.
    async fn user_role(&self, user_id: &str) -> Result<Option<Role>, StorageError>;

    async fn find_room(&self, room_id: &str) -> Result<Option<RoomRow>, StorageError>;

    async fn set_lock_mode(&self, room_id: &str, enabled: bool) -> Result<(), StorageError>;

    /// Mark a room inactive and stamp its end time.
    async fn end_room(&self, room_id: &str, ended_at: OffsetDateTime) -> Result<(), StorageError>;

    async fn append_attention_sample(&self, sample: &AttentionSample) -> Result<(), StorageError>;

    /// Most recent timeline entry for `(session_id, student_id)` by timestamp.
    async fn latest_timeline_entry(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<StatusTimelineEntry>, StorageError>;

    async fn append_timeline_entry(&self, entry: &StatusTimelineEntry) -> Result<(), StorageError>;

    async fn append_tab_switch(&self, event: &TabSwitchEvent) -> Result<(), StorageError>;
}
