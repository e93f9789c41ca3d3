//! Postgres-backed [`Storage`].

use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use super::{AttentionSample, RoomRow, StatusTimelineEntry, Storage, StorageError, TabSwitchEvent};
use crate::services::attention::AttentionStatus;
use crate::services::identity::Role;

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<AttentionStatus, StorageError> {
    AttentionStatus::parse(raw).ok_or_else(|| StorageError::Corrupt(format!("unknown attention status {raw:?}")))
}

#[async_trait::async_trait]
impl Storage for PgStorage {
    async fn user_role(&self, user_id: &str) -> Result<Option<Role>, StorageError> {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match role {
            None => Ok(None),
            Some(raw) => Role::parse(&raw)
                .map(Some)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown role {raw:?} for user {user_id}"))),
        }
    }

    async fn find_room(&self, room_id: &str) -> Result<Option<RoomRow>, StorageError> {
        let row = sqlx::query(
            "SELECT id, room_code, teacher_id, lock_mode_enabled, is_active
             FROM rooms
             WHERE id = $1",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RoomRow {
            id: r.get("id"),
            room_code: r.get("room_code"),
            teacher_id: r.get("teacher_id"),
            lock_mode_enabled: r.get("lock_mode_enabled"),
            is_active: r.get("is_active"),
        }))
    }

    async fn set_lock_mode(&self, room_id: &str, enabled: bool) -> Result<(), StorageError> {
        sqlx::query("UPDATE rooms SET lock_mode_enabled = $2 WHERE id = $1")
            .bind(room_id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn end_room(&self, room_id: &str, ended_at: OffsetDateTime) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE rooms SET is_active = FALSE, end_time = $2 WHERE id = $1")
            .bind(room_id)
            .bind(ended_at)
            .execute(tx.as_mut())
            .await?;
        sqlx::query("UPDATE room_participants SET left_at = $2 WHERE room_id = $1 AND left_at IS NULL")
            .bind(room_id)
            .bind(ended_at)
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_attention_sample(&self, sample: &AttentionSample) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO attention_samples (session_id, student_id, timestamp, attention_score, status)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&sample.session_id)
        .bind(&sample.student_id)
        .bind(sample.timestamp)
        .bind(sample.score)
        .bind(sample.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_timeline_entry(
        &self,
        session_id: &str,
        student_id: &str,
    ) -> Result<Option<StatusTimelineEntry>, StorageError> {
        let row = sqlx::query(
            "SELECT timestamp, previous_status, new_status, duration_in_previous
             FROM status_timeline
             WHERE session_id = $1 AND student_id = $2
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
        )
        .bind(session_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let previous: Option<String> = row.get("previous_status");
        let new_status: String = row.get("new_status");
        Ok(Some(StatusTimelineEntry {
            session_id: session_id.to_owned(),
            student_id: student_id.to_owned(),
            timestamp: row.get("timestamp"),
            previous_status: previous.as_deref().map(parse_status).transpose()?,
            new_status: parse_status(&new_status)?,
            duration_in_previous_secs: row.get("duration_in_previous"),
        }))
    }

    async fn append_timeline_entry(&self, entry: &StatusTimelineEntry) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO status_timeline
                 (session_id, student_id, timestamp, previous_status, new_status, duration_in_previous)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&entry.session_id)
        .bind(&entry.student_id)
        .bind(entry.timestamp)
        .bind(entry.previous_status.map(AttentionStatus::as_str))
        .bind(entry.new_status.as_str())
        .bind(entry.duration_in_previous_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_tab_switch(&self, event: &TabSwitchEvent) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO tab_switch_events (session_id, student_id, timestamp, lock_mode_active, was_blocked)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&event.session_id)
        .bind(&event.student_id)
        .bind(event.timestamp)
        .bind(event.lock_mode_active)
        .bind(event.was_blocked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
