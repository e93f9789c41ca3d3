use super::*;
use crate::services::attention::AttentionStatus;
use time::Duration;

fn entry(student: &str, at: OffsetDateTime, status: AttentionStatus) -> StatusTimelineEntry {
    StatusTimelineEntry {
        session_id: "R1".into(),
        student_id: student.into(),
        timestamp: at,
        previous_status: None,
        new_status: status,
        duration_in_previous_secs: None,
    }
}

#[tokio::test]
async fn latest_timeline_entry_orders_by_timestamp() {
    let storage = MemoryStorage::new();
    let t0 = OffsetDateTime::UNIX_EPOCH;

    storage
        .append_timeline_entry(&entry("S1", t0 + Duration::seconds(5), AttentionStatus::Drowsy))
        .await
        .unwrap();
    storage
        .append_timeline_entry(&entry("S1", t0, AttentionStatus::Engaged))
        .await
        .unwrap();

    let latest = storage.latest_timeline_entry("R1", "S1").await.unwrap().unwrap();
    assert_eq!(latest.new_status, AttentionStatus::Drowsy);
}

#[tokio::test]
async fn latest_timeline_entry_is_scoped_to_student() {
    let storage = MemoryStorage::new();
    let t0 = OffsetDateTime::UNIX_EPOCH;
    storage
        .append_timeline_entry(&entry("S1", t0, AttentionStatus::Present))
        .await
        .unwrap();

    assert!(storage.latest_timeline_entry("R1", "S2").await.unwrap().is_none());
    assert!(storage.latest_timeline_entry("R2", "S1").await.unwrap().is_none());
}

#[tokio::test]
async fn latest_timeline_entry_prefers_later_insert_on_tie() {
    let storage = MemoryStorage::new();
    let t0 = OffsetDateTime::UNIX_EPOCH;
    storage
        .append_timeline_entry(&entry("S1", t0, AttentionStatus::Present))
        .await
        .unwrap();
    storage
        .append_timeline_entry(&entry("S1", t0, AttentionStatus::Engaged))
        .await
        .unwrap();

    let latest = storage.latest_timeline_entry("R1", "S1").await.unwrap().unwrap();
    assert_eq!(latest.new_status, AttentionStatus::Engaged);
}

#[tokio::test]
async fn room_lock_mode_and_end() {
    let storage = MemoryStorage::new();
    storage.insert_room(RoomRow {
        id: "R1".into(),
        room_code: "ABC123".into(),
        teacher_id: "T1".into(),
        lock_mode_enabled: false,
        is_active: true,
    });

    storage.set_lock_mode("R1", true).await.unwrap();
    storage.end_room("R1", OffsetDateTime::UNIX_EPOCH).await.unwrap();

    let room = storage.find_room("R1").await.unwrap().unwrap();
    assert!(room.lock_mode_enabled);
    assert!(!room.is_active);

    // Unknown rooms are a no-op, not an error.
    storage.set_lock_mode("missing", true).await.unwrap();
    assert!(storage.find_room("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn user_role_lookup() {
    let storage = MemoryStorage::new();
    storage.insert_user("T1", Role::Teacher);

    assert_eq!(storage.user_role("T1").await.unwrap(), Some(Role::Teacher));
    assert_eq!(storage.user_role("nobody").await.unwrap(), None);
}
