use super::*;
use std::sync::Arc;

use crate::state::test_helpers::{BrokenStorage, seed_member, test_app_state, test_app_state_with};
use crate::storage::RoomRow;

fn room(id: &str) -> RoomRow {
    RoomRow {
        id: id.to_owned(),
        room_code: "ABC123".into(),
        teacher_id: "T1".into(),
        lock_mode_enabled: false,
        is_active: true,
    }
}

#[tokio::test]
async fn presence_lists_live_participants() {
    let (state, storage) = test_app_state();
    storage.insert_room(room("R1"));
    seed_member(&state, "R1", "S2").await;
    seed_member(&state, "R1", "S1").await;
    seed_member(&state, "R2", "S3").await;
    state.presence.write().await.set_lock_mode("R1", true);

    let Json(body) = presence(State(state), Path("R1".to_owned())).await.unwrap();

    assert_eq!(body.session_id, "R1");
    assert_eq!(body.room_code, "ABC123");
    assert_eq!(body.participants, vec!["S1".to_owned(), "S2".to_owned()]);
    assert!(body.lock_mode);
    assert!(body.is_active);
}

#[tokio::test]
async fn presence_of_empty_known_room_is_empty() {
    let (state, storage) = test_app_state();
    storage.insert_room(room("R1"));

    let Json(body) = presence(State(state), Path("R1".to_owned())).await.unwrap();
    assert!(body.participants.is_empty());
    assert!(!body.lock_mode);
}

#[tokio::test]
async fn live_lock_mode_overrides_stale_stored_flag() {
    let (state, storage) = test_app_state();
    storage.insert_room(RoomRow { lock_mode_enabled: true, ..room("R1") });
    seed_member(&state, "R1", "S1").await;
    state.presence.write().await.set_lock_mode("R1", false);

    let Json(body) = presence(State(state), Path("R1".to_owned())).await.unwrap();
    assert!(!body.lock_mode);
}

#[tokio::test]
async fn stored_lock_mode_applies_without_live_flag() {
    let (state, storage) = test_app_state();
    storage.insert_room(RoomRow { lock_mode_enabled: true, ..room("R1") });
    seed_member(&state, "R1", "S1").await;

    let Json(body) = presence(State(state), Path("R1".to_owned())).await.unwrap();
    assert!(body.lock_mode);
}

#[tokio::test]
async fn unknown_room_is_not_found() {
    let (state, _storage) = test_app_state();
    seed_member(&state, "R9", "S1").await;

    let err = presence(State(state), Path("R9".to_owned())).await.unwrap_err();
    assert_eq!(err, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn storage_failure_is_internal_error() {
    let state = test_app_state_with(Arc::new(BrokenStorage));

    let err = presence(State(state), Path("R1".to_owned())).await.unwrap_err();
    assert_eq!(err, StatusCode::INTERNAL_SERVER_ERROR);
}
