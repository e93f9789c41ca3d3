use super::*;
use crate::state::test_helpers::{BrokenStorage, TimelineOutage};
use crate::storage::MemoryStorage;
use time::Duration;

fn telemetry(status: AttentionStatus) -> Telemetry {
    Telemetry { session_id: "R1".into(), student_id: "S1".into(), score: 80.0, status }
}

// =============================================================================
// AttentionStatus
// =============================================================================

#[test]
fn status_labels_round_trip_through_parse() {
    for status in [
        AttentionStatus::Engaged,
        AttentionStatus::Present,
        AttentionStatus::LookingAway,
        AttentionStatus::Drowsy,
        AttentionStatus::Absent,
    ] {
        assert_eq!(AttentionStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(AttentionStatus::parse("looking away"), None);
}

#[test]
fn looking_away_serializes_with_space() {
    let json = serde_json::to_value(AttentionStatus::LookingAway).unwrap();
    assert_eq!(json, serde_json::json!("Looking Away"));
}

// =============================================================================
// Telemetry validation
// =============================================================================

#[test]
fn telemetry_rejects_out_of_range_score() {
    assert!(matches!(
        Telemetry::new("R1", "S1", 100.5, "Present"),
        Err(TelemetryError::ScoreOutOfRange(_))
    ));
    assert!(matches!(
        Telemetry::new("R1", "S1", -1.0, "Present"),
        Err(TelemetryError::ScoreOutOfRange(_))
    ));
    assert!(matches!(
        Telemetry::new("R1", "S1", f64::NAN, "Present"),
        Err(TelemetryError::ScoreOutOfRange(_))
    ));
}

#[test]
fn telemetry_rejects_unknown_status() {
    assert!(matches!(
        Telemetry::new("R1", "S1", 50.0, "Sleeping"),
        Err(TelemetryError::UnknownStatus(s)) if s == "Sleeping"
    ));
}

#[test]
fn telemetry_accepts_bounds() {
    assert!(Telemetry::new("R1", "S1", 0.0, "Absent").is_ok());
    assert!(Telemetry::new("R1", "S1", 100.0, "Engaged").is_ok());
}

// =============================================================================
// next_transition
// =============================================================================

#[test]
fn first_reading_opens_timeline_without_duration() {
    let now = OffsetDateTime::UNIX_EPOCH;
    let entry = next_transition(None, &telemetry(AttentionStatus::Present), now).expect("first reading transitions");

    assert_eq!(entry.previous_status, None);
    assert_eq!(entry.new_status, AttentionStatus::Present);
    assert_eq!(entry.duration_in_previous_secs, None);
    assert_eq!(entry.timestamp, now);
}

#[test]
fn unchanged_status_produces_no_transition() {
    let t0 = OffsetDateTime::UNIX_EPOCH;
    let first = next_transition(None, &telemetry(AttentionStatus::Engaged), t0).unwrap();
    assert!(next_transition(Some(&first), &telemetry(AttentionStatus::Engaged), t0 + Duration::seconds(9)).is_none());
}

#[test]
fn changed_status_carries_previous_and_rounded_duration() {
    let t0 = OffsetDateTime::UNIX_EPOCH;
    let first = next_transition(None, &telemetry(AttentionStatus::Engaged), t0).unwrap();
    let later = t0 + Duration::milliseconds(2_600);

    let entry = next_transition(Some(&first), &telemetry(AttentionStatus::Drowsy), later).unwrap();
    assert_eq!(entry.previous_status, Some(AttentionStatus::Engaged));
    assert_eq!(entry.new_status, AttentionStatus::Drowsy);
    assert_eq!(entry.duration_in_previous_secs, Some(3));
}

#[test]
fn clock_skew_clamps_duration_to_zero() {
    let t0 = OffsetDateTime::UNIX_EPOCH + Duration::seconds(10);
    let first = next_transition(None, &telemetry(AttentionStatus::Engaged), t0).unwrap();
    let entry = next_transition(Some(&first), &telemetry(AttentionStatus::Absent), t0 - Duration::seconds(4)).unwrap();
    assert_eq!(entry.duration_in_previous_secs, Some(0));
}

// =============================================================================
// record
// =============================================================================

#[tokio::test]
async fn status_sequence_produces_three_transitions_and_five_samples() {
    let storage = MemoryStorage::new();
    let t0 = OffsetDateTime::UNIX_EPOCH;
    let statuses = [
        AttentionStatus::Present,
        AttentionStatus::Present,
        AttentionStatus::Engaged,
        AttentionStatus::Engaged,
        AttentionStatus::Drowsy,
    ];

    for (i, status) in statuses.into_iter().enumerate() {
        let at = t0 + Duration::seconds(i64::try_from(i).unwrap());
        let outcome = record(&storage, &telemetry(status), at).await;
        assert!(outcome.persisted());
    }

    assert_eq!(storage.samples().len(), 5);

    let timeline = storage.timeline();
    assert_eq!(timeline.len(), 3);
    assert_eq!(timeline[0].new_status, AttentionStatus::Present);
    assert_eq!(timeline[0].duration_in_previous_secs, None);
    assert_eq!(timeline[1].previous_status, Some(AttentionStatus::Present));
    assert_eq!(timeline[1].new_status, AttentionStatus::Engaged);
    assert_eq!(timeline[1].duration_in_previous_secs, Some(2));
    assert_eq!(timeline[2].previous_status, Some(AttentionStatus::Engaged));
    assert_eq!(timeline[2].new_status, AttentionStatus::Drowsy);
    assert_eq!(timeline[2].duration_in_previous_secs, Some(2));
}

#[tokio::test]
async fn record_reports_transition_only_on_change() {
    let storage = MemoryStorage::new();
    let t0 = OffsetDateTime::UNIX_EPOCH;

    let first = record(&storage, &telemetry(AttentionStatus::Present), t0).await;
    let second = record(&storage, &telemetry(AttentionStatus::Present), t0 + Duration::seconds(1)).await;

    assert!(first.transition.is_some());
    assert!(second.transition.is_none());
    assert!(second.timeline_persisted);
}

#[tokio::test]
async fn students_have_independent_timelines() {
    let storage = MemoryStorage::new();
    let t0 = OffsetDateTime::UNIX_EPOCH;
    let mut other = telemetry(AttentionStatus::Present);
    other.student_id = "S2".into();

    record(&storage, &telemetry(AttentionStatus::Present), t0).await;
    let outcome = record(&storage, &other, t0).await;

    assert!(outcome.transition.is_some(), "S2's first reading must open its own timeline");
    assert_eq!(storage.timeline().len(), 2);
}

#[tokio::test]
async fn storage_failure_is_reported_not_raised() {
    let outcome = record(&BrokenStorage, &telemetry(AttentionStatus::Present), OffsetDateTime::UNIX_EPOCH).await;

    assert!(!outcome.sample_persisted);
    assert!(!outcome.timeline_persisted);
    assert!(outcome.transition.is_none());
    assert!(!outcome.persisted());
}

#[tokio::test]
async fn timeline_append_failure_keeps_sample_but_reports_no_transition() {
    let storage = TimelineOutage::default();

    let outcome = record(&storage, &telemetry(AttentionStatus::Engaged), OffsetDateTime::UNIX_EPOCH).await;

    assert!(outcome.sample_persisted);
    assert!(!outcome.timeline_persisted);
    assert!(outcome.transition.is_none());
    assert!(!outcome.persisted());
    assert_eq!(storage.0.samples().len(), 1);
    assert!(storage.0.timeline().is_empty());
}
