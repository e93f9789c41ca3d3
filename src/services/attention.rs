//! Status transition tracker: raw telemetry in, timeline transitions out.
//!
//! DESIGN
//! ======
//! Every telemetry event is stored as an [`AttentionSample`]. The timeline
//! only grows when a student's status changes: the per-student state machine
//! has one state per [`AttentionStatus`], the guard is "incoming status differs
//! from the last recorded one", and the action is appending a
//! [`StatusTimelineEntry`] that carries how long the previous status lasted.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are logged and reported in [`TelemetryOutcome`], never
//! returned as errors. Callers broadcast `attention_update` regardless; live
//! display outranks guaranteed storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::error;

use crate::storage::{AttentionSample, StatusTimelineEntry, Storage};

// =============================================================================
// STATUS
// =============================================================================

/// Attention label produced by the (external) scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttentionStatus {
    Engaged,
    Present,
    #[serde(rename = "Looking Away")]
    LookingAway,
    Drowsy,
    Absent,
}

impl AttentionStatus {
    /// Wire and storage label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Engaged => "Engaged",
            Self::Present => "Present",
            Self::LookingAway => "Looking Away",
            Self::Drowsy => "Drowsy",
            Self::Absent => "Absent",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Engaged" => Some(Self::Engaged),
            "Present" => Some(Self::Present),
            "Looking Away" => Some(Self::LookingAway),
            "Drowsy" => Some(Self::Drowsy),
            "Absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// Inbound telemetry reading, already validated.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub session_id: String,
    pub student_id: String,
    pub score: f64,
    pub status: AttentionStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("attention score {0} outside 0..=100")]
    ScoreOutOfRange(f64),
    #[error("unknown attention status: {0}")]
    UnknownStatus(String),
}

impl crate::frame::ErrorCode for TelemetryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ScoreOutOfRange(_) => "E_SCORE_RANGE",
            Self::UnknownStatus(_) => "E_UNKNOWN_STATUS",
        }
    }
}

impl Telemetry {
    /// Validate raw wire values.
    ///
    /// # Errors
    ///
    /// Rejects scores outside `0..=100` (including NaN) and unknown labels.
    pub fn new(session_id: &str, student_id: &str, score: f64, status: &str) -> Result<Self, TelemetryError> {
        if !(0.0..=100.0).contains(&score) {
            return Err(TelemetryError::ScoreOutOfRange(score));
        }
        let Some(status) = AttentionStatus::parse(status) else {
            return Err(TelemetryError::UnknownStatus(status.to_owned()));
        };
        Ok(Self { session_id: session_id.to_owned(), student_id: student_id.to_owned(), score, status })
    }
}

/// What happened to one telemetry event on the storage side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryOutcome {
    /// Raw sample row written.
    pub sample_persisted: bool,
    /// Timeline entry produced by this event, if the status changed.
    pub transition: Option<StatusTimelineEntry>,
    /// Timeline read/append succeeded (or was not needed).
    pub timeline_persisted: bool,
}

impl TelemetryOutcome {
    #[must_use]
    pub fn persisted(&self) -> bool {
        self.sample_persisted && self.timeline_persisted
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Transition guard + action. Returns the entry to append, or `None` when
/// the status is unchanged.
#[must_use]
pub fn next_transition(
    previous: Option<&StatusTimelineEntry>,
    telemetry: &Telemetry,
    now: OffsetDateTime,
) -> Option<StatusTimelineEntry> {
    if previous.is_some_and(|p| p.new_status == telemetry.status) {
        return None;
    }

    Some(StatusTimelineEntry {
        session_id: telemetry.session_id.clone(),
        student_id: telemetry.student_id.clone(),
        timestamp: now,
        previous_status: previous.map(|p| p.new_status),
        new_status: telemetry.status,
        duration_in_previous_secs: previous.map(|p| whole_seconds_between(p.timestamp, now)),
    })
}

/// Elapsed whole seconds, rounded half-up, clamped at zero for clock skew.
fn whole_seconds_between(earlier: OffsetDateTime, later: OffsetDateTime) -> i64 {
    let millis = (later - earlier).whole_milliseconds().max(0);
    i64::try_from((millis + 500) / 1000).unwrap_or(i64::MAX)
}

/// Persist one telemetry event and any resulting status transition.
pub async fn record(storage: &dyn Storage, telemetry: &Telemetry, now: OffsetDateTime) -> TelemetryOutcome {
    let mut outcome = TelemetryOutcome::default();

    let sample = AttentionSample {
        session_id: telemetry.session_id.clone(),
        student_id: telemetry.student_id.clone(),
        timestamp: now,
        score: telemetry.score,
        status: telemetry.status,
    };
    match storage.append_attention_sample(&sample).await {
        Ok(()) => outcome.sample_persisted = true,
        Err(e) => {
            error!(error = %e, session_id = %telemetry.session_id, student_id = %telemetry.student_id, "attention sample persist failed");
        }
    }

    let previous = match storage
        .latest_timeline_entry(&telemetry.session_id, &telemetry.student_id)
        .await
    {
        Ok(previous) => previous,
        Err(e) => {
            // Without the last entry we cannot tell whether this is a change.
            error!(error = %e, session_id = %telemetry.session_id, student_id = %telemetry.student_id, "timeline lookup failed");
            return outcome;
        }
    };

    let Some(entry) = next_transition(previous.as_ref(), telemetry, now) else {
        outcome.timeline_persisted = true;
        return outcome;
    };

    match storage.append_timeline_entry(&entry).await {
        Ok(()) => {
            outcome.timeline_persisted = true;
            outcome.transition = Some(entry);
        }
        Err(e) => {
            error!(error = %e, session_id = %telemetry.session_id, student_id = %telemetry.student_id, "timeline persist failed");
        }
    }
    outcome
}

#[cfg(test)]
#[path = "attention_test.rs"]
mod tests;
