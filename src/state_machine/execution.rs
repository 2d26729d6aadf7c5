use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ExecutionStatus;
use crate::allocation::AllocationSummary;
use crate::error::TransitionError;

/// Identifier of the external object (work order) entries are attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub i64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of trailing marker characters embedded into submitted entries.
pub const MARKER_SHORT_LEN: usize = 4;

/// Time-derived token correlating one execution with the entries it produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker(String);

impl Marker {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `AUTO_<yyyymmdd>_<hhmmss><millis>`. The short form is the last seconds
    /// digit plus the milliseconds, so it repeats every 10 seconds.
    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(at.format("AUTO_%Y%m%d_%H%M%S%3f").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The truncated form written into the entry description.
    pub fn short(&self) -> &str {
        let start = self
            .0
            .char_indices()
            .rev()
            .nth(MARKER_SHORT_LEN - 1)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        &self.0[start..]
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry confirmed by the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedEntry {
    pub entry_id: i64,
    pub title: String,
    pub spent_hours: f64,
    pub estimated_hours: f64,
}

/// How the background worker finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Verified(Vec<VerifiedEntry>),
    NoEvidence,
    Failed(String),
    TimedOut(String),
}

impl ExecutionOutcome {
    pub fn from_verification(entries: Vec<VerifiedEntry>) -> Self {
        if entries.is_empty() {
            ExecutionOutcome::NoEvidence
        } else {
            ExecutionOutcome::Verified(entries)
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Verified(_) => ExecutionStatus::Success,
            ExecutionOutcome::NoEvidence => ExecutionStatus::NoTasksDetected,
            ExecutionOutcome::Failed(_) => ExecutionStatus::Error,
            ExecutionOutcome::TimedOut(_) => ExecutionStatus::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ExecutionStatus,
    pub at: DateTime<Utc>,
}

/// State of one automation run, polled by callers through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub target_id: TargetId,
    pub hours_target: f64,
    pub marker: Marker,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub plan: AllocationSummary,
    pub verified_entries: Vec<VerifiedEntry>,
    pub error: Option<String>,
    pub history: Vec<StatusChange>,
}

impl ExecutionRecord {
    pub fn new(
        execution_id: String,
        target_id: TargetId,
        hours_target: f64,
        marker: Marker,
        plan: AllocationSummary,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id,
            target_id,
            hours_target,
            marker,
            status: ExecutionStatus::Started,
            started_at,
            finished_at: None,
            plan,
            verified_entries: Vec::new(),
            error: None,
            history: vec![StatusChange {
                status: ExecutionStatus::Started,
                at: started_at,
            }],
        }
    }

    pub fn transition(
        &mut self,
        next: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.status = self.status.transition(next)?;
        self.history.push(StatusChange { status: next, at });
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(())
    }

    /// Moves the record to the terminal status matching `outcome`.
    /// A rejected transition leaves the record untouched.
    pub fn finish(
        &mut self,
        outcome: ExecutionOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(outcome.status(), at)?;
        match outcome {
            ExecutionOutcome::Verified(entries) => self.verified_entries = entries,
            ExecutionOutcome::NoEvidence => {}
            ExecutionOutcome::Failed(message) | ExecutionOutcome::TimedOut(message) => {
                self.error = Some(message)
            }
        }
        Ok(())
    }

    /// Hours observed in the system of record. May differ from `hours_target`.
    pub fn verified_hours(&self) -> f64 {
        self.verified_entries.iter().map(|e| e.spent_hours).sum()
    }
}

/// Human-facing digest attached to polled records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: Option<bool>,
    pub tasks_created: Option<usize>,
    pub total_hours_logged: Option<f64>,
    pub message: String,
}

impl ExecutionSummary {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        match record.status {
            ExecutionStatus::Started | ExecutionStatus::Running => Self {
                success: None,
                tasks_created: None,
                total_hours_logged: None,
                message: format!("Automation in progress (status: {})", record.status),
            },
            ExecutionStatus::Success => {
                let count = record.verified_entries.len();
                let hours = round2(record.verified_hours());
                Self {
                    success: Some(true),
                    tasks_created: Some(count),
                    total_hours_logged: Some(hours),
                    message: format!(
                        "Automation finished: {count} tasks created, {hours:.2}h logged"
                    ),
                }
            }
            ExecutionStatus::NoTasksDetected => Self {
                success: Some(false),
                tasks_created: Some(0),
                total_hours_logged: Some(0.0),
                message: "Automation ran but no task was found in the system of record".into(),
            },
            ExecutionStatus::Error | ExecutionStatus::Timeout => Self {
                success: Some(false),
                tasks_created: Some(0),
                total_hours_logged: Some(0.0),
                message: format!(
                    "Automation {}: {}",
                    record.status,
                    record.error.as_deref().unwrap_or("unknown error")
                ),
            },
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_record() -> ExecutionRecord {
        ExecutionRecord::new(
            "exec-1".into(),
            TargetId(540030),
            8.0,
            Marker::new("AUTO_20250821_112332"),
            AllocationSummary::default(),
            Utc::now(),
        )
    }

    fn entry(id: i64, hours: f64) -> VerifiedEntry {
        VerifiedEntry {
            entry_id: id,
            title: format!("Task {id}"),
            spent_hours: hours,
            estimated_hours: hours,
        }
    }

    #[test]
    fn marker_short_form_keeps_last_four_chars() {
        assert_eq!(Marker::new("12345678902310").short(), "2310");
        assert_eq!(Marker::new("AB12").short(), "AB12");
        assert_eq!(Marker::new("x1").short(), "x1");
    }

    #[test]
    fn marker_from_time_is_millisecond_resolution() {
        let at = Utc.with_ymd_and_hms(2025, 8, 21, 11, 23, 32).unwrap()
            + chrono::TimeDelta::milliseconds(347);
        let marker = Marker::from_time(at);
        assert_eq!(marker.as_str(), "AUTO_20250821_112332347");
        assert_eq!(marker.short(), "2347");
    }

    #[test]
    fn record_starts_in_started() {
        let record = make_record();
        assert_eq!(record.status, ExecutionStatus::Started);
        assert!(record.finished_at.is_none());
        assert_eq!(record.history.len(), 1);
    }

    #[test]
    fn finish_with_entries_sets_success() {
        let mut record = make_record();
        record
            .transition(ExecutionStatus::Running, Utc::now())
            .unwrap();
        let outcome = ExecutionOutcome::from_verification(vec![entry(1, 3.0), entry(2, 4.5)]);
        record.finish(outcome, Utc::now()).unwrap();

        assert_eq!(record.status, ExecutionStatus::Success);
        assert!(record.finished_at.is_some());
        assert_eq!(record.verified_hours(), 7.5);
        assert_eq!(
            record.history.iter().map(|c| c.status).collect::<Vec<_>>(),
            vec![
                ExecutionStatus::Started,
                ExecutionStatus::Running,
                ExecutionStatus::Success
            ]
        );
    }

    #[test]
    fn empty_verification_is_no_evidence() {
        assert_eq!(
            ExecutionOutcome::from_verification(Vec::new()),
            ExecutionOutcome::NoEvidence
        );
    }

    #[test]
    fn rejected_finish_leaves_record_untouched() {
        let mut record = make_record();
        record
            .finish(ExecutionOutcome::TimedOut("too slow".into()), Utc::now())
            .unwrap();

        let err = record
            .finish(ExecutionOutcome::Verified(vec![entry(1, 8.0)]), Utc::now())
            .unwrap_err();
        assert_eq!(err.from, ExecutionStatus::Timeout);
        assert_eq!(record.status, ExecutionStatus::Timeout);
        assert!(record.verified_entries.is_empty());
        assert_eq!(record.error.as_deref(), Some("too slow"));
    }

    #[test]
    fn summary_for_success_reports_ground_truth() {
        let mut record = make_record();
        record
            .finish(
                ExecutionOutcome::Verified(vec![entry(1, 3.0), entry(2, 4.333)]),
                Utc::now(),
            )
            .unwrap();
        let summary = ExecutionSummary::from_record(&record);
        assert_eq!(summary.success, Some(true));
        assert_eq!(summary.tasks_created, Some(2));
        assert_eq!(summary.total_hours_logged, Some(7.33));
    }

    #[test]
    fn summary_for_running_is_undecided() {
        let record = make_record();
        let summary = ExecutionSummary::from_record(&record);
        assert_eq!(summary.success, None);
        assert!(summary.message.contains("started"));
    }

    #[test]
    fn record_serialization_uses_snake_case_status() {
        let mut record = make_record();
        record
            .finish(ExecutionOutcome::NoEvidence, Utc::now())
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "no_tasks_detected");
        assert_eq!(json["target_id"], 540030);
        assert_eq!(json["marker"], "AUTO_20250821_112332");
    }
}
