use thiserror::Error;

use crate::state_machine::{ExecutionStatus, TargetId};

/// Top-level error returned by the orchestrator entry points.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Task bank error: {0}")]
    Bank(#[from] BankError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Execution store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write automation hand-off: {0}")]
    Handoff(#[source] std::io::Error),

    #[error("Background worker failed: {0}")]
    Worker(String),
}

/// Input rejected before any background work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("hours target must be greater than 0 and at most {max}, got {value}")]
    HoursOutOfRange { value: f64, max: f64 },

    #[error("timeout must be between {min}s and {max}s, got {value}s")]
    TimeoutOutOfRange { value: u64, min: u64, max: u64 },

    #[error("task bank has no task with spent hours above zero")]
    NoCandidates,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    #[error("no candidate tasks to allocate from")]
    NoCandidates,

    #[error("allocation target must be a positive number of hours, got {0}")]
    InvalidTarget(f64),
}

#[derive(Debug, Error)]
pub enum BankError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("task '{0}' not found in the bank")]
    UnknownTitle(String),

    #[error("task bank lock poisoned")]
    Poisoned,
}

/// Failures talking to the system of record.
#[derive(Debug, Error)]
pub enum RecordSystemError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid timestamp {0} in system of record")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("failed to spawn automation '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for automation: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to open automation log: {0}")]
    Log(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution {0} already exists")]
    DuplicateExecution(String),

    #[error("marker {0} already used by another execution")]
    DuplicateMarker(String),

    #[error("short marker {short} already used for target {target}")]
    DuplicateShortMarker { target: TargetId, short: String },

    #[error("execution {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("execution store lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::HoursOutOfRange {
            value: 30.0,
            max: 24.0,
        };
        assert_eq!(
            err.to_string(),
            "hours target must be greater than 0 and at most 24, got 30"
        );
    }

    #[test]
    fn transition_error_display() {
        let err = TransitionError {
            from: ExecutionStatus::Success,
            to: ExecutionStatus::Running,
        };
        assert_eq!(err.to_string(), "invalid status transition success -> running");
    }

    #[test]
    fn orchestrator_error_wraps_validation() {
        let err: OrchestratorError = ValidationError::NoCandidates.into();
        assert_eq!(
            err.to_string(),
            "Validation error: task bank has no task with spent hours above zero"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OrchestratorError>();
        assert_send_sync::<RecordSystemError>();
        assert_send_sync::<AutomationError>();
    }
}
