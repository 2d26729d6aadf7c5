use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Lifecycle status of an execution record.
///
/// Each execution flows through: STARTED → RUNNING → one terminal status.
/// `aborted` never appears here: a pre-flight abort creates no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Started,
    Running,
    Success,
    NoTasksDetected,
    Error,
    Timeout,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Started => write!(f, "started"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::NoTasksDetected => write!(f, "no_tasks_detected"),
            ExecutionStatus::Error => write!(f, "error"),
            ExecutionStatus::Timeout => write!(f, "timeout"),
        }
    }
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    fn rank(self) -> u8 {
        match self {
            ExecutionStatus::Started => 0,
            ExecutionStatus::Running => 1,
            ExecutionStatus::Success
            | ExecutionStatus::NoTasksDetected
            | ExecutionStatus::Error
            | ExecutionStatus::Timeout => 2,
        }
    }

    /// Validates a move to `next`.
    ///
    /// - Statuses only move forward: `started` may skip `running` and go
    ///   straight to a terminal status, `running` may only go terminal.
    /// - Terminal statuses are sticky and accept no transition, not even to
    ///   themselves.
    pub fn transition(self, next: ExecutionStatus) -> Result<ExecutionStatus, TransitionError> {
        if next.rank() > self.rank() {
            Ok(next)
        } else {
            Err(TransitionError {
                from: self,
                to: next,
            })
        }
    }
}
