mod execution;
mod state;

pub use execution::{
    ExecutionOutcome, ExecutionRecord, ExecutionSummary, MARKER_SHORT_LEN, Marker, StatusChange,
    TargetId, VerifiedEntry,
};
pub use state::ExecutionStatus;
