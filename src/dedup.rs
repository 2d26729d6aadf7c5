//! Duplicate filter: drops candidates whose title was used by one of the
//! most recently opened tasks in the ticketing system.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bank::CandidateTask;
use crate::record_system::RecentTitles;

/// How many recent tasks are looked up by default.
pub const DEFAULT_LOOKBACK: usize = 7;

pub const RECENTLY_CREATED: &str = "recently created";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedTask {
    pub title: String,
    pub reason: String,
}

/// Audit trail of one filtering pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupReport {
    pub original_count: usize,
    pub filtered_count: usize,
    pub blocked_count: usize,
    pub recent_titles: Vec<String>,
    pub blocked: Vec<BlockedTask>,
    /// Set when the recent-titles lookup failed and the filter let everything through.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_error: Option<String>,
    pub can_proceed: bool,
    pub filtered_at: DateTime<Utc>,
}

pub struct DuplicateFilter {
    source: Arc<dyn RecentTitles>,
    lookback: usize,
}

impl DuplicateFilter {
    pub fn new(source: Arc<dyn RecentTitles>, lookback: usize) -> Self {
        Self { source, lookback }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Looks up the recent titles and filters `candidates` against them.
    /// A failed lookup degrades open: every candidate passes and the report
    /// carries the error.
    pub fn filter(&self, candidates: Vec<CandidateTask>) -> (Vec<CandidateTask>, DedupReport) {
        match self.source.recent_titles(self.lookback) {
            Ok(titles) => filter_recent(candidates, &titles),
            Err(err) => {
                tracing::warn!(error = %err, "recent titles lookup failed, skipping duplicate filter");
                let (kept, mut report) = filter_recent(candidates, &[]);
                report.lookup_error = Some(err.to_string());
                (kept, report)
            }
        }
    }
}

/// Removes every candidate whose trimmed title equals one of `recent_titles`.
pub fn filter_recent(
    candidates: Vec<CandidateTask>,
    recent_titles: &[String],
) -> (Vec<CandidateTask>, DedupReport) {
    let recent: BTreeSet<String> = recent_titles
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let original_count = candidates.len();
    let (blocked, kept): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|task| recent.contains(task.title.trim()));

    for task in &blocked {
        tracing::debug!(title = %task.title, "candidate blocked as duplicate");
    }

    let report = DedupReport {
        original_count,
        filtered_count: kept.len(),
        blocked_count: blocked.len(),
        recent_titles: recent.into_iter().collect(),
        blocked: blocked
            .into_iter()
            .map(|task| BlockedTask {
                title: task.title,
                reason: RECENTLY_CREATED.to_string(),
            })
            .collect(),
        lookup_error: None,
        can_proceed: !kept.is_empty(),
        filtered_at: Utc::now(),
    };

    tracing::info!(
        original = report.original_count,
        kept = report.filtered_count,
        blocked = report.blocked_count,
        "duplicate filter applied"
    );
    (kept, report)
}
