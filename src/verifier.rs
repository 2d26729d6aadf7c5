//! Independent confirmation that an automation run produced entries.
//!
//! The automation embeds the short marker followed by a fixed suffix into each
//! entry's description. The ticketing system may store that text HTML-escaped,
//! so the verifier tries each [`MarkerEncoding`] in turn and keeps the first
//! one that matches.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::RecordSystemError;
use crate::record_system::{RecordedEntry, SystemOfRecord, TimeWindow};
use crate::state_machine::{Marker, TargetId, VerifiedEntry};

/// Backward margin of the search window, absorbing clock skew.
pub const DEFAULT_LOOKBACK_SECS: i64 = 120;

const RAW_SUFFIX: &str = " -->";
const ESCAPED_SUFFIX: &str = " --&gt;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerEncoding {
    /// Rich-text form the ticketing system stores after re-encoding.
    HtmlEscaped,
    Raw,
}

impl MarkerEncoding {
    pub const ALL: [MarkerEncoding; 2] = [MarkerEncoding::HtmlEscaped, MarkerEncoding::Raw];

    /// The text searched for in descriptions, e.g. `2310 --&gt;`.
    pub fn render(self, short_marker: &str) -> String {
        match self {
            MarkerEncoding::HtmlEscaped => format!("{short_marker}{ESCAPED_SUFFIX}"),
            MarkerEncoding::Raw => format!("{short_marker}{RAW_SUFFIX}"),
        }
    }
}

pub struct Verifier {
    records: Arc<dyn SystemOfRecord>,
    lookback: TimeDelta,
    encodings: Vec<MarkerEncoding>,
}

impl Verifier {
    pub fn new(records: Arc<dyn SystemOfRecord>, lookback: TimeDelta) -> Self {
        Self {
            records,
            lookback,
            encodings: MarkerEncoding::ALL.to_vec(),
        }
    }

    /// Restricts or reorders the encodings tried.
    pub fn with_encodings(mut self, encodings: Vec<MarkerEncoding>) -> Self {
        self.encodings = encodings;
        self
    }

    pub fn verify(
        &self,
        target: TargetId,
        marker: &Marker,
        started_at: DateTime<Utc>,
    ) -> Result<Vec<VerifiedEntry>, RecordSystemError> {
        self.verify_at(target, marker, started_at, Utc::now())
    }

    /// Searches `[started_at - lookback, now]` for entries carrying the marker.
    pub fn verify_at(
        &self,
        target: TargetId,
        marker: &Marker,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VerifiedEntry>, RecordSystemError> {
        let window = TimeWindow {
            from: started_at - self.lookback,
            to: now,
        };
        let short = marker.short();

        for encoding in &self.encodings {
            let fragment = encoding.render(short);
            let entries = self.records.find_entries(target, &window, &fragment)?;
            tracing::debug!(
                target_id = %target,
                fragment = %fragment,
                matches = entries.len(),
                "verification query"
            );
            if !entries.is_empty() {
                tracing::info!(
                    target_id = %target,
                    marker = %marker,
                    encoding = ?encoding,
                    entries = entries.len(),
                    "entries verified"
                );
                return Ok(entries.into_iter().map(VerifiedEntry::from).collect());
            }
        }

        self.log_diagnostics(target, marker, &window);
        Ok(Vec::new())
    }

    // Tells "nothing was written" apart from "written without a recognisable marker".
    fn log_diagnostics(&self, target: TargetId, marker: &Marker, window: &TimeWindow) {
        match self.records.count_entries(target, window) {
            Ok(count) => tracing::warn!(
                target_id = %target,
                marker = %marker,
                entries_in_window = count.count,
                earliest = ?count.earliest,
                latest = ?count.latest,
                window_from = %window.from,
                window_to = %window.to,
                "no entries matched the marker"
            ),
            Err(err) => tracing::warn!(
                target_id = %target,
                marker = %marker,
                error = %err,
                "no entries matched the marker and the diagnostic count failed"
            ),
        }
    }
}

impl From<RecordedEntry> for VerifiedEntry {
    fn from(entry: RecordedEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            title: entry.title,
            spent_hours: entry.spent_hours,
            estimated_hours: entry.estimated_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_system::testing::{fresh_store, insert_task};

    fn verifier(store: crate::record_system::SqliteSystemOfRecord) -> Verifier {
        Verifier::new(Arc::new(store), TimeDelta::seconds(DEFAULT_LOOKBACK_SECS))
    }

    #[test]
    fn render_both_encodings() {
        assert_eq!(MarkerEncoding::Raw.render("AB12"), "AB12 -->");
        assert_eq!(MarkerEncoding::HtmlEscaped.render("AB12"), "AB12 --&gt;");
    }

    #[test]
    fn matches_raw_encoding() {
        let (_dir, store) = fresh_store();
        let started = Utc::now();
        insert_task(&store, 1, 10, "Backup", "<p>checked jobsAB12 --></p>", "2", started);
        let verifier = verifier(store);

        let entries = verifier
            .verify_at(TargetId(10), &Marker::new("AB12"), started, started + TimeDelta::seconds(30))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Backup");
        assert_eq!(entries[0].spent_hours, 2.0);
    }

    #[test]
    fn matches_escaped_encoding() {
        let (_dir, store) = fresh_store();
        let started = Utc::now();
        insert_task(&store, 1, 10, "Backup", "<p>checked jobsAB12 --&gt;</p>", "1,5", started);
        let verifier = verifier(store);

        let entries = verifier
            .verify_at(TargetId(10), &Marker::new("XXAB12"), started, started + TimeDelta::seconds(30))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].spent_hours, 1.5);
    }

    #[test]
    fn window_includes_backward_margin() {
        let (_dir, store) = fresh_store();
        let started = Utc::now();
        insert_task(&store, 1, 10, "Skewed", "AB12 -->", "1", started - TimeDelta::seconds(90));
        let verifier = verifier(store);

        let entries = verifier
            .verify_at(TargetId(10), &Marker::new("AB12"), started, started + TimeDelta::seconds(10))
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn ignores_entries_outside_window() {
        let (_dir, store) = fresh_store();
        let started = Utc::now();
        insert_task(&store, 1, 10, "Old", "AB12 -->", "1", started - TimeDelta::seconds(300));
        insert_task(&store, 2, 10, "Future", "AB12 -->", "1", started + TimeDelta::seconds(600));
        let verifier = verifier(store);

        let entries = verifier
            .verify_at(TargetId(10), &Marker::new("AB12"), started, started + TimeDelta::seconds(30))
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn other_marker_or_target_does_not_match() {
        let (_dir, store) = fresh_store();
        let started = Utc::now();
        insert_task(&store, 1, 10, "Other", "CD34 -->", "1", started);
        insert_task(&store, 2, 11, "Elsewhere", "AB12 -->", "1", started);
        let verifier = verifier(store);

        let entries = verifier
            .verify_at(TargetId(10), &Marker::new("AB12"), started, started + TimeDelta::seconds(30))
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn restricted_encodings_miss_the_other_form() {
        let (_dir, store) = fresh_store();
        let started = Utc::now();
        insert_task(&store, 1, 10, "Backup", "AB12 --&gt;", "1", started);
        let verifier = verifier(store).with_encodings(vec![MarkerEncoding::Raw]);

        let entries = verifier
            .verify_at(TargetId(10), &Marker::new("AB12"), started, started + TimeDelta::seconds(30))
            .unwrap();
        assert!(entries.is_empty());
    }
}
