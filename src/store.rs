//! In-memory execution store, the single source of truth for polling.
//!
//! Records live for the lifetime of the process and are never removed. They
//! are not persisted: after a restart every in-flight execution is gone and
//! callers must treat it as unverifiable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, TransitionError};
use crate::state_machine::{ExecutionRecord, Marker, TargetId};

#[derive(Default)]
struct Inner {
    records: HashMap<String, Arc<RwLock<ExecutionRecord>>>,
    markers: HashSet<Marker>,
    // Verification matches on the short form within one target.
    short_markers: HashSet<(TargetId, String)>,
}

/// Cloneable handle; clones share the same records.
#[derive(Clone, Default)]
pub struct ExecutionStore {
    inner: Arc<RwLock<Inner>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new record. Ids, markers and short markers within a target
    /// are never reused.
    pub fn insert(&self, record: ExecutionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if inner.records.contains_key(&record.execution_id) {
            return Err(StoreError::DuplicateExecution(record.execution_id));
        }
        if inner.markers.contains(&record.marker) {
            return Err(StoreError::DuplicateMarker(record.marker.to_string()));
        }
        let short = (record.target_id, record.marker.short().to_string());
        if inner.short_markers.contains(&short) {
            return Err(StoreError::DuplicateShortMarker {
                target: short.0,
                short: short.1,
            });
        }

        inner.short_markers.insert(short);
        inner.markers.insert(record.marker.clone());
        inner
            .records
            .insert(record.execution_id.clone(), Arc::new(RwLock::new(record)));
        Ok(())
    }

    /// Snapshot of one record.
    pub fn get(&self, execution_id: &str) -> Option<ExecutionRecord> {
        let slot = self.slot(execution_id)?;
        // Readers still get the last written state if a writer panicked.
        let record = match slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Some(record)
    }

    /// Applies `change` under the record's write lock and returns the new state.
    pub fn update<F>(&self, execution_id: &str, change: F) -> Result<ExecutionRecord, StoreError>
    where
        F: FnOnce(&mut ExecutionRecord) -> Result<(), TransitionError>,
    {
        let slot = self
            .slot(execution_id)
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;
        let mut record = slot.write().map_err(|_| StoreError::Poisoned)?;
        change(&mut record)?;
        Ok(record.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, execution_id: &str) -> Option<Arc<RwLock<ExecutionRecord>>> {
        let inner = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.records.get(execution_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationSummary;
    use crate::state_machine::{ExecutionOutcome, ExecutionStatus, TargetId};
    use chrono::Utc;

    fn record(id: &str, marker: &str) -> ExecutionRecord {
        record_for(id, TargetId(1), marker)
    }

    fn record_for(id: &str, target: TargetId, marker: &str) -> ExecutionRecord {
        ExecutionRecord::new(
            id.into(),
            target,
            8.0,
            Marker::new(marker),
            AllocationSummary::default(),
            Utc::now(),
        )
    }

    #[test]
    fn insert_and_get() {
        let store = ExecutionStore::new();
        assert!(store.is_empty());
        store.insert(record("a", "AUTO_1")).unwrap();

        let fetched = store.get("a").unwrap();
        assert_eq!(fetched.execution_id, "a");
        assert_eq!(store.len(), 1);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn rejects_reused_id_and_marker() {
        let store = ExecutionStore::new();
        store.insert(record("a", "AUTO_1")).unwrap();

        assert!(matches!(
            store.insert(record("a", "AUTO_2")),
            Err(StoreError::DuplicateExecution(_))
        ));
        assert!(matches!(
            store.insert(record("b", "AUTO_1")),
            Err(StoreError::DuplicateMarker(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejects_reused_short_marker_on_the_same_target() {
        let store = ExecutionStore::new();
        store.insert(record("a", "AUTO_20250821_112332347")).unwrap();

        // Ten seconds later the last four characters repeat.
        let err = store
            .insert(record("b", "AUTO_20250821_112342347"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateShortMarker { target: TargetId(1), ref short } if short == "2347"
        ));

        store
            .insert(record_for("c", TargetId(2), "AUTO_20250821_112342347"))
            .unwrap();
        store.insert(record("d", "AUTO_20250821_112342348")).unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn clones_share_records() {
        let store = ExecutionStore::new();
        let handle = store.clone();
        store.insert(record("a", "AUTO_1")).unwrap();

        handle
            .update("a", |r| r.transition(ExecutionStatus::Running, Utc::now()))
            .unwrap();
        assert_eq!(store.get("a").unwrap().status, ExecutionStatus::Running);
    }

    #[test]
    fn terminal_records_never_move_back() {
        let store = ExecutionStore::new();
        store.insert(record("a", "AUTO_1")).unwrap();
        store
            .update("a", |r| r.finish(ExecutionOutcome::NoEvidence, Utc::now()))
            .unwrap();

        let err = store
            .update("a", |r| r.transition(ExecutionStatus::Running, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Transition(_)));
        assert_eq!(
            store.get("a").unwrap().status,
            ExecutionStatus::NoTasksDetected
        );
    }

    #[test]
    fn update_unknown_is_not_found() {
        let store = ExecutionStore::new();
        let err = store.update("nope", |_| Ok(())).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }
}
