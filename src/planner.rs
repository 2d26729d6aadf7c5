//! Pre-flight validation: deduplication plus allocation, run before any
//! background work is launched.

use std::sync::Arc;

use serde::Serialize;

use crate::allocation::{
    Allocation, AllocationEngine, AllocationSummary, EPSILON, SINGLE_TASK_THRESHOLD,
};
use crate::bank::TaskBank;
use crate::dedup::{DedupReport, DuplicateFilter};
use crate::error::{OrchestratorError, ValidationError};

/// Largest hours target accepted for one run.
pub const MAX_HOURS: f64 = 24.0;

/// Rejects non-finite, non-positive or oversized hour targets.
pub fn validate_hours(hours: f64) -> Result<(), ValidationError> {
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_HOURS {
        return Err(ValidationError::HoursOutOfRange {
            value: hours,
            max: MAX_HOURS,
        });
    }
    Ok(())
}

/// Everything the pre-flight looked at, returned with both outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreflightAnalysis {
    pub dedup: DedupReport,
    pub required_hours: f64,
    pub available_hours: f64,
    pub available_tasks: usize,
    /// How many hours are missing; zero when the bank covers the target.
    pub hour_deficit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation: Option<AllocationSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub allocation: Allocation,
    pub analysis: PreflightAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Abort {
    pub abort_reason: String,
    pub analysis: PreflightAnalysis,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Preflight {
    Ready(Plan),
    Aborted(Abort),
}

pub struct Planner {
    bank: Arc<dyn TaskBank>,
    dedup: DuplicateFilter,
    engine: AllocationEngine,
    persist_adjustments: bool,
}

impl Planner {
    pub fn new(bank: Arc<dyn TaskBank>, dedup: DuplicateFilter, engine: AllocationEngine) -> Self {
        Self {
            bank,
            dedup,
            engine,
            persist_adjustments: true,
        }
    }

    /// Plans without writing fallback adjustments back to the bank.
    pub fn dry_run(mut self) -> Self {
        self.persist_adjustments = false;
        self
    }

    /// Validates `hours`, filters the bank and allocates.
    ///
    /// Bad input and an empty bank are errors. Running out of usable tasks
    /// after deduplication, or lacking hours, is a [`Preflight::Aborted`].
    pub fn prepare(&self, hours: f64) -> Result<Preflight, OrchestratorError> {
        validate_hours(hours)?;

        let candidates: Vec<_> = self
            .bank
            .load()?
            .into_iter()
            .filter(|t| t.spent_hours > 0.0)
            .collect();
        if candidates.is_empty() {
            return Err(ValidationError::NoCandidates.into());
        }

        let (kept, report) = self.dedup.filter(candidates);
        let available_hours: f64 = kept.iter().map(|t| t.spent_hours).sum();
        let mut analysis = PreflightAnalysis {
            dedup: report,
            required_hours: hours,
            available_hours,
            available_tasks: kept.len(),
            hour_deficit: 0.0,
            allocation: None,
        };

        if !analysis.dedup.can_proceed {
            return Ok(abort(
                "every candidate task was recently created".into(),
                analysis,
            ));
        }

        // Single-task targets stretch one task, so only larger ones need coverage.
        if hours > SINGLE_TASK_THRESHOLD && available_hours + EPSILON < hours {
            analysis.hour_deficit = hours - available_hours;
            return Ok(abort(
                format!(
                    "insufficient hours: {available_hours:.2}h available for {hours:.2}h requested"
                ),
                analysis,
            ));
        }

        let allocation = self.engine.allocate(&kept, hours)?;
        if let Some(adjustment) = &allocation.adjustment
            && self.persist_adjustments
            && let Err(err) = self.bank.apply_adjustment(adjustment)
        {
            tracing::warn!(
                title = %adjustment.title,
                hours = adjustment.hours,
                error = %err,
                "could not persist bank adjustment"
            );
        }

        analysis.allocation = Some(allocation.summary());
        tracing::info!(
            hours,
            strategy = ?allocation.strategy,
            tasks = allocation.tasks.len(),
            "pre-flight ready"
        );
        Ok(Preflight::Ready(Plan {
            allocation,
            analysis,
        }))
    }
}

fn abort(reason: String, analysis: PreflightAnalysis) -> Preflight {
    tracing::warn!(
        reason = %reason,
        required_hours = analysis.required_hours,
        available_hours = analysis.available_hours,
        "pre-flight aborted"
    );
    Preflight::Aborted(Abort {
        abort_reason: reason,
        analysis,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{MemoryBank, StaticTitles, task};
    use super::*;
    use crate::allocation::AllocationStrategy;
    use crate::dedup::DEFAULT_LOOKBACK;

    fn planner(bank: Arc<MemoryBank>, recent: &[&str]) -> Planner {
        let titles = StaticTitles(recent.iter().map(|t| t.to_string()).collect());
        Planner::new(
            bank,
            DuplicateFilter::new(Arc::new(titles), DEFAULT_LOOKBACK),
            AllocationEngine::default(),
        )
    }

    #[test]
    fn validate_hours_bounds() {
        assert!(validate_hours(8.0).is_ok());
        assert!(validate_hours(24.0).is_ok());
        assert!(validate_hours(0.0).is_err());
        assert!(validate_hours(-1.0).is_err());
        assert!(validate_hours(24.5).is_err());
        assert!(validate_hours(f64::NAN).is_err());
    }

    #[test]
    fn ready_plan_sums_to_target() {
        let bank = Arc::new(MemoryBank::with(vec![
            task("a", 3.0),
            task("b", 5.0),
            task("c", 2.0),
        ]));
        let outcome = planner(bank, &[]).prepare(8.0).unwrap();

        let Preflight::Ready(plan) = outcome else {
            panic!("expected a ready plan");
        };
        assert!((plan.allocation.total_hours() - 8.0).abs() < 1e-9);
        assert_eq!(plan.analysis.available_hours, 10.0);
        assert_eq!(plan.analysis.hour_deficit, 0.0);
        assert!(plan.analysis.allocation.is_some());
    }

    #[test]
    fn empty_bank_is_a_validation_error() {
        let bank = Arc::new(MemoryBank::with(vec![task("zero", 0.0)]));
        let err = planner(bank, &[]).prepare(8.0).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Validation(ValidationError::NoCandidates)
        ));
    }

    #[test]
    fn all_recent_aborts() {
        let bank = Arc::new(MemoryBank::with(vec![task("a", 3.0), task("b", 5.0)]));
        let outcome = planner(bank, &["a", "b"]).prepare(8.0).unwrap();

        let Preflight::Aborted(abort) = outcome else {
            panic!("expected an abort");
        };
        assert!(!abort.analysis.dedup.can_proceed);
        assert_eq!(abort.analysis.dedup.blocked_count, 2);
        assert!(abort.analysis.allocation.is_none());
    }

    #[test]
    fn insufficient_hours_abort_reports_deficit() {
        let bank = Arc::new(MemoryBank::with(vec![task("a", 3.0), task("b", 2.0)]));
        let outcome = planner(bank, &["b"]).prepare(8.0).unwrap();

        let Preflight::Aborted(abort) = outcome else {
            panic!("expected an abort");
        };
        assert!(abort.abort_reason.starts_with("insufficient hours"));
        assert_eq!(abort.analysis.hour_deficit, 5.0);
        assert_eq!(abort.analysis.available_tasks, 1);
    }

    #[test]
    fn small_target_skips_capacity_check() {
        let bank = Arc::new(MemoryBank::with(vec![task("a", 0.5)]));
        let outcome = planner(bank, &[]).prepare(2.0).unwrap();

        let Preflight::Ready(plan) = outcome else {
            panic!("expected a ready plan");
        };
        assert_eq!(plan.allocation.strategy, AllocationStrategy::SingleTask);
        assert_eq!(plan.allocation.tasks[0].spent_hours, 2.0);
    }

    #[test]
    fn fallback_adjustment_is_persisted() {
        let bank = Arc::new(MemoryBank::with(vec![task("a", 5.0), task("b", 4.0)]));
        let outcome = planner(bank.clone(), &[]).prepare(8.0).unwrap();

        let Preflight::Ready(plan) = outcome else {
            panic!("expected a ready plan");
        };
        assert_eq!(plan.allocation.strategy, AllocationStrategy::Fallback);
        let adjustments = bank.adjustments.lock().unwrap();
        assert_eq!(adjustments.len(), 1);
        assert_eq!(adjustments[0].title, "a");
        assert_eq!(adjustments[0].hours, 8.0);
    }

    #[test]
    fn dry_run_does_not_touch_the_bank() {
        let bank = Arc::new(MemoryBank::with(vec![task("a", 5.0), task("b", 4.0)]));
        planner(bank.clone(), &[]).dry_run().prepare(8.0).unwrap();
        assert!(bank.adjustments.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_adjustment_still_plans() {
        let bank = Arc::new(MemoryBank {
            tasks: vec![task("a", 5.0), task("b", 4.0)],
            fail_writes: true,
            ..Default::default()
        });
        let outcome = planner(bank, &[]).prepare(8.0).unwrap();
        assert!(matches!(outcome, Preflight::Ready(_)));
    }
}
