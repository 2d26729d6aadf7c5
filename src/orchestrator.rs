//! Execution orchestrator: pre-flight, background supervision of the external
//! automation, independent verification and the polling contract.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::time::{Instant, sleep, timeout};
use uuid::Uuid;

use crate::allocation::{AllocationEngine, AllocationSummary, DEFAULT_TRIALS};
use crate::automation::{Automation, Handoff, HandoffFiles};
use crate::bank::TaskBank;
use crate::cache::CacheFacade;
use crate::dedup::{DEFAULT_LOOKBACK, DuplicateFilter};
use crate::error::{OrchestratorError, StoreError, ValidationError};
use crate::planner::{Planner, Preflight, PreflightAnalysis, validate_hours};
use crate::record_system::{RecentTitles, SystemOfRecord};
use crate::state_machine::{
    ExecutionOutcome, ExecutionRecord, ExecutionStatus, ExecutionSummary, Marker, TargetId,
};
use crate::store::ExecutionStore;
use crate::verifier::{DEFAULT_LOOKBACK_SECS, Verifier};

pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

// Attempts at a fresh marker before giving up.
const MARKER_ATTEMPTS: i64 = 5;

/// Time allowed for the verification query after the settle pause.
pub const VERIFY_MARGIN: Duration = Duration::from_secs(30);

/// Rejects operation timeouts outside 30..=600 seconds.
pub fn validate_timeout(timeout: Duration) -> Result<(), ValidationError> {
    let secs = timeout.as_secs();
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&secs) || timeout.subsec_nanos() != 0 {
        return Err(ValidationError::TimeoutOutOfRange {
            value: secs,
            min: MIN_TIMEOUT_SECS,
            max: MAX_TIMEOUT_SECS,
        });
    }
    Ok(())
}

/// External systems the orchestrator talks to.
pub struct Collaborators {
    pub bank: Arc<dyn TaskBank>,
    pub recent: Arc<dyn RecentTitles>,
    pub records: Arc<dyn SystemOfRecord>,
    pub automation: Arc<dyn Automation>,
    pub cache: Arc<dyn CacheFacade>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wall-clock limit for one automation run.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Pause between a successful exit and verification.
    pub settle: Duration,
    /// Backward margin of the verification window.
    pub lookback: TimeDelta,
    pub trials: u32,
    pub recent_lookback: usize,
    pub handoff: HandoffFiles,
}

impl OrchestratorSettings {
    /// Upper bound on how long a worker takes to reach a terminal status:
    /// the automation limit, the settle pause and the verification margin.
    pub fn completion_wait(&self) -> Duration {
        self.timeout + self.settle + VERIFY_MARGIN
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(2),
            settle: Duration::from_secs(5),
            lookback: TimeDelta::seconds(DEFAULT_LOOKBACK_SECS),
            trials: DEFAULT_TRIALS,
            recent_lookback: DEFAULT_LOOKBACK,
            handoff: HandoffFiles::new("last_request.txt", "last_hours.txt"),
        }
    }
}

/// Reply to [`ExecutionOrchestrator::start`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartResponse {
    Started {
        execution_id: String,
        target_id: TargetId,
        hours_target: f64,
        marker: Marker,
        started_at: DateTime<Utc>,
        plan: AllocationSummary,
    },
    /// Pre-flight refused the run; nothing was launched or recorded.
    Aborted {
        abort_reason: String,
        analysis: PreflightAnalysis,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionView {
    #[serde(flatten)]
    pub record: ExecutionRecord,
    pub summary: ExecutionSummary,
}

/// Reply to [`ExecutionOrchestrator::get_result`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PollResponse {
    Found(Box<ExecutionView>),
    NotFound {
        status: &'static str,
        execution_id: String,
        error: String,
    },
}

impl PollResponse {
    pub fn status(&self) -> Option<ExecutionStatus> {
        match self {
            PollResponse::Found(view) => Some(view.record.status),
            PollResponse::NotFound { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Aborted {
        abort_reason: String,
        analysis: PreflightAnalysis,
    },
    Finished {
        execution: ExecutionView,
        execution_time_secs: f64,
    },
    /// The caller stopped waiting before the execution reached a terminal status.
    #[serde(rename = "timeout")]
    TimedOut {
        execution_id: String,
        marker: Marker,
        timeout_secs: u64,
        message: String,
    },
}

struct Inner {
    planner: Planner,
    verifier: Verifier,
    automation: Arc<dyn Automation>,
    cache: Arc<dyn CacheFacade>,
    store: ExecutionStore,
    settings: OrchestratorSettings,
}

/// Runs executions in the background and answers polls about them.
///
/// Each `start` gets its own worker task. Runs against the same target are
/// not serialized.
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    inner: Arc<Inner>,
}

impl ExecutionOrchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        let planner = Planner::new(
            collaborators.bank,
            DuplicateFilter::new(collaborators.recent, settings.recent_lookback),
            AllocationEngine::new(settings.trials),
        );
        let verifier = Verifier::new(collaborators.records, settings.lookback);
        Self {
            inner: Arc::new(Inner {
                planner,
                verifier,
                automation: collaborators.automation,
                cache: collaborators.cache,
                store: ExecutionStore::new(),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Runs the pre-flight and, when it passes, launches the automation in the
    /// background. Returns without waiting for the automation.
    pub async fn start(
        &self,
        target: TargetId,
        hours: f64,
    ) -> Result<StartResponse, OrchestratorError> {
        validate_hours(hours)?;

        let inner = Arc::clone(&self.inner);
        let preflight = tokio::task::spawn_blocking(move || inner.planner.prepare(hours))
            .await
            .map_err(|err| OrchestratorError::Worker(err.to_string()))??;

        let plan = match preflight {
            Preflight::Aborted(abort) => {
                return Ok(StartResponse::Aborted {
                    abort_reason: abort.abort_reason,
                    analysis: abort.analysis,
                });
            }
            Preflight::Ready(plan) => plan,
        };

        let record = self.register(target, hours, plan.allocation.summary(), Utc::now())?;
        let handoff = Handoff {
            target_id: target,
            marker: record.marker.clone(),
            hours_target: hours,
        };

        if let Err(err) = self.inner.settings.handoff.write(&handoff) {
            let message = format!("failed to write hand-off: {err}");
            if let Err(store_err) = self.inner.store.update(&record.execution_id, |r| {
                r.finish(ExecutionOutcome::Failed(message), Utc::now())
            }) {
                tracing::error!(execution_id = %record.execution_id, error = %store_err, "could not record hand-off failure");
            }
            return Err(OrchestratorError::Handoff(err));
        }

        tracing::info!(
            execution_id = %record.execution_id,
            target_id = %target,
            marker = %record.marker,
            hours,
            tasks = record.plan.tasks.len(),
            "execution started"
        );

        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            record.execution_id.clone(),
            handoff,
            record.started_at,
        ));

        Ok(StartResponse::Started {
            execution_id: record.execution_id,
            target_id: target,
            hours_target: hours,
            marker: record.marker,
            started_at: record.started_at,
            plan: record.plan,
        })
    }

    /// Pure read of the execution record. Unknown ids are reported, not raised.
    pub fn get_result(&self, execution_id: &str) -> PollResponse {
        match self.inner.store.get(execution_id) {
            Some(record) => PollResponse::Found(Box::new(ExecutionView {
                summary: ExecutionSummary::from_record(&record),
                record,
            })),
            None => PollResponse::NotFound {
                status: "not_found",
                execution_id: execution_id.to_string(),
                error: format!("execution {execution_id} not found"),
            },
        }
    }

    /// `start` followed by polling until a terminal status or `op_timeout`.
    pub async fn run_sync(
        &self,
        target: TargetId,
        hours: f64,
        op_timeout: Duration,
    ) -> Result<SyncOutcome, OrchestratorError> {
        self.run_sync_observed(target, hours, op_timeout, |_| {}).await
    }

    /// Like [`run_sync`](Self::run_sync), calling `observer` with every polled record.
    pub async fn run_sync_observed<F>(
        &self,
        target: TargetId,
        hours: f64,
        op_timeout: Duration,
        observer: F,
    ) -> Result<SyncOutcome, OrchestratorError>
    where
        F: FnMut(&ExecutionRecord),
    {
        validate_timeout(op_timeout)?;
        self.wait_for(target, hours, op_timeout, observer).await
    }

    /// `start` followed by polling until the worker reaches a terminal status.
    /// The wait is bounded by [`OrchestratorSettings::completion_wait`], so a
    /// hung automation comes back as `Finished` with status `timeout`.
    pub async fn run_until_terminal(
        &self,
        target: TargetId,
        hours: f64,
    ) -> Result<SyncOutcome, OrchestratorError> {
        self.run_until_terminal_observed(target, hours, |_| {}).await
    }

    pub async fn run_until_terminal_observed<F>(
        &self,
        target: TargetId,
        hours: f64,
        observer: F,
    ) -> Result<SyncOutcome, OrchestratorError>
    where
        F: FnMut(&ExecutionRecord),
    {
        let wait = self.inner.settings.completion_wait();
        self.wait_for(target, hours, wait, observer).await
    }

    async fn wait_for<F>(
        &self,
        target: TargetId,
        hours: f64,
        op_timeout: Duration,
        mut observer: F,
    ) -> Result<SyncOutcome, OrchestratorError>
    where
        F: FnMut(&ExecutionRecord),
    {
        let began = Instant::now();
        let deadline = began + op_timeout;

        let (execution_id, marker) = match self.start(target, hours).await? {
            StartResponse::Aborted {
                abort_reason,
                analysis,
            } => {
                return Ok(SyncOutcome::Aborted {
                    abort_reason,
                    analysis,
                });
            }
            StartResponse::Started {
                execution_id,
                marker,
                ..
            } => (execution_id, marker),
        };

        loop {
            if let PollResponse::Found(view) = self.get_result(&execution_id) {
                observer(&view.record);
                if view.record.status.is_terminal() {
                    return Ok(SyncOutcome::Finished {
                        execution: *view,
                        execution_time_secs: began.elapsed().as_secs_f64(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    execution_id = %execution_id,
                    timeout_secs = op_timeout.as_secs(),
                    "stopped waiting for execution"
                );
                return Ok(SyncOutcome::TimedOut {
                    message: format!(
                        "execution did not finish within {}s",
                        op_timeout.as_secs()
                    ),
                    execution_id,
                    marker,
                    timeout_secs: op_timeout.as_secs(),
                });
            }
            sleep(self.inner.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Inserts a fresh record, stepping the marker forward one millisecond
    /// while it (or its short form on this target) is already taken.
    fn register(
        &self,
        target: TargetId,
        hours: f64,
        plan: AllocationSummary,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, OrchestratorError> {
        let mut last_err = None;

        for attempt in 0..MARKER_ATTEMPTS {
            let marker = Marker::from_time(started_at + TimeDelta::milliseconds(attempt));
            let record = ExecutionRecord::new(
                Uuid::new_v4().to_string(),
                target,
                hours,
                marker,
                plan.clone(),
                started_at,
            );
            match self.inner.store.insert(record.clone()) {
                Ok(()) => return Ok(record),
                Err(
                    err @ (StoreError::DuplicateMarker(_)
                    | StoreError::DuplicateShortMarker { .. }),
                ) => {
                    tracing::debug!(error = %err, "marker collision, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_err
            .unwrap_or_else(|| StoreError::DuplicateMarker(String::new()))
            .into())
    }
}

/// Background worker owning one execution from `running` to a terminal status.
async fn supervise(
    inner: Arc<Inner>,
    execution_id: String,
    handoff: Handoff,
    started_at: DateTime<Utc>,
) {
    if let Err(err) = inner.store.update(&execution_id, |r| {
        r.transition(ExecutionStatus::Running, Utc::now())
    }) {
        tracing::error!(execution_id = %execution_id, error = %err, "could not mark execution running");
        return;
    }

    let limit = inner.settings.timeout;
    let outcome = match timeout(limit, inner.automation.launch(&handoff)).await {
        Err(_) => ExecutionOutcome::TimedOut(format!(
            "automation did not finish within {}s",
            limit.as_secs()
        )),
        Ok(Err(err)) => ExecutionOutcome::Failed(err.to_string()),
        Ok(Ok(result)) if !result.success() => ExecutionOutcome::Failed(match result.exit_code {
            Some(code) => format!("automation exited with code {code}"),
            None => "automation terminated by signal".to_string(),
        }),
        Ok(Ok(_)) => {
            sleep(inner.settings.settle).await;
            verify(&inner, &handoff, started_at).await
        }
    };

    let status = outcome.status();
    match inner
        .store
        .update(&execution_id, |r| r.finish(outcome, Utc::now()))
    {
        Ok(record) => tracing::info!(
            execution_id = %execution_id,
            status = %record.status,
            entries = record.verified_entries.len(),
            verified_hours = record.verified_hours(),
            error = ?record.error,
            "execution finished"
        ),
        Err(err) => {
            tracing::error!(execution_id = %execution_id, error = %err, "could not finish execution");
            return;
        }
    }

    if status == ExecutionStatus::Success
        && let Err(err) = inner.cache.invalidate_all()
    {
        tracing::warn!(execution_id = %execution_id, error = %err, "cache invalidation failed");
    }
}

async fn verify(
    inner: &Arc<Inner>,
    handoff: &Handoff,
    started_at: DateTime<Utc>,
) -> ExecutionOutcome {
    let worker = Arc::clone(inner);
    let target = handoff.target_id;
    let marker = handoff.marker.clone();

    match tokio::task::spawn_blocking(move || worker.verifier.verify(target, &marker, started_at))
        .await
    {
        Ok(Ok(entries)) => ExecutionOutcome::from_verification(entries),
        Ok(Err(err)) => ExecutionOutcome::Failed(format!("verification failed: {err}")),
        Err(err) => ExecutionOutcome::Failed(format!("verification task failed: {err}")),
    }
}
