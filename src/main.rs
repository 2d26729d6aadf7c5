mod cli;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use ui::{ExecutionProgress, print_json};
use worklog::allocation::AllocationEngine;
use worklog::automation::ProcessAutomation;
use worklog::bank::CsvTaskBank;
use worklog::cache::DirectoryCache;
use worklog::config::Config;
use worklog::dedup::DuplicateFilter;
use worklog::orchestrator::{Collaborators, ExecutionOrchestrator, SyncOutcome, validate_timeout};
use worklog::planner::{Planner, Preflight};
use worklog::record_system::SqliteSystemOfRecord;
use worklog::state_machine::{ExecutionStatus, Marker, TargetId};
use worklog::verifier::Verifier;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Plan { hours } => plan(&config, hours),
        Command::Run {
            target,
            hours,
            timeout,
        } => run(config, TargetId(target), hours, timeout).await,
        Command::Verify {
            target,
            marker,
            since,
        } => {
            let records = Arc::new(SqliteSystemOfRecord::new(&config.database_path));
            let verifier = Verifier::new(
                records,
                TimeDelta::seconds(config.verification.lookback_secs),
            );
            let entries = verifier
                .verify(TargetId(target), &Marker::new(marker), since)
                .context("querying the system of record")?;
            let hours: f64 = entries.iter().map(|e| e.spent_hours).sum();
            println!("{} entries verified, {hours:.2}h logged", entries.len());
            print_json("Verified entries", &entries);
            Ok(if entries.is_empty() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn plan(config: &Config, hours: f64) -> Result<ExitCode> {
    let records = Arc::new(SqliteSystemOfRecord::new(&config.database_path));
    let planner = Planner::new(
        Arc::new(CsvTaskBank::new(&config.bank_path)),
        DuplicateFilter::new(records, config.allocation.recent_lookback),
        AllocationEngine::new(config.allocation.trials),
    )
    .dry_run();

    match planner.prepare(hours)? {
        Preflight::Ready(plan) => {
            print_json("Pre-flight analysis", &plan.analysis);
            Ok(ExitCode::SUCCESS)
        }
        Preflight::Aborted(abort) => {
            println!("Aborted: {}", abort.abort_reason);
            print_json("Pre-flight analysis", &abort.analysis);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(
    mut config: Config,
    target: TargetId,
    hours: f64,
    timeout: Option<u64>,
) -> Result<ExitCode> {
    if let Some(secs) = timeout {
        validate_timeout(Duration::from_secs(secs))?;
        config.automation.timeout_secs = secs;
    }

    let records = Arc::new(SqliteSystemOfRecord::new(&config.database_path));
    let collaborators = Collaborators {
        bank: Arc::new(CsvTaskBank::new(&config.bank_path)),
        recent: records.clone(),
        records,
        automation: Arc::new(ProcessAutomation {
            program: config.automation.program.clone(),
            args: config.automation.args.clone(),
            working_dir: config.automation.working_dir.clone(),
            log_path: config.automation.log_path.clone(),
        }),
        cache: Arc::new(DirectoryCache::new(&config.cache_dir)),
    };
    let orchestrator = ExecutionOrchestrator::new(collaborators, config.orchestrator_settings());

    let mut progress = ExecutionProgress::start(&format!("{target}: {hours}h"));
    let outcome = orchestrator
        .run_until_terminal_observed(target, hours, |record| progress.observe(record))
        .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(err) => {
            progress.abandon("execution failed to start");
            return Err(err.into());
        }
    };

    match &outcome {
        SyncOutcome::Aborted { abort_reason, .. } => {
            progress.abandon(&format!("Aborted: {abort_reason}"));
            print_json("Result", &outcome);
            Ok(ExitCode::FAILURE)
        }
        SyncOutcome::Finished { execution, .. } => {
            let status = execution.record.status;
            progress.complete(status, &execution.summary.message);
            print_json("Result", &outcome);
            Ok(if status == ExecutionStatus::Success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        SyncOutcome::TimedOut { message, .. } => {
            progress.abandon(message);
            print_json("Result", &outcome);
            Ok(ExitCode::FAILURE)
        }
    }
}
