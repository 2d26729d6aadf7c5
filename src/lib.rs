//! Automated work-log filling with independent verification.
//!
//! The [`orchestrator::ExecutionOrchestrator`] picks bank tasks adding up to a
//! daily hours target, hands them to an external automation, then confirms in
//! the system of record that the entries really landed.

pub mod allocation;
pub mod automation;
pub mod bank;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod record_system;
pub mod state_machine;
pub mod store;
pub mod verifier;
