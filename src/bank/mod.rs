//! Task bank: the pool of candidate tasks work-log entries are drawn from.
//!
//! The bank is owned by an external source of truth. [`TaskBank`] is the seam
//! the orchestrator consumes; [`CsvTaskBank`] is the semicolon-delimited file
//! adapter.

mod csv_bank;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::allocation::BankAdjustment;
use crate::error::BankError;

pub use csv_bank::CsvTaskBank;

/// Source of candidate tasks.
pub trait TaskBank: Send + Sync {
    /// Reads a snapshot of every task in the bank.
    fn load(&self) -> Result<Vec<CandidateTask>, BankError>;

    /// Persists rewritten hours for one task. Implementations rewrite the
    /// whole bank so a failure never leaves it half written.
    fn apply_adjustment(&self, adjustment: &BankAdjustment) -> Result<(), BankError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Complexity {
    #[default]
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Accepts the labels used by the ticketing system as well as English names.
    /// Anything else falls back to `Low`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "média" | "media" | "medium" => Complexity::Medium,
            "alta" | "high" => Complexity::High,
            _ => Complexity::Low,
        }
    }

    /// Label as stored in the bank and selected in the ticketing form.
    pub fn label(self) -> &'static str {
        match self {
            Complexity::Low => "Baixa",
            Complexity::Medium => "Média",
            Complexity::High => "Alta",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTask {
    pub title: String,
    pub description: String,
    pub estimated_hours: f64,
    pub spent_hours: f64,
    pub complexity: Complexity,
}

impl CandidateTask {
    /// Copy of this task with both durations rewritten to `hours`.
    pub fn with_hours(&self, hours: f64) -> Self {
        Self {
            estimated_hours: hours,
            spent_hours: hours,
            ..self.clone()
        }
    }
}

/// Parses a duration as written in the bank: `1,5`, `1.5` or `1:30`.
/// Blank or malformed values count as zero hours.
pub fn parse_hours(value: &str) -> f64 {
    let value = value.trim();
    if value.is_empty() {
        return 0.0;
    }

    if let Some((hh, mm)) = value.split_once(':')
        && let (Ok(h), Ok(m)) = (hh.trim().parse::<u32>(), mm.trim().parse::<u32>())
    {
        return f64::from(h) + f64::from(m) / 60.0;
    }

    value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|h| h.is_finite() && *h >= 0.0)
        .unwrap_or(0.0)
}

/// Formats hours with a decimal comma and no trailing zeros (`7,5`, `2`).
pub fn format_hours(hours: f64) -> String {
    let fixed = format!("{hours:.4}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    trimmed.replace('.', ",")
}
