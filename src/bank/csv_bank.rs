use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{CandidateTask, Complexity, TaskBank, format_hours, parse_hours};
use crate::allocation::BankAdjustment;
use crate::error::BankError;

/// Column layout of the bank file, semicolon separated.
#[derive(Debug, Serialize, Deserialize)]
struct BankRow {
    titulo: String,
    #[serde(default)]
    descricao: String,
    #[serde(default)]
    tempo_estimado: String,
    #[serde(default)]
    tempo_gasto: String,
    #[serde(default)]
    complexidade: String,
}

impl From<BankRow> for CandidateTask {
    fn from(row: BankRow) -> Self {
        Self {
            title: row.titulo.trim().to_string(),
            description: row.descricao,
            estimated_hours: parse_hours(&row.tempo_estimado),
            spent_hours: parse_hours(&row.tempo_gasto),
            complexity: Complexity::parse(&row.complexidade),
        }
    }
}

impl From<&CandidateTask> for BankRow {
    fn from(task: &CandidateTask) -> Self {
        Self {
            titulo: task.title.clone(),
            descricao: task.description.clone(),
            tempo_estimado: format_hours(task.estimated_hours),
            tempo_gasto: format_hours(task.spent_hours),
            complexidade: task.complexity.label().to_string(),
        }
    }
}

/// Task bank stored as a semicolon-delimited CSV file.
pub struct CsvTaskBank {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl CsvTaskBank {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> Result<Vec<CandidateTask>, BankError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::Headers)
            .from_path(&self.path)?;

        let mut tasks = Vec::new();
        for row in reader.deserialize::<BankRow>() {
            tasks.push(CandidateTask::from(row?));
        }
        Ok(tasks)
    }

    /// Writes every task to a sibling temp file, then renames it over the bank.
    fn rewrite(&self, tasks: &[CandidateTask]) -> Result<(), BankError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b';')
                .from_path(&tmp)?;
            for task in tasks {
                writer.serialize(BankRow::from(task))?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), rows = tasks.len(), "task bank rewritten");
        Ok(())
    }
}

impl TaskBank for CsvTaskBank {
    fn load(&self) -> Result<Vec<CandidateTask>, BankError> {
        let tasks = self.read_rows()?;
        tracing::debug!(path = %self.path.display(), tasks = tasks.len(), "task bank loaded");
        Ok(tasks)
    }

    fn apply_adjustment(&self, adjustment: &BankAdjustment) -> Result<(), BankError> {
        let _guard = self.write_lock.lock().map_err(|_| BankError::Poisoned)?;

        let mut tasks = self.read_rows()?;
        let mut found = false;
        for task in tasks.iter_mut().filter(|t| t.title == adjustment.title) {
            *task = task.with_hours(adjustment.hours);
            found = true;
        }
        if !found {
            return Err(BankError::UnknownTitle(adjustment.title.clone()));
        }

        self.rewrite(&tasks)?;
        tracing::info!(
            title = %adjustment.title,
            hours = adjustment.hours,
            "persisted task hour adjustment"
        );
        Ok(())
    }
}
