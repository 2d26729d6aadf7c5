//! Configuração do worklog carregada a partir de `worklog.toml`.
//!
//! A struct [`Config`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `WORKLOG_DATABASE` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use serde::Deserialize;

use crate::allocation::{DEFAULT_TRIALS, MIN_TRIALS};
use crate::automation::HandoffFiles;
use crate::dedup::DEFAULT_LOOKBACK;
use crate::orchestrator::{
    DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS, OrchestratorSettings,
};
use crate::verifier::DEFAULT_LOOKBACK_SECS;

pub const CONFIG_FILE: &str = "worklog.toml";
pub const DATABASE_ENV: &str = "WORKLOG_DATABASE";

/// Configuração de nível superior carregada de `worklog.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Arquivo CSV do banco de tarefas.
    #[serde(default = "default_bank_path")]
    pub bank_path: PathBuf,

    /// Banco SQLite do sistema de registro.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Diretório do cache persistente invalidado após sucesso.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Intervalo entre consultas da variante síncrona.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub allocation: AllocationConfig,

    #[serde(default)]
    pub automation: AutomationConfig,

    #[serde(default)]
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    /// Tentativas da busca aleatória (mínimo 2000).
    #[serde(default = "default_trials")]
    pub trials: u32,

    /// Quantas tarefas recentes bloqueiam títulos repetidos.
    #[serde(default = "default_recent_lookback")]
    pub recent_lookback: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    /// Executável da automação.
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Log onde a saída da automação é anexada.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Arquivo com `<alvo>|<marcador>` lido pela automação.
    #[serde(default = "default_request_file")]
    pub request_file: PathBuf,

    /// Arquivo com a meta de horas.
    #[serde(default = "default_hours_file")]
    pub hours_file: PathBuf,

    /// Limite de tempo de uma execução, entre 30 e 600 segundos.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationConfig {
    /// Margem para trás da janela de verificação.
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: i64,

    /// Espera entre o fim da automação e a verificação.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

fn default_bank_path() -> PathBuf {
    PathBuf::from("Banco_Tarefas.csv")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("servicedesk.db")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

// Valor padrão do intervalo de consulta: 2s.
fn default_poll_interval_secs() -> u64 {
    2
}

fn default_trials() -> u32 {
    DEFAULT_TRIALS
}

fn default_recent_lookback() -> usize {
    DEFAULT_LOOKBACK
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["automation/main.py".to_string()]
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs/automation.log")
}

fn default_request_file() -> PathBuf {
    PathBuf::from("last_request.txt")
}

fn default_hours_file() -> PathBuf {
    PathBuf::from("last_hours.txt")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_lookback_secs() -> i64 {
    DEFAULT_LOOKBACK_SECS
}

// Valor padrão da espera antes de verificar: 5s.
fn default_settle_secs() -> u64 {
    5
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            recent_lookback: default_recent_lookback(),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            log_path: default_log_path(),
            request_file: default_request_file(),
            hours_file: default_hours_file(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            lookback_secs: default_lookback_secs(),
            settle_secs: default_settle_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bank_path: default_bank_path(),
            database_path: default_database_path(),
            cache_dir: default_cache_dir(),
            poll_interval_secs: default_poll_interval_secs(),
            allocation: AllocationConfig::default(),
            automation: AutomationConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

impl Config {
    /// Carrega a configuração de `path` ou de `worklog.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_toml(&contents).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo para o banco de registro.
        config.apply_database_override(std::env::var(DATABASE_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(contents)?)
    }

    fn apply_database_override(&mut self, value: Option<String>) {
        if let Some(path) = value
            && !path.is_empty()
        {
            self.database_path = PathBuf::from(path);
        }
    }

    /// Rejeita limites fora das faixas aceitas.
    pub fn validate(&self) -> Result<()> {
        let timeout = self.automation.timeout_secs;
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout) {
            bail!(
                "automation.timeout_secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {timeout}"
            );
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.verification.lookback_secs < 0 {
            bail!("verification.lookback_secs must not be negative");
        }
        if self.allocation.trials < MIN_TRIALS {
            tracing::warn!(
                trials = self.allocation.trials,
                min = MIN_TRIALS,
                "allocation.trials below minimum, using the minimum"
            );
        }
        Ok(())
    }

    pub fn handoff_files(&self) -> HandoffFiles {
        HandoffFiles::new(&self.automation.request_file, &self.automation.hours_file)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            timeout: Duration::from_secs(self.automation.timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            settle: Duration::from_secs(self.verification.settle_secs),
            lookback: TimeDelta::seconds(self.verification.lookback_secs),
            trials: self.allocation.trials,
            recent_lookback: self.allocation.recent_lookback,
            handoff: self.handoff_files(),
        }
    }
}
