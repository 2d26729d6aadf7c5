//! Interface de linha de comando do worklog baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (plan, run, verify)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// worklog: lança horas automatizadas e confirma que chegaram ao sistema de registro.
#[derive(Debug, Parser)]
#[command(name = "worklog", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./worklog.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Mostra a alocação que seria usada, sem lançar nada nem alterar o banco.
    Plan {
        /// Meta de horas (0 < h <= 24).
        #[arg(long)]
        hours: f64,
    },

    /// Executa a automação para uma ordem de serviço e aguarda o resultado verificado.
    Run {
        /// Identificador da ordem de serviço.
        #[arg(long)]
        target: i64,

        /// Meta de horas (0 < h <= 24).
        #[arg(long)]
        hours: f64,

        /// Limite de tempo em segundos (30 a 600); sobrescreve a configuração.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Verifica os lançamentos de uma execução anterior pelo marcador.
    Verify {
        /// Identificador da ordem de serviço.
        #[arg(long)]
        target: i64,

        /// Marcador da execução (ex.: AUTO_20250821_112332347).
        #[arg(long)]
        marker: String,

        /// Início da execução em RFC 3339.
        #[arg(long)]
        since: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["worklog", "run", "--target", "540030", "--hours", "8"]);
        match cli.command {
            Command::Run {
                target,
                hours,
                timeout,
            } => {
                assert_eq!(target, 540030);
                assert_eq!(hours, 8.0);
                assert!(timeout.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "worklog",
            "--config",
            "/etc/worklog.toml",
            "--verbose",
            "plan",
            "--hours",
            "7.5",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/worklog.toml")));
        assert!(matches!(cli.command, Command::Plan { hours } if hours == 7.5));
    }

    #[test]
    fn cli_parses_verify_subcommand() {
        let cli = Cli::parse_from([
            "worklog",
            "verify",
            "--target",
            "7",
            "--marker",
            "AUTO_20250821_112332347",
            "--since",
            "2025-08-21T11:23:32Z",
        ]);
        match cli.command {
            Command::Verify {
                target,
                marker,
                since,
            } => {
                assert_eq!(target, 7);
                assert_eq!(marker, "AUTO_20250821_112332347");
                assert_eq!(since.to_rfc3339(), "2025-08-21T11:23:32+00:00");
            }
            _ => panic!("expected Verify command"),
        }
    }

    #[test]
    fn cli_rejects_bad_timestamp() {
        let result = Cli::try_parse_from([
            "worklog", "verify", "--target", "7", "--marker", "X", "--since", "yesterday",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
