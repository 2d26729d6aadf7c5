//! Interface de terminal do worklog: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`ExecutionProgress`] acompanha visualmente
//! uma execução enquanto ela é consultada.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use worklog::state_machine::{ExecutionRecord, ExecutionStatus};

/// Indicador visual de progresso de uma execução no terminal.
///
/// Exibe um spinner enquanto a automação roda e mensagens coloridas para
/// sucesso (verde), falha (vermelho) e resultados sem evidência (amarelo).
pub struct ExecutionProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    last_status: Option<ExecutionStatus>,
}

impl ExecutionProgress {
    /// Inicia o spinner com a descrição da execução.
    pub fn start(description: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(description.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            last_status: None,
        }
    }

    /// Atualiza o spinner quando o status muda.
    pub fn observe(&mut self, record: &ExecutionRecord) {
        if self.last_status == Some(record.status) {
            return;
        }
        self.last_status = Some(record.status);
        self.pb
            .set_message(format!("{} [{}]", record.status, record.marker));
    }

    /// Finaliza o spinner e exibe o resultado.
    pub fn complete(&self, status: ExecutionStatus, message: &str) {
        self.pb.finish_and_clear();
        match status {
            ExecutionStatus::Success => println!("  {} {message}", self.green.apply_to("✓")),
            ExecutionStatus::NoTasksDetected => {
                println!("  {} {message}", self.yellow.apply_to("?"))
            }
            _ => println!("  {} {message}", self.red.apply_to("✗")),
        }
    }

    /// Finaliza o spinner com um aviso (execução abortada ou espera expirada).
    pub fn abandon(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.yellow.apply_to("!"));
    }
}

/// Imprime um valor em JSON com um título colorido.
pub fn print_json<T: Serialize>(title: &str, value: &T) {
    let style = Style::new().cyan().bold();
    println!();
    println!("{}", style.apply_to(format!("─── {title} ───")));
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
