//! Interface de terminal do simwatch — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`JobProgress`] acompanha visualmente
//! a supervisão de um job no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::job::{JobOutcome, JobResult};
use crate::monitor::MonitorState;

/// Indicador visual de progresso para a supervisão de um job no terminal.
///
/// Exibe um spinner animado enquanto o processo externo roda e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e correção (amarelo).
pub struct JobProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para correções e cancelamentos.
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner com o nome do job e retorna a instância de progresso.
    pub fn start(name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        pb.set_message(format!("STARTING: {name}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o estado atual.
    pub fn update_state(&self, state: MonitorState) {
        self.pb.set_message(format!("{state}"));
    }

    /// Exibe uma correção aplicada com o handler responsável.
    pub fn correction(&self, handler: &str, description: &str) {
        self.pb.println(format!(
            "  {} {handler}: {description}",
            self.yellow.apply_to("↻")
        ));
    }

    /// Finaliza o spinner e exibe o resultado terminal do job.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X;
    /// cancelamento em amarelo.
    pub fn complete(&self, outcome: &JobOutcome) {
        self.pb.finish_and_clear();
        match outcome {
            JobOutcome::Succeeded => {
                println!("  {} Job completed successfully", self.green.apply_to("✓"));
            }
            JobOutcome::Failed(cause) => {
                println!("  {} Job failed: {}", self.red.apply_to("✗"), cause.kind);
            }
            JobOutcome::Aborted => {
                println!("  {} Job aborted", self.yellow.apply_to("∅"));
            }
        }
    }

    /// Imprime o registro terminal do job formatado em JSON com estilo colorido.
    pub fn print_audit(&self, result: &JobResult) {
        let status_style = match result.outcome {
            JobOutcome::Succeeded => &self.green,
            JobOutcome::Failed(_) => &self.red,
            JobOutcome::Aborted => &self.yellow,
        };
        println!();
        println!("{}", status_style.apply_to("─── Job Record ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(result).unwrap_or_default()
        );
    }
}
