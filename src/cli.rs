//! Interface de linha de comando do simwatch baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, validate)
//! e flags globais (--max-parallel, --poll-ms, --verbose).

use clap::{Parser, Subcommand};

/// simwatch — Supervisão de jobs de simulação de longa duração.
#[derive(Debug, Parser)]
#[command(name = "simwatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Máximo de jobs externos executando simultaneamente.
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    /// Intervalo em milissegundos entre varreduras da saída.
    #[arg(long, global = true)]
    pub poll_ms: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um job supervisionado descrito em um arquivo TOML.
    Run {
        /// Caminho para o arquivo TOML com a definição do job.
        #[arg(long)]
        file: String,
    },

    /// Valida a definição de um job sem lançar o processo.
    Validate {
        /// Caminho para o arquivo TOML com a definição do job.
        #[arg(long)]
        file: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["simwatch", "run", "--file", "job.toml"]);
        match cli.command {
            Command::Run { file } => assert_eq!(file, "job.toml"),
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "simwatch",
            "--max-parallel",
            "8",
            "--poll-ms",
            "500",
            "--verbose",
            "validate",
            "--file",
            "job.toml",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.max_parallel, Some(8));
        assert_eq!(cli.poll_ms, Some(500));
        assert!(matches!(cli.command, Command::Validate { .. }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
