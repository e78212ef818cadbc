use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use simwatch::cli::{Cli, Command};
use simwatch::config::SimwatchConfig;
use simwatch::handlers::builtin::stock_registry;
use simwatch::job::{JobRunner, JobSpec, NullMaterializer};
use simwatch::monitor::MonitorConfig;
use simwatch::ui::JobProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SimwatchConfig::load()?;
    if let Some(max_parallel) = cli.max_parallel {
        config.max_parallel = max_parallel;
    }
    if let Some(poll_ms) = cli.poll_ms {
        config.poll_interval_ms = poll_ms;
    }

    match cli.command {
        Command::Run { file } => run_job(&file, &config, cli.verbose).await,
        Command::Validate { file } => validate_job(&file, &config),
    }
}

fn load_spec(file: &str) -> Result<JobSpec> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read job file {file}"))?;
    let spec: JobSpec =
        toml::from_str(&contents).with_context(|| format!("failed to parse job file {file}"))?;
    Ok(spec)
}

fn make_runner(config: &SimwatchConfig) -> JobRunner {
    JobRunner::new(
        Arc::new(stock_registry()),
        Arc::new(NullMaterializer),
        MonitorConfig::from_config(config),
    )
}

async fn run_job(file: &str, config: &SimwatchConfig, verbose: bool) -> Result<()> {
    let spec = load_spec(file)?;
    let runner = make_runner(config);

    let progress = JobProgress::start(&spec.name);
    let future = runner.submit(spec)?;
    let result = future.wait().await;

    progress.complete(&result.outcome);
    if verbose || !result.succeeded() {
        progress.print_audit(&result);
    }

    if !result.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_job(file: &str, config: &SimwatchConfig) -> Result<()> {
    let spec = load_spec(file)?;
    let runner = make_runner(config);
    runner.validate(&spec)?;
    println!("✓ job '{}' is valid", spec.name);
    Ok(())
}
