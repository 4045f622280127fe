//! genpipe - generation pipeline orchestration CLI
//!
//! ## Commands
//!
//! - `run`: run a batch of the demo pipeline and summarise it
//! - `patterns`: re-rank the error patterns of a saved batch report
//! - `config`: print the default engine configuration

mod demo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use genpipe_core::{
    read_batch_report, render_batch_summary_md, write_batch_report, BatchReport, BatchRunner,
    EngineConfig, ErrorPatternAnalyzer,
};

#[derive(Parser)]
#[command(name = "genpipe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generation pipeline orchestration engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of the demo pipeline
    Run {
        /// Runs in the batch (default: batch.target_runs_per_batch)
        #[arg(short, long, env = "GENPIPE_RUNS")]
        runs: Option<usize>,

        /// Runs executing at once; 1 is sequential
        #[arg(short, long, env = "GENPIPE_CONCURRENCY")]
        concurrency: Option<usize>,

        /// Default retry budget per stage
        #[arg(long, env = "GENPIPE_MAX_RETRIES")]
        max_retries: Option<u32>,

        /// Engine config file (JSON)
        #[arg(long, env = "GENPIPE_CONFIG")]
        config: Option<PathBuf>,

        /// Directory to write the batch report into
        #[arg(long, env = "GENPIPE_REPORT_DIR")]
        report_dir: Option<PathBuf>,

        /// Error patterns to show
        #[arg(long, default_value = "10")]
        top: usize,

        /// Inject demo faults every N runs (0 disables)
        #[arg(long, default_value = "0")]
        fail_every: u64,
    },

    /// Show the top error patterns of a saved batch report
    Patterns {
        /// Path to a batch.json written by `run --report-dir`
        #[arg(long)]
        report: PathBuf,

        /// Error patterns to show
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Print the default engine configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    genpipe_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            runs,
            concurrency,
            max_retries,
            config,
            report_dir,
            top,
            fail_every,
        } => {
            let config = load_config(config.as_deref(), concurrency, max_retries)?;
            cmd_run(config, runs, report_dir.as_deref(), top, fail_every).await
        }
        Commands::Patterns { report, top } => cmd_patterns(&report, top),
        Commands::Config => cmd_config(),
    }
}

/// File values first, then flag overrides, then validation.
fn load_config(
    path: Option<&Path>,
    concurrency: Option<usize>,
    max_retries: Option<u32>,
) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("load config {:?}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(concurrency) = concurrency {
        config.batch.concurrency_limit = concurrency;
    }
    if let Some(max_retries) = max_retries {
        config.pipeline.default_max_retries = max_retries;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn cmd_run(
    config: EngineConfig,
    runs: Option<usize>,
    report_dir: Option<&Path>,
    top: usize,
    fail_every: u64,
) -> Result<()> {
    let runs = runs.unwrap_or(config.batch.target_runs_per_batch);
    let orchestrator = Arc::new(demo::pipeline(config.pipeline.clone(), fail_every));
    let runner = BatchRunner::new(orchestrator, config.batch.clone()).with_progress(|run, progress| {
        info!(
            run_id = %run.run_id,
            passed = run.passed,
            completed = progress.completed,
            target = progress.target,
            "run complete"
        );
    });

    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested; waiting for in-flight runs");
            stop.stop();
        }
    });

    let batch = runner.run(runs).await;
    let report = BatchReport::new(batch, top);

    println!("{}", render_batch_summary_md(&report));
    println!("{}", ErrorPatternAnalyzer::from_batch(&report.batch).feedback_prompt(top));

    if let Some(dir) = report_dir {
        let path = write_batch_report(dir, &report)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn cmd_patterns(path: &Path, top: usize) -> Result<()> {
    let report = read_batch_report(path)?;
    let analyzer = ErrorPatternAnalyzer::from_batch(&report.batch);

    println!(
        "Batch {}: {} runs, {} error records",
        report.batch.batch_id,
        report.batch.len(),
        analyzer.total_records()
    );
    println!();
    println!("{}", analyzer.feedback_prompt(top));
    Ok(())
}

fn cmd_config() -> Result<()> {
    let json = serde_json::to_string_pretty(&EngineConfig::default()).context("serialize config")?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "genpipe", "--json", "run", "--runs", "4", "--concurrency", "2", "--fail-every", "3",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                runs,
                concurrency,
                fail_every,
                top,
                ..
            } => {
                assert_eq!(runs, Some(4));
                assert_eq!(concurrency, Some(2));
                assert_eq!(fail_every, 3);
                assert_eq!(top, 10);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_flags_override_file_config() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{ "batch": {{ "concurrency_limit": 4 }}, "pipeline": {{ "default_max_retries": 1 }} }}"#)
            .expect("write");

        let config = load_config(Some(file.path()), None, Some(5)).expect("config");
        assert_eq!(config.batch.concurrency_limit, 4);
        assert_eq!(config.pipeline.default_max_retries, 5);

        assert!(load_config(None, Some(0), None).is_err());
    }

    #[tokio::test]
    async fn test_run_writes_report_that_patterns_can_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        cmd_run(EngineConfig::default(), Some(3), Some(dir.path()), 5, 1)
            .await
            .expect("run");

        let batch_dir = std::fs::read_dir(dir.path())
            .expect("read dir")
            .next()
            .expect("batch dir")
            .expect("entry")
            .path();
        let report = read_batch_report(&batch_dir.join("batch.json")).expect("read report");
        assert_eq!(report.batch.len(), 3);
        // Run 3 degrades on the unreachable room.
        assert_eq!(report.batch.failed_count, 1);
        cmd_patterns(&batch_dir.join("batch.json"), 5).expect("patterns");
    }
}
