//! Evaluation scheduler for a Hydra build farm.
//!
//! Decides when each enabled jobset should be re-evaluated, launches
//! the evaluation subprocess, and records the outcome.

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use hydra_core::JobsetName;
use hydra_db::{create_pool, JobsetStore, PgJobsetStore};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod monitor;
mod reaper;
mod scheduler;
mod state;

use config::EvaluatorConfig;
use scheduler::Evaluator;

#[derive(Parser)]
#[command(
    name = "hydra-evaluator",
    about = "Decides when jobsets get evaluated and runs the evaluations"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum number of concurrently running evaluations (minimum 1)
    #[arg(
        long,
        env = "HYDRA_MAX_CONCURRENT_EVALS",
        default_value_t = config::DEFAULT_MAX_CONCURRENT_EVALS
    )]
    max_concurrent_evals: usize,

    /// Program executed as `<program> <project> <jobset>` per evaluation
    #[arg(long, env = "HYDRA_EVAL_PROGRAM", default_value = config::DEFAULT_EVAL_PROGRAM)]
    eval_program: String,

    /// Release start markers left by a crashed scheduler, then exit
    #[arg(long)]
    unlock: bool,

    /// Evaluate exactly this jobset once and exit
    #[arg(value_names = ["PROJECT", "JOBSET"], num_args = 0..=2)]
    jobset: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let eval_one = match cli.jobset.as_slice() {
        [] => None,
        [project, jobset] => Some(JobsetName::new(project, jobset)),
        _ => bail!("syntax: hydra-evaluator [<project> <jobset>]"),
    };

    let config = EvaluatorConfig::new(
        cli.database_url,
        cli.max_concurrent_evals,
        cli.eval_program,
    );

    let pool = create_pool(&config.database_url).await?;
    let store = Arc::new(PgJobsetStore::new(pool.clone()));

    if cli.unlock {
        let released = store.clear_start_times().await?;
        info!(rows = released, "released stale start markers");
        return Ok(());
    }

    // Reclaim markers a crashed instance left behind, before anything
    // can write new ones.
    store.clear_start_times().await?;

    // No clean shutdown: an interrupt exits immediately and the next
    // startup's unlock repairs the start markers.
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        std::process::exit(1);
    });

    let (evaluator, finished_rx) = Evaluator::new(config, store, eval_one);

    tokio::spawn(reaper::run_reaper(evaluator.clone(), finished_rx));
    tokio::spawn(monitor::run_monitor(evaluator.clone(), pool));

    evaluator.run().await;
    Ok(())
}
