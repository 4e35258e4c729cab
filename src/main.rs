use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use basic_cleaning::config::Config;
use basic_cleaning::constants::JOB_TYPE;
use basic_cleaning::gateway::{ArtifactStore, LocalArtifactStore};
use basic_cleaning::logging;
use basic_cleaning::observability::metrics;
use basic_cleaning::pipeline::{CleaningArgs, CleaningStep};
use basic_cleaning::run::{RunContext, RunState};

/// Download data, perform data cleaning, and publish the cleaned data
#[derive(Parser)]
#[command(name = "basic_cleaning")]
#[command(about = "Data Cleaning")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    args: CleaningArgs,
}

fn main() -> anyhow::Result<()> {
    // Usage errors exit here, before any work begins
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = logging::init_logging(&config.logging);
    if let Err(e) = metrics::init() {
        warn!("Metrics disabled: {}", e);
    }

    let store = LocalArtifactStore::new(&config.store.root);
    let mut run = RunContext::new(&config.store.project, JOB_TYPE);
    run.update_config(&cli.args)?;
    store.start_run(&run)?;
    info!("Started run {} in project {}", run.id, run.project);

    let step = CleaningStep::new(&store);
    let result = step.run(&run, &cli.args);

    let state = if result.is_ok() { RunState::Finished } else { RunState::Failed };
    if let Err(e) = store.finish_run(&run, state) {
        warn!("Could not record run state: {}", e);
    }

    if let Some(url) = &config.metrics.pushgateway_url {
        if let Err(e) = metrics::push_to_gateway(url, &config.metrics.job, &run.id.to_string()) {
            warn!("Metrics push failed: {}", e);
        }
    }

    match result {
        Ok(report) => {
            info!(
                "Cleaning finished: {} of {} rows kept, output {}",
                report.stats.rows_kept,
                report.stats.rows_read,
                report.output.reference()
            );
            Ok(())
        }
        Err(e) => {
            error!("Cleaning step failed: {}", e);
            Err(e.into())
        }
    }
}
