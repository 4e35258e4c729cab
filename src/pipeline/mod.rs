// Cleaning step: fetch -> transform -> publish

pub mod clean;
pub mod dataset;

use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use crate::artifact::{Artifact, LoggedArtifact};
use crate::constants::CLEAN_SAMPLE_FILE;
use crate::error::Result;
use crate::gateway::ArtifactStore;
use crate::observability::metrics;
use crate::run::RunContext;
use clean::CleanStats;
use dataset::Dataset;

/// Inputs of one cleaning run. Also recorded verbatim as the run config.
#[derive(Debug, Clone, Serialize, clap::Args)]
pub struct CleaningArgs {
    /// Fully-qualified name for the input artifact
    #[arg(long = "input_artifact")]
    pub input_artifact: String,

    /// Name for the output artifact
    #[arg(long = "output_artifact")]
    pub output_artifact: String,

    /// Type of the output artifact
    #[arg(long = "output_type")]
    pub output_type: String,

    /// Description of the output artifact
    #[arg(long = "output_description")]
    pub output_description: String,

    /// Min price considered for data analysis
    #[arg(long = "min_price", allow_negative_numbers = true)]
    pub min_price: f64,

    /// Max price considered for data analysis
    #[arg(long = "max_price", allow_negative_numbers = true)]
    pub max_price: f64,
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct CleaningReport {
    pub stats: CleanStats,
    pub output: LoggedArtifact,
}

/// Downloads the input artifact, drops price outliers, normalizes review
/// dates and publishes the result as a new artifact version.
pub struct CleaningStep<'a> {
    store: &'a dyn ArtifactStore,
    temp_root: Option<PathBuf>,
}

impl<'a> CleaningStep<'a> {
    pub fn new(store: &'a dyn ArtifactStore) -> Self {
        Self { store, temp_root: None }
    }

    /// Creates the scoped output directory under `dir` instead of the system
    /// temp location.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn run(&self, run: &RunContext, args: &CleaningArgs) -> Result<CleaningReport> {
        let span = tracing::info_span!("basic_cleaning", run_id = %run.id);
        let _enter = span.enter();
        let t0 = Instant::now();

        // Download input artifact. Resolving also records it as an input of this run.
        info!("Downloading input artifact");
        let artifact_local_path = self.store.resolve(run, &args.input_artifact)?;
        let mut df = Dataset::from_path(&artifact_local_path)?;
        debug!("Loaded {} rows from {}", df.len(), artifact_local_path.display());

        info!("Cleaning data");
        let stats = clean::clean(&mut df, args.min_price, args.max_price)?;
        metrics::cleaning::rows_read(stats.rows_read);
        metrics::cleaning::rows_kept(stats.rows_kept);
        metrics::cleaning::rows_dropped(stats.rows_dropped());
        metrics::cleaning::dates_unparseable(stats.dates_unparseable);
        debug!(
            "Kept {} of {} rows in [{}, {}]; {} unparseable review dates",
            stats.rows_kept,
            stats.rows_read,
            args.min_price,
            args.max_price,
            stats.dates_unparseable
        );

        // Removed on drop, whichever way this function returns
        let tmp_dir = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("basic_cleaning");
            match &self.temp_root {
                Some(root) => builder.tempdir_in(root)?,
                None => builder.tempdir()?,
            }
        };

        info!("Saving cleaned data");
        let tmp_path = tmp_dir.path().join(CLEAN_SAMPLE_FILE);
        df.write_csv(&tmp_path)?;

        let mut artifact = Artifact::new(
            &args.output_artifact,
            &args.output_type,
            &args.output_description,
        );
        artifact.add_file(&tmp_path);
        let pending = self.store.log_artifact(run, &artifact)?;
        let output = self.store.wait(pending)?;

        metrics::cleaning::duration(t0.elapsed().as_secs_f64());
        info!("Published {} ({} rows)", output.reference(), stats.rows_kept);

        Ok(CleaningReport { stats, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: CleaningArgs,
    }

    const FULL: &[&str] = &[
        "basic_cleaning",
        "--input_artifact",
        "sample.csv:latest",
        "--output_artifact",
        "clean_sample.csv",
        "--output_type",
        "clean_sample",
        "--output_description",
        "Data with outliers and null values removed",
        "--min_price",
        "10",
        "--max_price",
        "350",
    ];

    #[test]
    fn parses_all_flags() {
        let cli = TestCli::try_parse_from(FULL).unwrap();
        assert_eq!(cli.args.input_artifact, "sample.csv:latest");
        assert_eq!(cli.args.output_type, "clean_sample");
        assert_eq!(cli.args.min_price, 10.0);
        assert_eq!(cli.args.max_price, 350.0);
    }

    #[test]
    fn every_flag_is_required() {
        for skip in (1..FULL.len()).step_by(2) {
            let argv: Vec<&str> = FULL
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip && *i != skip + 1)
                .map(|(_, a)| *a)
                .collect();
            assert!(TestCli::try_parse_from(argv).is_err(), "{} should be required", FULL[skip]);
        }
    }

    #[test]
    fn prices_must_be_numbers() {
        let mut argv = FULL.to_vec();
        argv[10] = "ten";
        assert!(TestCli::try_parse_from(argv).is_err());
    }

    #[test]
    fn negative_bounds_are_accepted() {
        let mut argv = FULL.to_vec();
        argv[10] = "-5";
        let cli = TestCli::try_parse_from(argv).unwrap();
        assert_eq!(cli.args.min_price, -5.0);
    }
}
