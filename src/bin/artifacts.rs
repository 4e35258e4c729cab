use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use basic_cleaning::artifact::Artifact;
use basic_cleaning::config::Config;
use basic_cleaning::constants::UPLOAD_JOB_TYPE;
use basic_cleaning::gateway::{ArtifactStore, LocalArtifactStore};
use basic_cleaning::logging;
use basic_cleaning::run::{RunContext, RunState};

/// Inspect and seed the local artifact store.
#[derive(Parser, Debug)]
#[command(name = "artifacts", version, about = "Inspect and seed the local artifact store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a file as a new artifact version
    Put {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        artifact_type: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Resolve a reference and print (or copy) the local file
    Get {
        reference: String,
        /// Copy the resolved file here instead of printing its path
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List committed versions of an artifact
    List {
        name: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Show the inputs and outputs of a run
    Lineage { run_id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = logging::init_logging(&config.logging);
    let store = LocalArtifactStore::new(&config.store.root);

    match cli.command {
        Commands::Put {
            name,
            artifact_type,
            description,
            file,
        } => {
            let mut run = RunContext::new(&config.store.project, UPLOAD_JOB_TYPE);
            run.update_config(&serde_json::json!({
                "name": name,
                "file": file.display().to_string(),
            }))?;
            store.start_run(&run)?;

            let mut artifact = Artifact::new(&name, &artifact_type, &description);
            artifact.add_file(&file);
            let result = store
                .log_artifact(&run, &artifact)
                .and_then(|pending| store.wait(pending));
            let state = if result.is_ok() { RunState::Finished } else { RunState::Failed };
            store.finish_run(&run, state)?;

            let logged = result.with_context(|| format!("Failed to upload {}", file.display()))?;
            println!("{}", logged.reference());
        }
        Commands::Get { reference, dest } => {
            let (_run_id, path) = store.download(&config.store.project, &reference)?;
            match dest {
                Some(dest) => {
                    fs::copy(&path, &dest)
                        .with_context(|| format!("Failed to copy to {}", dest.display()))?;
                    println!("{}", dest.display());
                }
                None => println!("{}", path.display()),
            }
        }
        Commands::List { name, project } => {
            let project = project.unwrap_or_else(|| config.store.project.clone());
            let versions = store.list_versions(&project, &name)?;
            if versions.is_empty() {
                println!("no committed versions of {}/{}", project, name);
            }
            for v in versions {
                println!(
                    "{}/{}:v{}\t{}\t{}\t{}\t{}",
                    v.project,
                    v.name,
                    v.version.unwrap_or_default(),
                    v.artifact_type,
                    &v.digest[..12.min(v.digest.len())],
                    v.created_at.format("%Y-%m-%d %H:%M:%S"),
                    v.description
                );
            }
        }
        Commands::Lineage { run_id } => {
            let state = store.run_state(&run_id)?.unwrap_or_else(|| "unknown".to_string());
            println!("run {} ({})", run_id, state);
            for (direction, record) in store.lineage(&run_id)? {
                println!(
                    "  {:<6} {}/{}:v{}",
                    direction,
                    record.project,
                    record.name,
                    record.version.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
