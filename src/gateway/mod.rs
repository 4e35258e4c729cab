pub mod artifact_log;
pub mod cas_fs;
pub mod store_meta;

use crate::artifact::{
    is_valid_name, Artifact, ArtifactReference, LoggedArtifact, ManifestEntry, StampedArtifact,
    VersionSelector,
};
use crate::constants::{
    ARTIFACT_LOG_DIR, ARTIFACT_LOG_FILE, CAS_DIR, DOWNLOAD_JOB_TYPE, MATERIALIZED_DIR,
};
use crate::error::{CleaningError, Result};
use crate::observability::metrics;
use crate::run::{RunContext, RunState};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use store_meta::{ArtifactRecord, StoreMeta, UsageDirection, STATE_PENDING};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Versioned artifact storage with run lineage.
///
/// `log_artifact` registers content without making it visible; `wait` blocks
/// until the registration is durable and returns the assigned version.
pub trait ArtifactStore {
    fn start_run(&self, run: &RunContext) -> Result<()>;

    fn finish_run(&self, run: &RunContext, state: RunState) -> Result<()>;

    /// Resolves a reference to a local copy of its single file and records
    /// the artifact as an input of `run`.
    fn resolve(&self, run: &RunContext, reference: &str) -> Result<PathBuf>;

    fn log_artifact(&self, run: &RunContext, artifact: &Artifact) -> Result<PendingArtifact>;

    fn wait(&self, pending: PendingArtifact) -> Result<LoggedArtifact>;
}

/// An artifact that has been logged but is not yet durable.
#[derive(Debug, Clone)]
pub struct PendingArtifact {
    pub artifact_id: String,
    pub project: String,
    pub name: String,
    pub artifact_type: String,
    pub description: String,
    pub digest: String,
    pub run_id: String,
    pub manifest: Vec<ManifestEntry>,
    /// Already committed version with identical content, if any.
    pub dedupe_of: Option<ArtifactRecord>,
}

/// SHA-256 over the sorted `(file name, payload ref)` manifest.
pub fn manifest_digest(manifest: &[ManifestEntry]) -> String {
    let mut entries: Vec<&ManifestEntry> = manifest.iter().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let mut canonical = String::new();
    for e in entries {
        canonical.push_str(&e.name);
        canonical.push('\0');
        canonical.push_str(&e.payload_ref);
        canonical.push('\n');
    }
    cas_fs::sha256_hex(canonical.as_bytes())
}

/// Filesystem-backed store: CAS blobs, a SQLite registry and an NDJSON log
/// under one root directory.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        let _ = fs::create_dir_all(root.join(CAS_DIR));
        let _ = fs::create_dir_all(root.join(ARTIFACT_LOG_DIR));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join(ARTIFACT_LOG_DIR).join(ARTIFACT_LOG_FILE)
    }

    fn meta(&self) -> anyhow::Result<StoreMeta> {
        StoreMeta::open_at_root(&self.root)
    }

    fn lookup(
        &self,
        meta: &StoreMeta,
        project: &str,
        reference: &ArtifactReference,
    ) -> anyhow::Result<Option<ArtifactRecord>> {
        match &reference.version {
            VersionSelector::Latest => meta.latest_committed(project, &reference.name),
            VersionSelector::Version(v) => meta.committed_version(project, &reference.name, *v),
            VersionSelector::Alias(_) => Ok(None),
        }
    }

    /// Drops a pending row that will never be committed.
    fn discard(&self, meta: &mut StoreMeta, artifact_id: &str) {
        if let Err(e) = meta.discard_pending(artifact_id) {
            warn!("Could not discard pending artifact {}: {}", artifact_id, e);
        }
    }

    /// Committed versions of `name`, oldest first.
    pub fn list_versions(&self, project: &str, name: &str) -> Result<Vec<ArtifactRecord>> {
        let meta = self.meta().map_err(|e| CleaningError::io(e.to_string()))?;
        meta.list_versions(project, name).map_err(|e| CleaningError::io(e.to_string()))
    }

    /// `(direction, record)` pairs for every artifact a run consumed or produced.
    pub fn lineage(&self, run_id: &str) -> Result<Vec<(String, ArtifactRecord)>> {
        let meta = self.meta().map_err(|e| CleaningError::io(e.to_string()))?;
        meta.usage_for_run(run_id).map_err(|e| CleaningError::io(e.to_string()))
    }

    pub fn run_state(&self, run_id: &str) -> Result<Option<String>> {
        let meta = self.meta().map_err(|e| CleaningError::io(e.to_string()))?;
        meta.run_state(run_id).map_err(|e| CleaningError::io(e.to_string()))
    }

    /// Resolves `reference` under a run of its own, so the read shows up in
    /// lineage like any other. Returns that run's id with the local path.
    pub fn download(&self, project: &str, reference: &str) -> Result<(Uuid, PathBuf)> {
        let mut run = RunContext::new(project, DOWNLOAD_JOB_TYPE);
        run.update_config(&serde_json::json!({ "reference": reference }))
            .map_err(|e| CleaningError::io(e.to_string()))?;
        self.start_run(&run)?;

        let result = self.resolve(&run, reference);
        let state = if result.is_ok() { RunState::Finished } else { RunState::Failed };
        self.finish_run(&run, state)?;
        Ok((run.id, result?))
    }

    fn materialize(&self, record: &ArtifactRecord, entry: &ManifestEntry) -> Result<PathBuf> {
        let blob = cas_fs::cas_path(&self.root.join(CAS_DIR), &entry.payload_ref)
            .ok_or_else(|| CleaningError::io(format!("bad payload ref {}", entry.payload_ref)))?;
        let bytes = fs::read(&blob)?;
        let expected = cas_fs::payload_hex(&entry.payload_ref).unwrap_or_default();
        if cas_fs::sha256_hex(&bytes) != expected {
            return Err(CleaningError::io(format!(
                "checksum mismatch for blob {}",
                entry.payload_ref
            )));
        }

        let version = record.version.unwrap_or_default();
        let dir = self
            .root
            .join(MATERIALIZED_DIR)
            .join(&record.project)
            .join(&record.name)
            .join(format!("v{}", version));
        fs::create_dir_all(&dir)?;
        let path = dir.join(&entry.name);
        fs::write(&path, &bytes)?;
        Ok(path)
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn start_run(&self, run: &RunContext) -> Result<()> {
        let meta = self.meta().map_err(|e| CleaningError::io(e.to_string()))?;
        meta.insert_run(run).map_err(|e| CleaningError::io(e.to_string()))?;
        debug!("Registered run {} ({})", run.id, run.job_type);
        Ok(())
    }

    fn finish_run(&self, run: &RunContext, state: RunState) -> Result<()> {
        let meta = self.meta().map_err(|e| CleaningError::io(e.to_string()))?;
        meta.set_run_state(&run.id.to_string(), state)
            .map_err(|e| CleaningError::io(e.to_string()))?;
        debug!("Run {} marked {}", run.id, state);
        Ok(())
    }

    fn resolve(&self, run: &RunContext, reference: &str) -> Result<PathBuf> {
        let parsed = ArtifactReference::parse(reference)?;
        let project = parsed.project_or(&run.project).to_string();

        let meta = self.meta().map_err(|e| CleaningError::io(e.to_string()))?;
        let record = self
            .lookup(&meta, &project, &parsed)
            .map_err(|e| CleaningError::io(e.to_string()))?
            .ok_or_else(|| CleaningError::NotFound(reference.to_string()))?;

        let files = meta
            .files_of(&record.artifact_id)
            .map_err(|e| CleaningError::io(e.to_string()))?;
        let entry = match files.as_slice() {
            [single] => single,
            other => {
                return Err(CleaningError::io(format!(
                    "artifact {} holds {} files, expected exactly one",
                    reference,
                    other.len()
                )))
            }
        };

        let path = self.materialize(&record, entry)?;
        meta.record_usage(&run.id.to_string(), &record.artifact_id, UsageDirection::Input)
            .map_err(|e| CleaningError::io(e.to_string()))?;
        metrics::store::artifact_resolved(&record.name);
        debug!(
            "Resolved {} to {}/{}:v{} at {}",
            reference,
            record.project,
            record.name,
            record.version.unwrap_or_default(),
            path.display()
        );
        Ok(path)
    }

    fn log_artifact(&self, run: &RunContext, artifact: &Artifact) -> Result<PendingArtifact> {
        if !is_valid_name(&artifact.name) {
            return Err(CleaningError::Publish(format!(
                "invalid artifact name '{}'",
                artifact.name
            )));
        }
        if artifact.files().is_empty() {
            return Err(CleaningError::Publish(format!(
                "artifact '{}' has no files",
                artifact.name
            )));
        }

        let cas_root = self.root.join(CAS_DIR);
        let mut manifest = Vec::with_capacity(artifact.files().len());
        for file in artifact.files() {
            if manifest.iter().any(|m: &ManifestEntry| m.name == file.name) {
                return Err(CleaningError::Publish(format!("duplicate file name '{}'", file.name)));
            }
            let bytes = fs::read(&file.local_path).map_err(|e| {
                CleaningError::Publish(format!("cannot read {}: {}", file.local_path.display(), e))
            })?;
            let payload_ref = match cas_fs::write_cas(&cas_root, &bytes) {
                Ok(r) => {
                    metrics::store::cas_write_success();
                    metrics::store::bytes_written(bytes.len());
                    r
                }
                Err(e) => {
                    metrics::store::cas_write_error();
                    return Err(CleaningError::publish(e));
                }
            };
            manifest.push(ManifestEntry {
                name: file.name.clone(),
                payload_ref,
                size_bytes: bytes.len() as u64,
            });
        }
        manifest.sort_by(|a, b| a.name.cmp(&b.name));
        let digest = manifest_digest(&manifest);

        let mut meta = self.meta().map_err(CleaningError::publish)?;
        let dedupe_of = meta
            .latest_committed(&run.project, &artifact.name)
            .map_err(CleaningError::publish)?
            .filter(|latest| latest.digest == digest);

        let pending = PendingArtifact {
            artifact_id: Uuid::new_v4().to_string(),
            project: run.project.clone(),
            name: artifact.name.clone(),
            artifact_type: artifact.artifact_type.clone(),
            description: artifact.description.clone(),
            digest,
            run_id: run.id.to_string(),
            manifest,
            dedupe_of,
        };

        if pending.dedupe_of.is_none() {
            let record = ArtifactRecord {
                artifact_id: pending.artifact_id.clone(),
                project: pending.project.clone(),
                name: pending.name.clone(),
                version: None,
                artifact_type: pending.artifact_type.clone(),
                description: pending.description.clone(),
                digest: pending.digest.clone(),
                state: STATE_PENDING.to_string(),
                run_id: pending.run_id.clone(),
                created_at: Utc::now(),
            };
            meta.insert_pending(&record, &pending.manifest)
                .map_err(CleaningError::publish)?;
        }
        debug!(
            "Logged artifact {} ({} files, digest {})",
            pending.name,
            pending.manifest.len(),
            pending.digest
        );
        Ok(pending)
    }

    fn wait(&self, pending: PendingArtifact) -> Result<LoggedArtifact> {
        let t0 = std::time::Instant::now();
        let mut meta = self.meta().map_err(CleaningError::publish)?;

        if let Some(existing) = &pending.dedupe_of {
            meta.record_usage(&pending.run_id, &existing.artifact_id, UsageDirection::Output)
                .map_err(CleaningError::publish)?;
            metrics::store::artifact_deduplicated(&pending.name);
            let version = existing.version.unwrap_or_default();
            info!("Artifact {} unchanged, reusing v{}", pending.name, version);
            return Ok(LoggedArtifact {
                artifact_id: existing.artifact_id.clone(),
                project: existing.project.clone(),
                name: existing.name.clone(),
                version,
                digest: existing.digest.clone(),
                deduplicated: true,
            });
        }

        let cas_root = self.root.join(CAS_DIR);
        let missing = pending.manifest.iter().find(|m| {
            !cas_fs::cas_path(&cas_root, &m.payload_ref)
                .map(|p| p.exists())
                .unwrap_or(false)
        });
        if let Some(m) = missing {
            self.discard(&mut meta, &pending.artifact_id);
            return Err(CleaningError::Publish(format!(
                "blob {} for {} is missing",
                m.payload_ref, m.name
            )));
        }

        let log_path = self.log_path();
        let committed = meta.commit_pending(&pending.artifact_id, &pending.run_id, |version| {
            let stamped = StampedArtifact {
                artifact_id: pending.artifact_id.clone(),
                project: pending.project.clone(),
                name: pending.name.clone(),
                version,
                artifact_type: pending.artifact_type.clone(),
                description: pending.description.clone(),
                digest: pending.digest.clone(),
                run_id: pending.run_id.clone(),
                committed_at: Utc::now(),
                manifest: pending.manifest.clone(),
            };
            artifact_log::append(&log_path, &stamped)
        });
        let version = match committed {
            Ok(version) => version,
            Err(e) => {
                self.discard(&mut meta, &pending.artifact_id);
                return Err(CleaningError::publish(e));
            }
        };

        metrics::store::artifact_published(&pending.name);
        metrics::store::wait_duration(t0.elapsed().as_secs_f64());
        info!("Artifact {}/{}:v{} committed", pending.project, pending.name, version);

        Ok(LoggedArtifact {
            artifact_id: pending.artifact_id,
            project: pending.project,
            name: pending.name,
            version,
            digest: pending.digest,
            deduplicated: false,
        })
    }
}
