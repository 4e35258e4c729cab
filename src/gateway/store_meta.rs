use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::artifact::ManifestEntry;
use crate::constants::{ARTIFACT_LOG_DIR, META_DB_FILE};
use crate::run::{RunContext, RunState};

pub const STATE_PENDING: &str = "pending";
pub const STATE_COMMITTED: &str = "committed";

/// A registry row for one artifact version (pending or committed).
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRecord {
    pub artifact_id: String,
    pub project: String,
    pub name: String,
    pub version: Option<u32>,
    pub artifact_type: String,
    pub description: String,
    pub digest: String,
    pub state: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDirection {
    Input,
    Output,
}

impl UsageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageDirection::Input => "input",
            UsageDirection::Output => "output",
        }
    }
}

pub struct StoreMeta {
    conn: Connection,
}

const ARTIFACT_COLUMNS: &str =
    "artifact_id, project, name, version, artifact_type, description, digest, state, run_id, created_at";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    let created_ms: i64 = row.get(9)?;
    Ok(ArtifactRecord {
        artifact_id: row.get(0)?,
        project: row.get(1)?,
        name: row.get(2)?,
        version: row.get::<_, Option<i64>>(3)?.map(|v| v as u32),
        artifact_type: row.get(4)?,
        description: row.get(5)?,
        digest: row.get(6)?,
        state: row.get(7)?,
        run_id: row.get(8)?,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
    })
}

impl StoreMeta {
    pub fn open_at_root<P: AsRef<Path>>(store_root: P) -> anyhow::Result<Self> {
        let db_path = store_root.as_ref().join(ARTIFACT_LOG_DIR).join(META_DB_FILE);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            CREATE TABLE IF NOT EXISTS runs (
                run_id       TEXT PRIMARY KEY,
                project      TEXT NOT NULL,
                job_type     TEXT NOT NULL,
                config_json  TEXT NOT NULL,
                state        TEXT NOT NULL,
                started_at   INTEGER NOT NULL,
                finished_at  INTEGER
            );
            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id    TEXT PRIMARY KEY,
                project        TEXT NOT NULL,
                name           TEXT NOT NULL,
                version        INTEGER,
                artifact_type  TEXT NOT NULL,
                description    TEXT NOT NULL,
                digest         TEXT NOT NULL,
                state          TEXT NOT NULL,
                run_id         TEXT NOT NULL,
                created_at     INTEGER NOT NULL,
                committed_at   INTEGER,
                UNIQUE (project, name, version)
            );
            CREATE TABLE IF NOT EXISTS artifact_files (
                artifact_id  TEXT NOT NULL,
                name         TEXT NOT NULL,
                payload_ref  TEXT NOT NULL,
                size_bytes   INTEGER NOT NULL,
                PRIMARY KEY (artifact_id, name)
            );
            CREATE TABLE IF NOT EXISTS artifact_usage (
                run_id       TEXT NOT NULL,
                artifact_id  TEXT NOT NULL,
                direction    TEXT NOT NULL,
                PRIMARY KEY (run_id, artifact_id, direction)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    // Runs
    pub fn insert_run(&self, run: &RunContext) -> anyhow::Result<()> {
        let config_json = serde_json::to_string(run.config())?;
        self.conn.execute(
            "INSERT INTO runs (run_id, project, job_type, config_json, state, started_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(run_id) DO UPDATE SET config_json=excluded.config_json",
            params![
                run.id.to_string(),
                run.project,
                run.job_type,
                config_json,
                RunState::Running.as_str(),
                run.started_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    pub fn set_run_state(&self, run_id: &str, state: RunState) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE runs SET state = ?2, finished_at = ?3 WHERE run_id = ?1",
            params![run_id, state.as_str(), Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn run_state(&self, run_id: &str) -> anyhow::Result<Option<String>> {
        let state = self
            .conn
            .query_row(
                "SELECT state FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state)
    }

    // Artifacts
    pub fn insert_pending(
        &mut self,
        record: &ArtifactRecord,
        files: &[ManifestEntry],
    ) -> anyhow::Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO artifacts (artifact_id, project, name, version, artifact_type, description, digest, state, run_id, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.artifact_id,
                record.project,
                record.name,
                record.artifact_type,
                record.description,
                record.digest,
                STATE_PENDING,
                record.run_id,
                record.created_at.timestamp_millis()
            ],
        )?;
        for f in files {
            tx.execute(
                "INSERT INTO artifact_files (artifact_id, name, payload_ref, size_bytes) VALUES (?1, ?2, ?3, ?4)",
                params![record.artifact_id, f.name, f.payload_ref, f.size_bytes as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get(&self, artifact_id: &str) -> anyhow::Result<Option<ArtifactRecord>> {
        let sql = format!("SELECT {} FROM artifacts WHERE artifact_id = ?1", ARTIFACT_COLUMNS);
        let rec = self.conn.query_row(&sql, params![artifact_id], row_to_record).optional()?;
        Ok(rec)
    }

    pub fn latest_committed(
        &self,
        project: &str,
        name: &str,
    ) -> anyhow::Result<Option<ArtifactRecord>> {
        let sql = format!(
            "SELECT {} FROM artifacts WHERE project = ?1 AND name = ?2 AND state = ?3 ORDER BY version DESC LIMIT 1",
            ARTIFACT_COLUMNS
        );
        let rec = self
            .conn
            .query_row(&sql, params![project, name, STATE_COMMITTED], row_to_record)
            .optional()?;
        Ok(rec)
    }

    pub fn committed_version(
        &self,
        project: &str,
        name: &str,
        version: u32,
    ) -> anyhow::Result<Option<ArtifactRecord>> {
        let sql = format!(
            "SELECT {} FROM artifacts WHERE project = ?1 AND name = ?2 AND version = ?3 AND state = ?4",
            ARTIFACT_COLUMNS
        );
        let rec = self
            .conn
            .query_row(&sql, params![project, name, version as i64, STATE_COMMITTED], row_to_record)
            .optional()?;
        Ok(rec)
    }

    pub fn list_versions(&self, project: &str, name: &str) -> anyhow::Result<Vec<ArtifactRecord>> {
        let sql = format!(
            "SELECT {} FROM artifacts WHERE project = ?1 AND name = ?2 AND state = ?3 ORDER BY version ASC",
            ARTIFACT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project, name, STATE_COMMITTED], row_to_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn files_of(&self, artifact_id: &str) -> anyhow::Result<Vec<ManifestEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, payload_ref, size_bytes FROM artifact_files WHERE artifact_id = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![artifact_id], |row| {
            Ok(ManifestEntry {
                name: row.get(0)?,
                payload_ref: row.get(1)?,
                size_bytes: row.get::<_, i64>(2)? as u64,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Assigns the next version number to a pending artifact and links it to
    /// the producing run, atomically. `before_commit` runs with the assigned
    /// version inside the transaction; an error from it rolls everything back.
    pub fn commit_pending<F>(
        &mut self,
        artifact_id: &str,
        run_id: &str,
        before_commit: F,
    ) -> anyhow::Result<u32>
    where
        F: FnOnce(u32) -> anyhow::Result<()>,
    {
        let tx = self.conn.transaction()?;
        let (project, name, state): (String, String, String) = tx
            .query_row(
                "SELECT project, name, state FROM artifacts WHERE artifact_id = ?1",
                params![artifact_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| anyhow::anyhow!("pending artifact {} is not registered", artifact_id))?;
        if state != STATE_PENDING {
            anyhow::bail!("artifact {} is already {}", artifact_id, state);
        }
        let max: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), -1) FROM artifacts WHERE project = ?1 AND name = ?2 AND state = ?3",
            params![project, name, STATE_COMMITTED],
            |row| row.get(0),
        )?;
        let version = (max + 1) as u32;
        tx.execute(
            "UPDATE artifacts SET version = ?2, state = ?3, committed_at = ?4 WHERE artifact_id = ?1",
            params![artifact_id, version as i64, STATE_COMMITTED, Utc::now().timestamp_millis()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO artifact_usage (run_id, artifact_id, direction) VALUES (?1, ?2, ?3)",
            params![run_id, artifact_id, UsageDirection::Output.as_str()],
        )?;
        before_commit(version)?;
        tx.commit()?;
        Ok(version)
    }

    pub fn discard_pending(&mut self, artifact_id: &str) -> anyhow::Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM artifacts WHERE artifact_id = ?1 AND state = ?2",
            params![artifact_id, STATE_PENDING],
        )?;
        // Files of a committed artifact stay
        tx.execute(
            "DELETE FROM artifact_files WHERE artifact_id = ?1
             AND NOT EXISTS (SELECT 1 FROM artifacts WHERE artifact_id = ?1)",
            params![artifact_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // Lineage
    pub fn record_usage(
        &self,
        run_id: &str,
        artifact_id: &str,
        direction: UsageDirection,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO artifact_usage (run_id, artifact_id, direction) VALUES (?1, ?2, ?3)",
            params![run_id, artifact_id, direction.as_str()],
        )?;
        Ok(())
    }

    /// Artifacts a run consumed or produced, as `(direction, record)` pairs.
    pub fn usage_for_run(&self, run_id: &str) -> anyhow::Result<Vec<(String, ArtifactRecord)>> {
        let columns = ARTIFACT_COLUMNS
            .split(", ")
            .map(|c| format!("a.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        // direction goes last so row_to_record can read the leading columns
        let sql = format!(
            "SELECT {}, u.direction FROM artifact_usage u JOIN artifacts a ON a.artifact_id = u.artifact_id
             WHERE u.run_id = ?1 ORDER BY u.direction, a.name",
            columns
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![run_id], |row| {
            let direction: String = row.get(10)?;
            Ok((direction, row_to_record(row)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
