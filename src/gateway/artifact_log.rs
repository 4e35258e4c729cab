use crate::artifact::StampedArtifact;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Appends one committed artifact as an NDJSON line and syncs the file.
pub fn append(path: &Path, stamped: &StampedArtifact) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(stamped)?;
    match writeln!(file, "{}", line) {
        Ok(_) => crate::observability::metrics::store::log_write_bytes(line.len()),
        Err(e) => return Err(e.into()),
    }
    file.sync_data()?;
    Ok(())
}

/// Reads every well-formed line of the log. Torn or foreign lines are skipped.
pub fn read_all(path: &Path) -> std::io::Result<Vec<StampedArtifact>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let l = line?;
        if l.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StampedArtifact>(&l) {
            Ok(stamped) => out.push(stamped),
            Err(e) => tracing::warn!("Skipping unreadable artifact log line: {}", e),
        }
    }
    Ok(out)
}
