//! Metrics for the cleaning step and the artifact store.
//!
//! Recording goes through the `metrics` facade, so calls are no-ops until a
//! recorder is installed with [`init`]. The binaries install a Prometheus
//! recorder and may push the rendered exposition to a push gateway once the
//! run is over.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

/// Every metric name used in the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Cleaning step
    CleaningRowsRead,
    CleaningRowsKept,
    CleaningRowsDropped,
    CleaningDatesUnparseable,
    CleaningDuration,

    // Artifact store
    StoreArtifactsResolved,
    StoreArtifactsPublished,
    StoreArtifactsDeduplicated,
    StoreCasWritesSuccess,
    StoreCasWritesError,
    StoreBytesWritten,
    StoreWaitDuration,
    StoreLogWriteBytes,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CleaningRowsRead => "basic_cleaning_rows_read_total",
            MetricName::CleaningRowsKept => "basic_cleaning_rows_kept_total",
            MetricName::CleaningRowsDropped => "basic_cleaning_rows_dropped_total",
            MetricName::CleaningDatesUnparseable => "basic_cleaning_dates_unparseable_total",
            MetricName::CleaningDuration => "basic_cleaning_duration_seconds",

            MetricName::StoreArtifactsResolved => "artifact_store_artifacts_resolved_total",
            MetricName::StoreArtifactsPublished => "artifact_store_artifacts_published_total",
            MetricName::StoreArtifactsDeduplicated => "artifact_store_artifacts_deduplicated_total",
            MetricName::StoreCasWritesSuccess => "artifact_store_cas_writes_success_total",
            MetricName::StoreCasWritesError => "artifact_store_cas_writes_error_total",
            MetricName::StoreBytesWritten => "artifact_store_bytes_written",
            MetricName::StoreWaitDuration => "artifact_store_wait_duration_seconds",
            MetricName::StoreLogWriteBytes => "artifact_store_log_write_bytes",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        [
            MetricName::CleaningRowsRead,
            MetricName::CleaningRowsKept,
            MetricName::CleaningRowsDropped,
            MetricName::CleaningDatesUnparseable,
            MetricName::CleaningDuration,
            MetricName::StoreArtifactsResolved,
            MetricName::StoreArtifactsPublished,
            MetricName::StoreArtifactsDeduplicated,
            MetricName::StoreCasWritesSuccess,
            MetricName::StoreCasWritesError,
            MetricName::StoreBytesWritten,
            MetricName::StoreWaitDuration,
            MetricName::StoreLogWriteBytes,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Safe to call more than once; later calls
/// are ignored.
pub fn init() -> anyhow::Result<()> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    let _ = METRICS_HANDLE.set(handle);
    info!("Metrics system initialized");
    Ok(())
}

/// Current exposition text, if a recorder was installed.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

/// Pushes the rendered metrics to `{pushgateway_url}/metrics/job/{job}/instance/{instance}`.
pub fn push_to_gateway(pushgateway_url: &str, job: &str, instance: &str) -> anyhow::Result<()> {
    let Some(body) = render() else {
        debug!("No metrics recorder installed, nothing to push");
        return Ok(());
    };
    let push_url = format!(
        "{}/metrics/job/{}/instance/{}",
        pushgateway_url.trim_end_matches('/'),
        job,
        instance
    );
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    client
        .put(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()?
        .error_for_status()?;
    info!("Pushed metrics to {}", push_url);
    Ok(())
}

pub mod cleaning {
    use super::MetricName;

    pub fn rows_read(count: usize) {
        ::metrics::counter!(MetricName::CleaningRowsRead.as_str()).increment(count as u64);
    }

    pub fn rows_kept(count: usize) {
        ::metrics::counter!(MetricName::CleaningRowsKept.as_str()).increment(count as u64);
    }

    pub fn rows_dropped(count: usize) {
        ::metrics::counter!(MetricName::CleaningRowsDropped.as_str()).increment(count as u64);
    }

    pub fn dates_unparseable(count: usize) {
        ::metrics::counter!(MetricName::CleaningDatesUnparseable.as_str()).increment(count as u64);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::CleaningDuration.as_str()).record(secs);
    }
}

pub mod store {
    use super::MetricName;

    pub fn artifact_resolved(name: &str) {
        ::metrics::counter!(
            MetricName::StoreArtifactsResolved.as_str(),
            "artifact" => name.to_string()
        )
        .increment(1);
    }

    pub fn artifact_published(name: &str) {
        ::metrics::counter!(
            MetricName::StoreArtifactsPublished.as_str(),
            "artifact" => name.to_string()
        )
        .increment(1);
    }

    pub fn artifact_deduplicated(name: &str) {
        ::metrics::counter!(
            MetricName::StoreArtifactsDeduplicated.as_str(),
            "artifact" => name.to_string()
        )
        .increment(1);
    }

    pub fn cas_write_success() {
        ::metrics::counter!(MetricName::StoreCasWritesSuccess.as_str()).increment(1);
    }

    pub fn cas_write_error() {
        ::metrics::counter!(MetricName::StoreCasWritesError.as_str()).increment(1);
    }

    pub fn bytes_written(bytes: usize) {
        ::metrics::histogram!(MetricName::StoreBytesWritten.as_str()).record(bytes as f64);
    }

    pub fn wait_duration(secs: f64) {
        ::metrics::histogram!(MetricName::StoreWaitDuration.as_str()).record(secs);
    }

    pub fn log_write_bytes(bytes: usize) {
        ::metrics::histogram!(MetricName::StoreLogWriteBytes.as_str()).record(bytes as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
        for n in names {
            assert!(n.starts_with("basic_cleaning_") || n.starts_with("artifact_store_"), "{}", n);
        }
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        cleaning::rows_read(5);
        store::cas_write_success();
        store::wait_duration(0.01);
    }
}
