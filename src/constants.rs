//! Column names and fixed identifiers shared across the step and the store.

// Columns the cleaning step touches
pub const PRICE_COLUMN: &str = "price";
pub const LAST_REVIEW_COLUMN: &str = "last_review";

// Run bookkeeping
pub const JOB_TYPE: &str = "basic_cleaning";
pub const UPLOAD_JOB_TYPE: &str = "artifact_upload";
pub const DOWNLOAD_JOB_TYPE: &str = "artifact_get";

// File name of the serialized output inside the scoped temp dir
pub const CLEAN_SAMPLE_FILE: &str = "clean_sample.csv";

// Store layout
pub const CAS_DIR: &str = "cas";
pub const ARTIFACT_LOG_DIR: &str = "artifact_log";
pub const ARTIFACT_LOG_FILE: &str = "artifacts.ndjson";
pub const META_DB_FILE: &str = "meta.db";
pub const MATERIALIZED_DIR: &str = "artifacts";

pub const CAS_PREFIX: &str = "cas:sha256:";
pub const LATEST_ALIAS: &str = "latest";
