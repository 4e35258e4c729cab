use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::LATEST_ALIAS;
use crate::error::{CleaningError, Result};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("valid regex"));

// [[entity/]project/]name[:alias]
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<entity>[A-Za-z0-9_.\-]+)/)??",
        r"(?:(?P<project>[A-Za-z0-9_.\-]+)/)?",
        r"(?P<name>[A-Za-z0-9_.\-]+)",
        r"(?::(?P<alias>[A-Za-z0-9_.\-]+))?$",
    ))
    .expect("valid regex")
});

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Which committed version of an artifact a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Version(u32),
    /// Any other alias. The local store assigns none, so these never resolve.
    Alias(String),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "{}", LATEST_ALIAS),
            VersionSelector::Version(v) => write!(f, "v{}", v),
            VersionSelector::Alias(a) => f.write_str(a),
        }
    }
}

/// A parsed `[[entity/]project/]name[:alias]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    pub project: Option<String>,
    pub name: String,
    pub version: VersionSelector,
}

impl ArtifactReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let caps = REFERENCE_RE
            .captures(reference.trim())
            .ok_or_else(|| CleaningError::InvalidReference(reference.to_string()))?;

        let version = match caps.name("alias").map(|m| m.as_str()) {
            None | Some(LATEST_ALIAS) => VersionSelector::Latest,
            Some(alias) => match alias.strip_prefix('v').and_then(|n| n.parse::<u32>().ok()) {
                Some(n) => VersionSelector::Version(n),
                None => VersionSelector::Alias(alias.to_string()),
            },
        };

        Ok(Self {
            project: caps.name("project").map(|m| m.as_str().to_string()),
            name: caps["name"].to_string(),
            version,
        })
    }

    pub fn project_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.project.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{}/", project)?;
        }
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// A file attached to an artifact before it is logged.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    /// Name the file is stored under inside the artifact.
    pub name: String,
    pub local_path: PathBuf,
}

/// Descriptor for an artifact about to be logged: name, type tag, description
/// and the files that make up its content.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub artifact_type: String,
    pub description: String,
    files: Vec<ArtifactFile>,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        artifact_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            description: description.into(),
            files: Vec::new(),
        }
    }

    /// Attaches a local file under its own file name.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        self.files.push(ArtifactFile {
            name,
            local_path: path.to_path_buf(),
        });
        self
    }

    pub fn files(&self) -> &[ArtifactFile] {
        &self.files
    }
}

/// One content entry of a committed artifact.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ManifestEntry {
    pub name: String,
    pub payload_ref: String,
    pub size_bytes: u64,
}

/// The line appended to the artifact log once a version is committed.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StampedArtifact {
    pub artifact_id: String,
    pub project: String,
    pub name: String,
    pub version: u32,
    pub artifact_type: String,
    pub description: String,
    pub digest: String,
    pub run_id: String,
    pub committed_at: DateTime<Utc>,
    pub manifest: Vec<ManifestEntry>,
}

/// Handle returned by a successful wait: the durable version of an artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedArtifact {
    pub artifact_id: String,
    pub project: String,
    pub name: String,
    pub version: u32,
    pub digest: String,
    /// Set when the content matched an already committed version.
    pub deduplicated: bool,
}

impl LoggedArtifact {
    pub fn reference(&self) -> String {
        format!("{}/{}:v{}", self.project, self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_resolves_to_latest() {
        let r = ArtifactReference::parse("sample.csv").unwrap();
        assert_eq!(r.name, "sample.csv");
        assert_eq!(r.project, None);
        assert_eq!(r.version, VersionSelector::Latest);
    }

    #[test]
    fn explicit_alias_and_version() {
        let latest = ArtifactReference::parse("sample.csv:latest").unwrap();
        assert_eq!(latest.version, VersionSelector::Latest);

        let v3 = ArtifactReference::parse("sample.csv:v3").unwrap();
        assert_eq!(v3.version, VersionSelector::Version(3));
    }

    #[test]
    fn project_and_entity_prefixes() {
        let r = ArtifactReference::parse("nyc_airbnb/clean_sample.csv:v0").unwrap();
        assert_eq!(r.project.as_deref(), Some("nyc_airbnb"));
        assert_eq!(r.name, "clean_sample.csv");

        let r = ArtifactReference::parse("team/nyc_airbnb/clean_sample.csv:latest").unwrap();
        assert_eq!(r.project.as_deref(), Some("nyc_airbnb"));
        assert_eq!(r.name, "clean_sample.csv");
        assert_eq!(r.to_string(), "nyc_airbnb/clean_sample.csv:latest");
    }

    #[test]
    fn malformed_references_are_rejected() {
        for bad in ["", "a b", "a/b/c/d", "name:", "sample.csv:prod:v1", "sample.csv:pr od"] {
            assert!(
                matches!(ArtifactReference::parse(bad), Err(CleaningError::InvalidReference(_))),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn other_aliases_parse_as_named_aliases() {
        let prod = ArtifactReference::parse("sample.csv:prod").unwrap();
        assert_eq!(prod.version, VersionSelector::Alias("prod".to_string()));
        assert_eq!(prod.to_string(), "sample.csv:prod");

        let vx = ArtifactReference::parse("sample.csv:vx").unwrap();
        assert_eq!(vx.version, VersionSelector::Alias("vx".to_string()));
    }

    #[test]
    fn add_file_uses_file_name() {
        let mut artifact =
            Artifact::new("clean_sample.csv", "clean_sample", "Data with outliers removed");
        artifact.add_file("/tmp/some/dir/clean_sample.csv");
        assert_eq!(artifact.files().len(), 1);
        assert_eq!(artifact.files()[0].name, "clean_sample.csv");
    }

    #[test]
    fn name_validation() {
        assert!(is_valid_name("clean_sample.csv"));
        assert!(is_valid_name("raw-data_v2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("bad/name"));
        assert!(!is_valid_name("bad name"));
    }
}
