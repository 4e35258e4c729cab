use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::CAS_PREFIX;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Writes `bytes` under `root/sha256/ab/cd/<hex>` and returns `cas:sha256:<hex>`.
/// Existing blobs are left untouched.
pub fn write_cas(root: &Path, bytes: &[u8]) -> anyhow::Result<String> {
    let hex = sha256_hex(bytes);
    let dir = root.join("sha256").join(&hex[0..2]).join(&hex[2..4]);
    fs::create_dir_all(&dir)?;
    let path = dir.join(&hex);
    if !path.exists() {
        // Write to a sibling temp name, sync, then rename so readers never see a torn blob
        let tmp = dir.join(format!("{}.partial", hex));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
    }
    Ok(format!("{}{}", CAS_PREFIX, hex))
}

pub fn payload_hex(payload_ref: &str) -> Option<&str> {
    let hex = payload_ref.strip_prefix(CAS_PREFIX)?;
    if hex.len() < 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hex)
}

/// Maps `cas:sha256:<hex>` back to its blob path under `root`.
pub fn cas_path(root: &Path, payload_ref: &str) -> Option<PathBuf> {
    let hex = payload_hex(payload_ref)?;
    Some(root.join("sha256").join(&hex[0..2]).join(&hex[2..4]).join(hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_content_addressed_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_cas(dir.path(), b"id,price\n1,50\n").unwrap();
        let b = write_cas(dir.path(), b"id,price\n1,50\n").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("cas:sha256:"));

        let path = cas_path(dir.path(), &a).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"id,price\n1,50\n");
    }

    #[test]
    fn different_content_gets_different_refs() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_cas(dir.path(), b"one").unwrap();
        let b = write_cas(dir.path(), b"two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bad_refs_do_not_map_to_paths() {
        let root = Path::new("/store");
        assert!(cas_path(root, "sha256:abcd").is_none());
        assert!(cas_path(root, "cas:sha256:ab").is_none());
        assert!(cas_path(root, "cas:sha256:../../etc").is_none());
    }
}
