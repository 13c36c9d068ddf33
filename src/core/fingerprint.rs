//! CR-004: File fingerprints — BLAKE3 content hash with an mtime/size shortcut.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

const STREAM_BUF_SIZE: usize = 65536;

/// Recorded state of one dependency file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Modification time, nanoseconds since the epoch
    pub mtime_ns: u64,

    /// File size in bytes
    pub size: u64,

    /// `"blake3:{hex}"`
    pub hash: String,
}

impl Fingerprint {
    /// Check whether `path` still matches this fingerprint.
    ///
    /// A size change is a mismatch. Equal mtime and size is a match without
    /// reading the file. Otherwise the content hash decides, so a file that
    /// was rewritten with identical bytes is still considered unchanged.
    pub fn matches(&self, path: &Path) -> Result<bool, String> {
        let meta = std::fs::metadata(path)
            .map_err(|e| format!("cannot stat {}: {}", path.display(), e))?;
        if meta.len() != self.size {
            return Ok(false);
        }
        if modified_ns(&meta) == self.mtime_ns {
            return Ok(true);
        }
        Ok(hash_file(path)? == self.hash)
    }
}

/// Capture the current fingerprint of a file.
pub fn fingerprint(path: &Path) -> Result<Fingerprint, String> {
    let meta =
        std::fs::metadata(path).map_err(|e| format!("cannot stat {}: {}", path.display(), e))?;
    if meta.is_dir() {
        return Err(format!("{} is a directory", path.display()));
    }
    Ok(Fingerprint {
        mtime_ns: modified_ns(&meta),
        size: meta.len(),
        hash: hash_file(path)?,
    })
}

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

fn modified_ns(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr004_hash_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fa");
        std::fs::write(&path, ">seq1\nACGT\n").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
    }

    #[test]
    fn test_cr004_fingerprint_captures_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "12345").unwrap();
        let fp = fingerprint(&path).unwrap();
        assert_eq!(fp.size, 5);
        assert!(fp.mtime_ns > 0);
        assert_eq!(fp.hash, hash_file(&path).unwrap());
    }

    #[test]
    fn test_cr004_matches_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "stable").unwrap();
        let fp = fingerprint(&path).unwrap();
        assert!(fp.matches(&path).unwrap());
    }

    #[test]
    fn test_cr004_matches_rewritten_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "same bytes").unwrap();
        let mut fp = fingerprint(&path).unwrap();
        // Simulate a touch: different recorded mtime, same size and content.
        fp.mtime_ns = fp.mtime_ns.saturating_sub(1_000_000_000);
        assert!(fp.matches(&path).unwrap());
    }

    #[test]
    fn test_cr004_mismatch_on_content_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "before").unwrap();
        let fp = fingerprint(&path).unwrap();
        std::fs::write(&path, "after, and longer").unwrap();
        assert!(!fp.matches(&path).unwrap());
    }

    #[test]
    fn test_cr004_mismatch_same_size_different_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "aaaa").unwrap();
        let mut fp = fingerprint(&path).unwrap();
        std::fs::write(&path, "bbbb").unwrap();
        fp.mtime_ns = 0;
        assert!(!fp.matches(&path).unwrap());
    }

    #[test]
    fn test_cr004_missing_file_is_error() {
        let result = fingerprint(Path::new("/nonexistent/dep.txt"));
        assert!(result.unwrap_err().contains("cannot stat"));
    }

    #[test]
    fn test_cr004_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(fingerprint(dir.path()).is_err());
    }

    #[test]
    fn test_cr004_serde_roundtrip() {
        let fp = Fingerprint {
            mtime_ns: 1_700_000_000_000_000_000,
            size: 42,
            hash: "blake3:abc".to_string(),
        };
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }
}
