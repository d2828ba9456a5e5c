//! Capture-note ingestion.
//!
//! Walks the capture directory, reads every eligible Markdown file, splits
//! header from body and fingerprints the raw text. Records come back sorted
//! by path so that everything downstream (dedup, per-run caps) sees them in
//! the same order on every run.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::IngestError;
use crate::frontmatter;
use crate::models::Record;

const INCLUDE_GLOBS: &[&str] = &["**/*.md"];

/// Daily notes from the old layout (`2024-01-31.md`) are not captures.
static LEGACY_DAILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}\.md$").unwrap());

/// SHA-256 of the raw text as lowercase hex.
pub fn fingerprint(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Build a record from text already in memory.
pub fn record_from_text(path: &Path, raw: String) -> Record {
    let (header, body) = frontmatter::parse_note(&raw);
    let body = body.to_string();
    Record {
        path: path.to_path_buf(),
        header,
        body,
        fingerprint: fingerprint(&raw),
        raw,
    }
}

/// Read and parse a single note.
pub fn read_record(path: &Path) -> Result<Record> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read note: {}", path.display()))?;
    Ok(record_from_text(path, raw))
}

/// Scan `capture_dir` and return every eligible note in sorted path order.
///
/// Fails with [`IngestError::CaptureDirMissing`] when the directory does
/// not exist; otherwise only read errors abort the scan.
pub fn scan_capture_dir(capture_dir: &Path) -> Result<Vec<Record>> {
    if !capture_dir.is_dir() {
        return Err(IngestError::CaptureDirMissing(capture_dir.to_path_buf()).into());
    }

    let include_set = build_globset(INCLUDE_GLOBS)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(capture_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(capture_dir).unwrap_or(path);
        if !include_set.is_match(relative) {
            continue;
        }

        let is_legacy = path
            .file_name()
            .map(|n| LEGACY_DAILY.is_match(&n.to_string_lossy()))
            .unwrap_or(false);
        if is_legacy {
            continue;
        }

        paths.push(path.to_path_buf());
    }

    // Sort for deterministic ordering
    paths.sort();

    paths.iter().map(|p| read_record(p)).collect()
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_deterministic() {
        let text = "---\ntitle: x\n---\nbody\n";
        assert_eq!(fingerprint(text), fingerprint(text));
        assert_eq!(fingerprint(text).len(), 64);
    }

    #[test]
    fn test_fingerprint_single_byte_change() {
        let base = "---\ntags: [todo]\n---\nBuy milk\n";
        let original = fingerprint(base);
        let bytes = base.as_bytes();
        for i in 0..bytes.len() {
            let mut changed = bytes.to_vec();
            changed[i] = if bytes[i] == b'a' { b'b' } else { b'a' };
            let changed = String::from_utf8(changed).unwrap();
            assert_ne!(fingerprint(&changed), original, "collision at byte {}", i);
        }
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("b.md"), "b").unwrap();
        fs::write(root.join("a.md"), "---\ntitle: A\n---\n\nbody a\n").unwrap();
        fs::write(root.join("sub/c.md"), "c").unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join("2024-01-31.md"), "legacy daily").unwrap();
        fs::write(root.join("sub/2024-01-31-meeting.md"), "kept").unwrap();

        let records = scan_capture_dir(root).unwrap();
        let names: Vec<_> = records
            .iter()
            .map(|r| r.path.strip_prefix(root).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.md", "sub/2024-01-31-meeting.md", "sub/c.md"]);

        let a = &records[0];
        assert_eq!(a.title().as_deref(), Some("A"));
        assert_eq!(a.body, "body a\n");
        assert_eq!(a.fingerprint, fingerprint(&a.raw));
    }

    #[test]
    fn test_scan_missing_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let err = scan_capture_dir(&tmp.path().join("absent")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::CaptureDirMissing(_))
        ));
    }
}
