//! Integrity checks for a finished split
//!
//! A split is accepted only if every part is present on disk and the parts'
//! on-disk sizes add up to the artifact's size.

use std::fs;

use dumpcycle_core::{Error, PartFile, Result};
use tracing::debug;

/// Totals of a verified split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifySummary {
    /// Number of parts checked
    pub part_count: usize,
    /// Sum of the parts' on-disk sizes
    pub total_bytes: u64,
}

/// Check `parts` against an artifact of `source_size` bytes.
///
/// # Errors
///
/// Returns `Error::Verify` naming the first missing part, a part whose size
/// on disk differs from what the splitter wrote, or the size mismatch.
pub fn verify_parts(source_size: u64, parts: &[PartFile]) -> Result<VerifySummary> {
    let mut total_bytes = 0u64;

    for part in parts {
        let on_disk = match fs::metadata(&part.path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(Error::Verify(format!("part file missing: {}", part.name)));
            }
        };
        if on_disk != part.size_bytes {
            return Err(Error::Verify(format!(
                "part {} holds {} bytes on disk, {} were written",
                part.name, on_disk, part.size_bytes
            )));
        }
        total_bytes += on_disk;
    }

    debug!(
        target: "dumpcycle::split",
        source_size,
        total_bytes,
        parts = parts.len(),
        "Verifying split"
    );

    if total_bytes != source_size {
        return Err(Error::Verify(format!(
            "parts total {} bytes, artifact has {} bytes",
            total_bytes, source_size
        )));
    }

    Ok(VerifySummary {
        part_count: parts.len(),
        total_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::split;
    use tempfile::TempDir;

    fn split_fixture(content: &[u8], max: u64) -> (TempDir, u64, Vec<PartFile>) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("backup.sql");
        fs::write(&source, content).unwrap();
        let parts = split(&source, dir.path(), max).unwrap();
        (dir, content.len() as u64, parts)
    }

    #[test]
    fn test_verify_accepts_complete_split() {
        let (_dir, size, parts) = split_fixture(b"a;\nb;\nc;\n", 3);
        let summary = verify_parts(size, &parts).unwrap();
        assert_eq!(summary.part_count, 3);
        assert_eq!(summary.total_bytes, 9);
    }

    #[test]
    fn test_verify_rejects_size_mismatch() {
        let (_dir, size, parts) = split_fixture(b"a;\nb;\n", 3);
        let err = verify_parts(size + 1, &parts).unwrap_err();
        assert!(matches!(err, Error::Verify(_)));
    }

    #[test]
    fn test_verify_rejects_missing_part() {
        let (_dir, size, parts) = split_fixture(b"a;\nb;\n", 3);
        fs::remove_file(&parts[1].path).unwrap();

        let err = verify_parts(size, &parts).unwrap_err();
        assert!(err.to_string().contains("backup_part_002.sql"));
    }

    #[test]
    fn test_verify_rejects_truncated_part() {
        let (_dir, size, parts) = split_fixture(b"a;\nb;\n", 3);
        fs::write(&parts[0].path, b"a").unwrap();

        assert!(verify_parts(size, &parts).is_err());
    }
}
