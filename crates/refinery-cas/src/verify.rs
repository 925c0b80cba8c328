//! Digest verification for fetched artifacts.

use std::path::Path;

use crate::CasError;

/// Recompute the sha256 of the file at `path` and compare against `expected`.
///
/// On mismatch the file is removed so a corrupt blob can never be picked up
/// by a later cache probe, and the error carries both digests.
pub fn verify_digest(path: &Path, expected: &str) -> Result<(), CasError> {
    let computed = refinery_artifact::sha256_file(path)?;
    if computed == expected {
        return Ok(());
    }
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!("failed to remove corrupt blob {}: {err}", path.display());
    }
    Err(CasError::DigestMismatch {
        path: path.display().to_string(),
        expected: expected.to_string(),
        computed,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn matching_digest_passes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"blob bytes").unwrap();
        let expected = refinery_artifact::sha256_bytes(b"blob bytes");
        verify_digest(file.path(), &expected).unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn mismatch_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"tampered").unwrap();
        let err = verify_digest(&path, "sha256:0000").unwrap_err();
        assert!(matches!(err, CasError::DigestMismatch { .. }));
        assert!(!path.exists());
    }
}
