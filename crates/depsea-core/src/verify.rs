use std::path::Path;

use crate::artifact::Artifact;
use crate::integrity::Integrity;

/// Checks downloaded archives against their declared integrity.
///
/// Every failure (missing file, unreadable file, unusable integrity string,
/// digest mismatch) is reported as `false`; nothing is retried or deleted.
#[derive(Debug, Default, Clone, Copy)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    pub fn verify(&self, path: &Path, expected: &str) -> bool {
        let integrity = match Integrity::parse(expected) {
            Ok(integrity) => integrity,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "unusable integrity string");
                return false;
            }
        };
        match integrity.matches_file(path) {
            Ok(matched) => matched,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "failed to hash file");
                false
            }
        }
    }
}

/// Outcome of checking a whole artifact list.
#[derive(Debug, Default, Clone)]
pub struct VerificationSummary {
    pub passed: usize,
    pub failed: Vec<Artifact>,
}

impl VerificationSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Verify each artifact under `dir`, sequentially and in list order.
pub fn verify_all(artifacts: &[Artifact], dir: &Path) -> VerificationSummary {
    let verifier = Verifier::new();
    let mut summary = VerificationSummary::default();
    for artifact in artifacts {
        let path = dir.join(&artifact.filename);
        if verifier.verify(&path, &artifact.integrity) {
            summary.passed += 1;
        } else {
            tracing::warn!(filename = %artifact.filename, "integrity check failed");
            summary.failed.push(artifact.clone());
        }
    }
    summary
}
