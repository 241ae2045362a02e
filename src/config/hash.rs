//! Hashing for change detection and secret fingerprints.
//!
//! Stage hashes are recorded in the identity state so `stagectl plan` can tell
//! which manifest entries changed since the last apply. Secret fingerprints
//! let the diff engine notice a rotated credential without ever storing it.

use sha2::{Digest, Sha256};

use super::spec::StageDesiredState;

/// Hasher for computing stage hashes and secret fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a stable hash of one desired state.
    ///
    /// The hash covers the canonical JSON encoding, so field order in the
    /// manifest does not matter while every value does (secrets included).
    #[must_use]
    pub fn hash_stage(&self, stage: &StageDesiredState) -> String {
        let mut hasher = Sha256::new();
        // Struct fields serialize in declaration order; a failure here would
        // only come from a non-string map key, which the types never contain.
        if let Ok(encoded) = serde_json::to_vec(stage) {
            hasher.update(&encoded);
        }
        hex::encode(hasher.finalize())
    }

    /// Fingerprints a write-only secret.
    ///
    /// The `path` is mixed in so equal values in different fields differ.
    #[must_use]
    pub fn fingerprint(path: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let stage = StageDesiredState::internal("DB", "SC", "ST");
        assert_eq!(hasher.hash_stage(&stage), hasher.hash_stage(&stage.clone()));
    }

    #[test]
    fn test_comment_changes_hash() {
        let hasher = ConfigHasher::new();
        let stage = StageDesiredState::internal("DB", "SC", "ST");
        let commented = stage.with_comment(Some("landing"));
        assert_ne!(hasher.hash_stage(&stage), hasher.hash_stage(&commented));
    }

    #[test]
    fn test_fingerprint_is_path_scoped() {
        let a = ConfigHasher::fingerprint("credentials.aws_secret_key", "s3cr3t");
        let b = ConfigHasher::fingerprint("encryption.master_key", "s3cr3t");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("s3cr3t"));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
