//! Membership hashing for change detection.
//!
//! This module fingerprints a grouping's desired membership so that a run
//! can tell whether the declaration changed since the last applied record.

use sha2::{Digest, Sha256};

use crate::model::MemberSet;

/// Hasher for membership fingerprints.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a membership set.
    ///
    /// Sets are ordered, so the hash does not depend on declaration order.
    #[must_use]
    pub fn hash_members(&self, members: &MemberSet) -> String {
        let mut hasher = Sha256::new();

        for member in members {
            hasher.update(member.as_str().as_bytes());
            // Separator so that ["ab"] and ["a", "b"] differ.
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
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
