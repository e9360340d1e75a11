//! Property fingerprinting for change detection.
//!
//! Resolved property bags are hashed deterministically so the planner
//! can detect unchanged resources without a key-by-key comparison.

use sha2::{Digest, Sha256};

use super::value::ResolvedProperties;

/// Hasher for computing property fingerprints.
#[derive(Debug, Default)]
pub struct PropertyHasher;

impl PropertyHasher {
    /// Creates a new property hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a fingerprint over a resolved property bag.
    ///
    /// Keys are hashed in sorted order with the canonical JSON rendering
    /// of each value, so two bags with equal contents always produce the
    /// same fingerprint regardless of insertion order.
    #[must_use]
    pub fn fingerprint(&self, properties: &ResolvedProperties) -> String {
        let mut hasher = Sha256::new();

        // serde_json::Map iterates in key order
        for (key, value) in properties {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short fingerprint (first 8 characters) for display.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two fingerprints for equality.
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
