//! Synthetic user records for bulk seeding.

use sha2::{Digest, Sha256};

/// One row to be inserted by a seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord {
    pub mail: String,
    pub hashed_password: String,
}

/// Lowercase hex SHA-256 of `raw`, the credential format stored in the
/// `hashed_password` column.
pub fn hash_credential(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Builds `count` records: `user{i}@example.com` with the hash of
/// `password{i}`, for `i` in `1..=count`.
pub fn synthesize(count: usize) -> Vec<SeedRecord> {
    (1..=count)
        .map(|i| SeedRecord {
            mail: format!("user{i}@example.com"),
            hashed_password: hash_credential(&format!("password{i}")),
        })
        .collect()
}
