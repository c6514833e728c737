//! Shared types for the tokenauth workspace.
//!
//! These are the shapes handed to whatever sits in front of the database
//! services (an HTTP layer, a CLI, a load tester). They carry no behavior
//! beyond construction helpers, so every crate can depend on them without
//! pulling in SQLite.

use serde::{Deserialize, Serialize};

/// Identifier assigned to a user row by the store.
pub type UserId = i64;

/// Result of a credential lookup as exposed to callers.
///
/// All three outcomes (match, mismatch, failure) are reported through the same
/// shape; `found` is the only field a caller has to branch on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResult {
    /// Whether the credential pair matched a stored user.
    pub found: bool,
    /// The matched user's identifier, present only when `found` is true.
    pub user_id: Option<UserId>,
    /// Human-readable reason when `found` is false.
    pub error: Option<String>,
}

impl LookupResult {
    /// A successful match.
    pub fn found(user_id: UserId) -> Self {
        Self {
            found: true,
            user_id: Some(user_id),
            error: None,
        }
    }

    /// A mismatch or failure with the given message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            found: false,
            user_id: None,
            error: Some(message.into()),
        }
    }
}

/// Result of a bulk seed as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedResult {
    /// Number of records written by the committed transaction.
    pub written: usize,
    /// Failure reason; `written` is 0 whenever this is set.
    pub error: Option<String>,
}

impl SeedResult {
    pub fn written(written: usize) -> Self {
        Self {
            written,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            written: 0,
            error: Some(message.into()),
        }
    }
}
