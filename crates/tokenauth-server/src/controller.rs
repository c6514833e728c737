//! Async entry points over the blocking database services.
//!
//! Every call runs on the blocking thread pool so a transport built on tokio
//! never stalls its workers on SQLite, pool waits, or retry sleeps.

use std::sync::Arc;

use tokenauth_db::{DatabaseServices, DbError, LookupOutcome};
use tokenauth_types::{LookupResult, SeedResult};

/// Message for a credential pair that matched no user.
pub const INVALID_CREDENTIALS: &str = "Invalid username or password";

/// Message for a lookup that failed inside the store.
pub const LOOKUP_FAILED: &str = "An error occurred during authentication";

/// Message for a seed attempted without a writer.
pub const READ_ONLY_MODE: &str = "Database opened in read-only mode";

/// Message for a seed that failed inside the store.
pub const SEED_FAILED: &str = "An error occurred while creating the database";

/// Maps caller requests onto [`DatabaseServices`] and their outcomes onto the
/// shared result shapes. Store errors are logged here and never leak their
/// details to the caller.
#[derive(Clone)]
pub struct AuthController {
    services: Arc<DatabaseServices>,
}

impl AuthController {
    pub fn new(services: Arc<DatabaseServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<DatabaseServices> {
        &self.services
    }

    /// Looks up a user by identifier and already-hashed credential.
    pub async fn lookup(&self, identifier: String, hashed_password: String) -> LookupResult {
        let services = Arc::clone(&self.services);
        let result =
            tokio::task::spawn_blocking(move || services.lookup(&identifier, &hashed_password))
                .await;

        match result {
            Ok(Ok(LookupOutcome::Found(user_id))) => LookupResult::found(user_id),
            Ok(Ok(LookupOutcome::NotFound)) => LookupResult::not_found(INVALID_CREDENTIALS),
            Ok(Err(e)) => {
                tracing::error!(error = %e, class = ?e.class(), "lookup failed");
                LookupResult::not_found(LOOKUP_FAILED)
            }
            Err(e) => {
                tracing::error!(error = %e, "lookup task panicked or was cancelled");
                LookupResult::not_found(LOOKUP_FAILED)
            }
        }
    }

    /// Replaces all users with `count` synthesized records.
    pub async fn seed(&self, count: usize) -> SeedResult {
        let services = Arc::clone(&self.services);
        let result = tokio::task::spawn_blocking(move || services.seed(count)).await;

        match result {
            Ok(Ok(written)) => SeedResult::written(written),
            Ok(Err(DbError::ReadOnly)) => SeedResult::failed(READ_ONLY_MODE),
            Ok(Err(e)) => {
                tracing::error!(error = %e, count, "seed failed");
                SeedResult::failed(SEED_FAILED)
            }
            Err(e) => {
                tracing::error!(error = %e, "seed task panicked or was cancelled");
                SeedResult::failed(SEED_FAILED)
            }
        }
    }
}
