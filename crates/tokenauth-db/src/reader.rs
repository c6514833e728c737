//! Read-mostly database service: credential lookups through the statement
//! pool.

use std::time::Duration;

use tokenauth_types::UserId;

use crate::connection::{connection_manager, open_connection, AccessMode, ConnectionSettings};
use crate::error::DbError;
use crate::pool::{PoolSettings, PoolStats, StatementPool};
use crate::retry::LOOKUP_RETRY;

/// Identifier answered without touching the store when
/// [`ReaderSettings::synthetic_bypass`] is on.
pub const SYNTHETIC_IDENTIFIER: &str = "no_db";

/// User id returned for [`SYNTHETIC_IDENTIFIER`].
pub const SYNTHETIC_USER_ID: UserId = 1;

/// Settings for the [`ReaderService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Limits for the read-only connection handle. `max_open` must leave room
    /// for the whole pool; fallbacks beyond it use dedicated connections.
    pub connection: ConnectionSettings,
    pub pool: PoolSettings,
    /// Answer lookups for [`SYNTHETIC_IDENTIFIER`] with
    /// [`SYNTHETIC_USER_ID`], bypassing pool, retry and store. Meant for load
    /// tests that measure everything but the database. Off by default.
    pub synthetic_bypass: bool,
}

/// Default reader `max_open` for a pool of `capacity`: room for every
/// pooled handle plus as many fallbacks, saturating at `u32::MAX`.
pub fn default_reader_max_open(capacity: usize) -> u32 {
    u32::try_from(capacity.saturating_mul(2)).unwrap_or(u32::MAX)
}

impl Default for ReaderSettings {
    fn default() -> Self {
        let pool = PoolSettings::default();
        Self {
            connection: ConnectionSettings {
                max_open: default_reader_max_open(pool.capacity),
                max_idle: 4,
                max_lifetime: Some(Duration::from_secs(30 * 60)),
                connection_timeout: Duration::from_secs(30),
                busy_timeout_ms: 0,
            },
            pool,
            synthetic_bypass: false,
        }
    }
}

/// Outcome of a credential lookup that reached a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The pair matched; carries the stored user id.
    Found(UserId),
    /// No user has this identifier and hashed credential.
    NotFound,
}

/// Serves credential lookups from a read-only connection handle and a
/// pre-populated statement pool.
pub struct ReaderService {
    pool: StatementPool,
    synthetic_bypass: bool,
}

impl ReaderService {
    /// Opens the database read-only and fills the statement pool.
    ///
    /// # Errors
    ///
    /// Fatal to startup: invalid settings, an unreachable database, or a
    /// schema the lookup query cannot compile against.
    pub fn open(db_path: &str, settings: ReaderSettings) -> Result<Self, DbError> {
        if settings.pool.capacity == 0 {
            return Err(DbError::InvalidSettings(
                "pool capacity must be positive".into(),
            ));
        }
        if (settings.connection.max_open as usize) < settings.pool.capacity {
            return Err(DbError::InvalidSettings(format!(
                "reader max_open ({}) must be at least the pool capacity ({})",
                settings.connection.max_open, settings.pool.capacity
            )));
        }

        let db = open_connection(db_path, AccessMode::ReadOnly, settings.connection)?;
        let dedicated = connection_manager(
            db_path,
            AccessMode::ReadOnly,
            settings.connection.busy_timeout_ms,
        );
        let pool = StatementPool::new(
            db,
            dedicated,
            settings.pool,
            settings.connection.max_lifetime,
        );
        pool.populate()?;

        if settings.synthetic_bypass {
            tracing::warn!(
                identifier = SYNTHETIC_IDENTIFIER,
                "synthetic lookup bypass enabled"
            );
        }
        tracing::info!(
            path = db_path,
            capacity = settings.pool.capacity,
            "reader service ready"
        );

        Ok(Self {
            pool,
            synthetic_bypass: settings.synthetic_bypass,
        })
    }

    /// Looks up the user with `identifier` and `hashed_password`.
    ///
    /// The statement handle is released before returning on every path.
    ///
    /// # Errors
    ///
    /// `DbError::RetryExhausted` if the store stayed busy for every attempt
    /// under [`LOOKUP_RETRY`]; any fatal store error immediately.
    pub fn lookup(&self, identifier: &str, hashed_password: &str) -> Result<LookupOutcome, DbError> {
        if self.synthetic_bypass && identifier == SYNTHETIC_IDENTIFIER {
            return Ok(LookupOutcome::Found(SYNTHETIC_USER_ID));
        }

        let statement = self.pool.acquire()?;
        let user_id = LOOKUP_RETRY.run("lookup", || {
            Ok(statement.find_user_id(identifier, hashed_password)?)
        })?;

        Ok(match user_id {
            Some(id) => LookupOutcome::Found(id),
            None => LookupOutcome::NotFound,
        })
    }

    /// Runs a trivial query through a pooled connection.
    pub fn ping(&self) -> Result<(), DbError> {
        let statement = self.pool.acquire()?;
        statement.ping()?;
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Drains the statement pool, then drops the connection handle.
    ///
    /// Taking `self` means no lookup can still be holding a handle.
    pub fn close(self) {
        self.pool.drain();
        drop(self.pool);
        tracing::info!("reader service closed");
    }
}
