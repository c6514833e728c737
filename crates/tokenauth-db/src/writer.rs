//! Read/write database service: schema creation and bulk seeding.

use std::time::{Duration, Instant};

use rusqlite::{params, TransactionBehavior};

use crate::connection::{open_connection, AccessMode, ConnectionSettings, DbPool};
use crate::error::DbError;
use crate::migrations::run_migrations;
use crate::retry::SEED_RETRY;
use crate::seed::{synthesize, SeedRecord};

/// Settings for the [`WriterService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterSettings {
    pub connection: ConnectionSettings,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings {
                max_open: 4,
                max_idle: 1,
                max_lifetime: None,
                connection_timeout: Duration::from_secs(30),
                busy_timeout_ms: 5_000,
            },
        }
    }
}

/// Owns the read/write connection handle.
///
/// Concurrent seeds are not coordinated here; SQLite's write lock serialises
/// them and the loser retries or gives up under [`SEED_RETRY`].
pub struct WriterService {
    db: DbPool,
}

impl WriterService {
    /// Opens the database for writing and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Any error is fatal to startup: the connection could not be opened or
    /// a migration failed.
    pub fn open(db_path: &str, settings: WriterSettings) -> Result<Self, DbError> {
        let db = open_connection(db_path, AccessMode::ReadWrite, settings.connection)?;

        let applied = {
            let conn = db.get()?;
            run_migrations(&conn)?
        };
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }

        tracing::info!(path = db_path, "writer service ready");
        Ok(Self { db })
    }

    /// Replaces every user with `count` synthesized records.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// On any error the table is left exactly as it was before the call.
    pub fn seed(&self, count: usize) -> Result<usize, DbError> {
        self.seed_records(&synthesize(count))
    }

    /// Replaces every user with `records` in one transaction, retrying the
    /// whole transaction while the store is busy.
    ///
    /// # Errors
    ///
    /// `DbError::RetryExhausted` if the write lock never became available,
    /// otherwise the first fatal error. Either way nothing is applied.
    pub fn seed_records(&self, records: &[SeedRecord]) -> Result<usize, DbError> {
        let started = Instant::now();
        let written = SEED_RETRY.run("seed", || self.replace_all(records))?;

        if let Err(e) = self.optimize() {
            tracing::warn!(error = %e, "post-seed optimize failed");
        }
        tracing::info!(
            written,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "seeded user table"
        );
        Ok(written)
    }

    /// Number of rows in the user table.
    pub fn user_count(&self) -> Result<i64, DbError> {
        let conn = self.db.get()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM user", [], |row| row.get(0))?)
    }

    /// Drops the connection handle.
    pub fn close(self) {
        drop(self.db);
        tracing::info!("writer service closed");
    }

    // One attempt. The transaction rolls back on drop, so an early return
    // leaves nothing behind.
    fn replace_all(&self, records: &[SeedRecord]) -> Result<usize, DbError> {
        let mut conn = self.db.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM user", [])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO user (mail, hashed_password) VALUES (?1, ?2)")?;
            for record in records {
                insert.execute(params![record.mail, record.hashed_password])?;
            }
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn optimize(&self) -> Result<(), DbError> {
        let conn = self.db.get()?;
        conn.execute_batch("ANALYZE; PRAGMA optimize;")?;
        Ok(())
    }
}
