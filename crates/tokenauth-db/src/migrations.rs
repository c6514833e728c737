//! Embedded schema migrations.
//!
//! The writer applies these on open. Every statement is `IF NOT EXISTS`, so
//! a database created by an older deployment (or by hand) is adopted as-is;
//! the `_tokenauth_migrations` table only records what has been applied.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_users",
        sql: include_str!("migrations/000_users.sql"),
    },
    Migration {
        name: "001_user_credentials_index",
        sql: include_str!("migrations/001_user_credentials_index.sql"),
    },
];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies every pending migration and returns how many were applied.
///
/// # Errors
///
/// Returns `MigrationError` if a migration fails (its partial effects are
/// rolled back) or if the tracking table cannot be read.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _tokenauth_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(failed("_tokenauth_migrations_bootstrap"))?;

    let mut applied = 0;
    for migration in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _tokenauth_migrations WHERE name = ?1",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(failed(migration.name))?;
        applied += 1;
    }

    Ok(applied)
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _tokenauth_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}

fn failed(name: &str) -> impl FnOnce(rusqlite::Error) -> MigrationError + '_ {
    move |source| MigrationError::ExecutionFailed {
        name: name.to_string(),
        source,
    }
}
