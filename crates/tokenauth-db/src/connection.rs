//! Connection handle creation and configuration.
//!
//! Each service owns one connection handle: an `r2d2` pool of physical
//! SQLite connections that all point at the same database file. The reader
//! and writer open their handles independently, with different access modes
//! and limits.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

use crate::error::DbError;

/// A type alias for the SQLite connection handle.
pub type DbPool = Pool<SqliteConnectionManager>;

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Schema creation and seeding. Creates the file if it does not exist.
    ReadWrite,
    /// Credential lookups only. The file and schema must already exist.
    ReadOnly,
}

impl AccessMode {
    fn flags(self) -> OpenFlags {
        let access = match self {
            Self::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            Self::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_FULL_MUTEX
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::ReadWrite => "read-write",
            Self::ReadOnly => "read-only",
        }
    }
}

/// Limits applied to a connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Maximum number of physical connections open at once.
    pub max_open: u32,

    /// Number of idle physical connections kept warm. r2d2 has no cap on
    /// idle connections, so this is applied as its `min_idle`: up to
    /// `max_open` connections may sit idle after a burst until
    /// `max_lifetime` retires them.
    pub max_idle: u32,

    /// Maximum age of a physical connection. `None` means unlimited.
    pub max_lifetime: Option<Duration>,

    /// How long to wait for a physical connection when `max_open` are in use.
    pub connection_timeout: Duration,

    /// SQLite busy timeout, in milliseconds. Zero surfaces lock conflicts
    /// immediately so the service-level retry policy handles them.
    pub busy_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_open: 8,
            max_idle: 2,
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            connection_timeout: Duration::from_secs(30),
            busy_timeout_ms: 5_000,
        }
    }
}

impl ConnectionSettings {
    /// Rejects combinations the pool builder would panic on.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.max_open == 0 {
            return Err(DbError::InvalidSettings("max_open must be positive".into()));
        }
        if self.max_idle > self.max_open {
            return Err(DbError::InvalidSettings(format!(
                "max_idle ({}) must not exceed max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        if self.max_lifetime == Some(Duration::ZERO) {
            return Err(DbError::InvalidSettings(
                "max_lifetime must be positive (use None for unlimited)".into(),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(DbError::InvalidSettings(
                "connection_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Builds the connection factory for `db_path`.
///
/// Read-write connections switch the file to WAL mode so read-only
/// connections can keep serving lookups while a seed transaction is open.
/// Read-only connections never touch the journal mode; they only set the
/// busy timeout and `query_only`.
pub fn connection_manager(
    db_path: &str,
    mode: AccessMode,
    busy_timeout_ms: u64,
) -> SqliteConnectionManager {
    SqliteConnectionManager::file(db_path)
        .with_flags(mode.flags())
        .with_init(move |conn| match mode {
            AccessMode::ReadWrite => init_read_write(conn, busy_timeout_ms),
            AccessMode::ReadOnly => init_read_only(conn, busy_timeout_ms),
        })
}

/// Opens a connection handle on `db_path`, capped at `max_open` physical
/// connections.
///
/// # Errors
///
/// Returns `DbError::InvalidSettings` for unusable limits and
/// `DbError::Connection` if the initial idle connections cannot be opened.
pub fn open_connection(
    db_path: &str,
    mode: AccessMode,
    settings: ConnectionSettings,
) -> Result<DbPool, DbError> {
    settings.validate()?;

    let manager = connection_manager(db_path, mode, settings.busy_timeout_ms);
    let pool = Pool::builder()
        .max_size(settings.max_open)
        .min_idle(Some(settings.max_idle))
        .max_lifetime(settings.max_lifetime)
        .connection_timeout(settings.connection_timeout)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        mode = mode.as_str(),
        max_open = settings.max_open,
        max_idle = settings.max_idle,
        "opened connection handle"
    );

    Ok(pool)
}

fn init_read_write(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    // In-memory databases report "memory", which is expected and acceptable.
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!(
                "failed to set WAL journal mode, got: {}",
                journal_mode
            )),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = {};",
        busy_timeout_ms
    ))
}

fn init_read_only(conn: &mut Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA query_only = ON;
         PRAGMA busy_timeout = {};",
        busy_timeout_ms
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_handle_uses_wal_and_busy_timeout() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("users.db");
        let settings = ConnectionSettings {
            max_open: 3,
            max_idle: 1,
            busy_timeout_ms: 2_500,
            ..ConnectionSettings::default()
        };

        let pool = open_connection(path.to_str().unwrap(), AccessMode::ReadWrite, settings)
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let busy_timeout: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.max_size(), 3, "max_open should bound the pool");
        assert_eq!(
            pool.min_idle(),
            Some(1),
            "max_idle is the number of warm connections r2d2 keeps"
        );
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("users.db");
        let path = path.to_str().unwrap();

        let writer = open_connection(path, AccessMode::ReadWrite, ConnectionSettings::default())
            .expect("writer should open");
        writer
            .get()
            .expect("should get writer connection")
            .execute_batch("CREATE TABLE sample (id INTEGER PRIMARY KEY);")
            .expect("should create sample table");

        let reader = open_connection(path, AccessMode::ReadOnly, ConnectionSettings::default())
            .expect("reader should open");
        let conn = reader.get().expect("should get reader connection");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sample", [], |row| row.get(0))
            .expect("reads should work");
        assert_eq!(count, 0);

        let err = conn
            .execute("INSERT INTO sample (id) VALUES (1)", [])
            .expect_err("writes must fail on a read-only handle");
        assert!(matches!(err, rusqlite::Error::SqliteFailure(..)), "{err:?}");
    }

    #[test]
    fn invalid_limits_are_rejected_before_building() {
        let too_many_idle = ConnectionSettings {
            max_open: 2,
            max_idle: 3,
            ..ConnectionSettings::default()
        };
        assert!(matches!(
            too_many_idle.validate(),
            Err(DbError::InvalidSettings(_))
        ));

        let zero_lifetime = ConnectionSettings {
            max_lifetime: Some(Duration::ZERO),
            ..ConnectionSettings::default()
        };
        assert!(matches!(
            open_connection(":memory:", AccessMode::ReadWrite, zero_lifetime),
            Err(DbError::InvalidSettings(_))
        ));
    }
}
