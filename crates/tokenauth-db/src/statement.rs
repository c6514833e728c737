//! Compiled credential-lookup statements.

use std::fmt;
use std::ops::Deref;
use std::time::{Duration, Instant};

use r2d2::{ManageConnection, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tokenauth_types::UserId;

use crate::connection::DbPool;
use crate::error::DbError;

/// The only query the read path runs.
pub(crate) const FIND_USER_SQL: &str =
    "SELECT id FROM user WHERE mail = ?1 AND hashed_password = ?2 LIMIT 1";

/// Where a [`StatementHandle`] came from, which decides what release does
/// with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOrigin {
    /// Created to fill the pool; returned to it after use.
    Pooled,
    /// Created on demand because the pool stayed empty; disposed after use.
    Fallback,
}

// The physical connection behind a handle.
enum Link {
    /// Checked out of the service's capped connection handle.
    Pooled(PooledConnection<SqliteConnectionManager>),
    /// Opened outside the cap for a fallback; closed on dispose.
    Dedicated(Connection),
}

impl Deref for Link {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Self::Pooled(conn) => &**conn,
            Self::Dedicated(conn) => conn,
        }
    }
}

/// A precompiled credential query bound to one physical connection.
///
/// The handle keeps its connection for its whole life, and the query is
/// compiled into that connection's statement cache at creation, so
/// executing it never recompiles. A handle is `Send` but not `Sync`: the
/// query cursor can only be driven by the one caller holding it.
pub struct StatementHandle {
    conn: Link,
    origin: HandleOrigin,
    created_at: Instant,
}

impl StatementHandle {
    /// Checks out a physical connection and compiles the lookup query on it.
    ///
    /// # Errors
    ///
    /// `DbError::Connection` if no physical connection is available in time,
    /// `DbError::Sqlite` if the query does not compile (missing schema).
    pub(crate) fn compile(db: &DbPool, origin: HandleOrigin) -> Result<Self, DbError> {
        Self::prepare(Link::Pooled(db.get()?), origin)
    }

    /// Like [`compile`](Self::compile) for a pooled handle, but waits at
    /// most `timeout` for a physical connection.
    pub(crate) fn compile_within(db: &DbPool, timeout: Duration) -> Result<Self, DbError> {
        Self::prepare(Link::Pooled(db.get_timeout(timeout)?), HandleOrigin::Pooled)
    }

    /// Compiles a fallback handle without waiting on `db`.
    ///
    /// Takes an idle pooled connection if one is free right now, otherwise
    /// opens a dedicated connection through `dedicated`, which is not bound
    /// by the `max_open` cap.
    ///
    /// # Errors
    ///
    /// `DbError::Sqlite` if the connection cannot be opened or the query
    /// does not compile.
    pub(crate) fn compile_fallback(
        db: &DbPool,
        dedicated: &SqliteConnectionManager,
    ) -> Result<Self, DbError> {
        let link = match db.try_get() {
            Some(conn) => Link::Pooled(conn),
            None => Link::Dedicated(dedicated.connect()?),
        };
        Self::prepare(link, HandleOrigin::Fallback)
    }

    fn prepare(conn: Link, origin: HandleOrigin) -> Result<Self, DbError> {
        conn.prepare_cached(FIND_USER_SQL)?;
        Ok(Self {
            conn,
            origin,
            created_at: Instant::now(),
        })
    }

    pub fn origin(&self) -> HandleOrigin {
        self.origin
    }

    /// Whether the handle holds a connection from outside the capped
    /// connection handle.
    pub fn is_dedicated(&self) -> bool {
        matches!(self.conn, Link::Dedicated(_))
    }

    /// Time since the handle was compiled.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Runs the query with `mail` and `hashed_password` bound in that order.
    ///
    /// Zero matching rows is `Ok(None)`.
    pub fn find_user_id(
        &self,
        mail: &str,
        hashed_password: &str,
    ) -> rusqlite::Result<Option<UserId>> {
        let mut stmt = self.conn.prepare_cached(FIND_USER_SQL)?;
        stmt.query_row(params![mail, hashed_password], |row| row.get(0))
            .optional()
    }

    pub(crate) fn ping(&self) -> rusqlite::Result<()> {
        self.conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Frees the compiled query. A pooled connection goes back to the
    /// connection handle, a dedicated one is closed.
    pub(crate) fn dispose(self) {
        self.conn.flush_prepared_statement_cache();
    }
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("origin", &self.origin)
            .field("dedicated", &self.is_dedicated())
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
