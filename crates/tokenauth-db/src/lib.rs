//! Database layer for tokenauth.
//!
//! Two services front one SQLite file:
//!
//! - [`WriterService`] opens it read/write, creates the schema through
//!   embedded migrations, and bulk-seeds users in a single transaction.
//! - [`ReaderService`] opens it read-only and answers credential lookups
//!   through a [`StatementPool`] of precompiled queries.
//!
//! [`DatabaseServices`] wires the two together in the right order.
//!
//! # Layering
//!
//! | Layer | Type |
//! |-------|------|
//! | connection handle | [`DbPool`] (`r2d2` over `rusqlite`) |
//! | statement handle | [`StatementHandle`] |
//! | bounded pool | [`StatementPool`] |
//! | services | [`ReaderService`], [`WriterService`] |
//!
//! # Contention
//!
//! SQLite reports lock conflicts as `SQLITE_BUSY`/`SQLITE_LOCKED`.
//! [`DbError::class`] maps those to [`ErrorClass::Transient`], and both
//! services retry them under a [`RetryPolicy`] ([`LOOKUP_RETRY`] for reads,
//! [`SEED_RETRY`] for writes). Everything else fails at once.

mod connection;
mod error;
mod migrations;
mod pool;
mod reader;
mod retry;
mod seed;
mod services;
mod statement;
mod writer;

pub use connection::{
    connection_manager, open_connection, AccessMode, ConnectionSettings, DbPool,
};
pub use error::{DbError, ErrorClass};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{
    PoolSettings, PoolStats, PooledStatement, StatementPool, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_POOL_CAPACITY,
};
pub use reader::{
    default_reader_max_open, LookupOutcome, ReaderService, ReaderSettings, SYNTHETIC_IDENTIFIER,
    SYNTHETIC_USER_ID,
};
pub use retry::{RetryPolicy, LOOKUP_RETRY, SEED_RETRY};
pub use seed::{hash_credential, synthesize, SeedRecord};
pub use services::{DatabaseServices, DatabaseSettings};
pub use statement::{HandleOrigin, StatementHandle};
pub use writer::{WriterService, WriterSettings};
