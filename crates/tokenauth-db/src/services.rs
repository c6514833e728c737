//! The reader/writer pair that fronts one database file.

use crate::error::DbError;
use crate::reader::{LookupOutcome, ReaderService, ReaderSettings};
use crate::writer::{WriterService, WriterSettings};

/// Settings for both services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Open only the reader. Seeding is refused.
    pub read_only: bool,
    pub reader: ReaderSettings,
    pub writer: WriterSettings,
}

/// A writer (schema + seed) and a reader (lookups) opened independently on
/// the same database file.
pub struct DatabaseServices {
    reader: ReaderService,
    writer: Option<WriterService>,
}

impl DatabaseServices {
    /// Opens the writer (unless read-only), then the reader.
    ///
    /// The writer goes first because the reader compiles its statements at
    /// open and needs the schema in place.
    ///
    /// # Errors
    ///
    /// Any error from either service's open. A writer opened before a reader
    /// failure is dropped.
    pub fn open(db_path: &str, settings: DatabaseSettings) -> Result<Self, DbError> {
        let writer = if settings.read_only {
            tracing::info!(path = db_path, "read-only mode, seeding disabled");
            None
        } else {
            Some(WriterService::open(db_path, settings.writer)?)
        };
        let reader = ReaderService::open(db_path, settings.reader)?;

        Ok(Self { reader, writer })
    }

    pub fn reader(&self) -> &ReaderService {
        &self.reader
    }

    pub fn writer(&self) -> Option<&WriterService> {
        self.writer.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// See [`ReaderService::lookup`].
    pub fn lookup(&self, identifier: &str, hashed_password: &str) -> Result<LookupOutcome, DbError> {
        self.reader.lookup(identifier, hashed_password)
    }

    /// See [`WriterService::seed`].
    ///
    /// # Errors
    ///
    /// `DbError::ReadOnly` when opened without a writer.
    pub fn seed(&self, count: usize) -> Result<usize, DbError> {
        match &self.writer {
            Some(writer) => writer.seed(count),
            None => Err(DbError::ReadOnly),
        }
    }

    /// Closes the reader (draining its pool), then the writer.
    pub fn close(self) {
        self.reader.close();
        if let Some(writer) = self.writer {
            writer.close();
        }
    }
}
