//! Database operations using rusqlite.
//!
//! The sync pipeline never writes through a caller's own connection. It
//! receives a [`ServiceWriter`], an explicit elevated-capability handle over
//! the shared database, at construction time.

use crate::storage::schema::{CURRENT_VERSION, SCHEMA};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        Self::with_schema(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
        Self::with_schema(conn)
    }

    /// Apply the schema once, tracked through `PRAGMA user_version`.
    fn with_schema(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        let version = db.schema_version()?;
        if version < CURRENT_VERSION {
            db.conn
                .execute_batch(&format!(
                    "BEGIN; {} PRAGMA user_version = {}; COMMIT;",
                    SCHEMA, CURRENT_VERSION
                ))
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
            tracing::info!("Database schema upgraded from {} to {}", version, CURRENT_VERSION);
        }

        Ok(db)
    }

    /// Schema version stored in the database file.
    pub fn schema_version(&self) -> Result<i32, DatabaseError> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front so a check-then-write inside the
    /// transaction cannot interleave with another writer.
    pub fn immediate_transaction(&mut self) -> Result<Transaction<'_>, DatabaseError> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }
}

/// Run `f` under the savepoint `name` on `conn`.
///
/// An error rolls back everything `f` wrote and is handed back unchanged,
/// leaving the enclosing transaction usable.
pub fn with_savepoint<T>(
    conn: &Connection,
    name: &'static str,
    f: impl FnOnce() -> Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    conn.execute_batch(&format!("SAVEPOINT {}", name))
        .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {}", name))
                .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) =
                conn.execute_batch(&format!("ROLLBACK TO {0}; RELEASE {0}", name))
            {
                tracing::error!("Rollback to savepoint {} failed: {}", name, rollback);
            }
            Err(e)
        }
    }
}

/// Elevated write capability over the shared database.
///
/// Constructed only through [`ServiceWriter::elevate`] so every place that
/// escalates past the caller's permission context is visible at its call
/// site. Cloning shares the same database.
#[derive(Clone)]
pub struct ServiceWriter {
    db: Arc<Mutex<Database>>,
}

impl ServiceWriter {
    /// Grant service-level write access over `db`.
    pub fn elevate(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, DatabaseError> {
        self.db
            .lock()
            .map_err(|_| DatabaseError::ConnectionFailed("database lock poisoned".to_string()))
    }

    /// Run read or single-statement work on the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let db = self.lock()?;
        f(db.connection())
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls the whole unit back.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut db = self.lock()?;
        let tx = db.immediate_transaction()?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(value)
    }
}

/// Format a timestamp for storage.
///
/// Fixed-width UTC with microseconds so lexical order in SQL matches
/// chronological order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid timestamp {}: {}", value, e))
        })
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
