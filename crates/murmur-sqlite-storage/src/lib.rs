//! SQLite-based storage implementation for the murmur sync engine.
//!
//! This crate implements the [`SyncStorageProvider`] trait on top of an embedded
//! SQLite database. It is the durable local store: conversations, users, members
//! with their read watermarks, messages, and the outbox all live in one database
//! file, so a pending send and its outbox entry can be written atomically.
//!
//! Referential integrity is enforced twice: the storage methods check for missing
//! parent rows and return typed errors, and the schema declares foreign keys
//! (`PRAGMA foreign_keys = ON`) as the backstop. Uniqueness of message ids and
//! provisional ids is enforced by the schema and surfaces as
//! `MessageError::AlreadyExists`.
//!
//! ```no_run
//! use murmur_sqlite_storage::MurmurSqliteStorage;
//!
//! let storage = MurmurSqliteStorage::new("/path/to/murmur.sqlite")?;
//! # Ok::<(), murmur_sqlite_storage::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use murmur_storage_traits::{Backend, SyncStorageProvider};
use rusqlite::Connection;

mod conversations;
mod db;
pub mod error;
mod members;
mod messages;
mod migrations;
mod outbox;
mod validation;

use self::error::Error;

/// A SQLite-based storage implementation for the sync engine.
///
/// All tables share one connection behind a mutex, which serializes writers
/// and lets multi-table operations run inside a single savepoint.
#[derive(Clone)]
pub struct MurmurSqliteStorage {
    connection: Arc<Mutex<Connection>>,
}

impl MurmurSqliteStorage {
    /// Open (or create) a database at `file_path` and run pending migrations.
    ///
    /// `":memory:"` opens a private in-memory database. Missing parent
    /// directories are created.
    pub fn new<P>(file_path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let file_path = file_path.as_ref();

        let path_str = file_path.to_string_lossy();
        if !path_str.is_empty() && !path_str.starts_with(':') {
            if let Some(parent) = file_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let mut connection = Self::open_connection(file_path)?;
        migrations::run_migrations(&mut connection)?;

        tracing::debug!(path = %path_str, "opened local store");

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Creates a new in-memory [`MurmurSqliteStorage`].
    ///
    /// In-memory databases do not persist data.
    pub fn new_in_memory() -> Result<Self, Error> {
        let mut connection = Connection::open_in_memory()?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_migrations(&mut connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn open_connection(file_path: &Path) -> Result<Connection, Error> {
        let conn = Connection::open(file_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Provides access to the underlying connection for storage operations.
    pub(crate) fn with_connection<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Run `f` inside a named savepoint, rolling back if it returns an error.
    ///
    /// Savepoints work both inside and outside an existing transaction.
    pub(crate) fn with_savepoint<F, T, E>(
        &self,
        name: &str,
        into_err: fn(rusqlite::Error) -> E,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
    {
        self.with_connection(|conn| {
            conn.execute_batch(&format!("SAVEPOINT {name}"))
                .map_err(into_err)?;

            match f(conn) {
                Ok(value) => {
                    conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))
                        .map_err(into_err)?;
                    Ok(value)
                }
                Err(e) => {
                    // Best-effort cleanup to keep connection usable.
                    let _ = conn.execute_batch(&format!(
                        "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
                    ));
                    Err(e)
                }
            }
        })
    }
}

impl SyncStorageProvider for MurmurSqliteStorage {
    fn backend(&self) -> Backend {
        Backend::SQLite
    }
}
