//! Database connection management.
//!
//! A `ConnectionProvider` hands out one `Database` per worker. Each handle
//! owns a single rusqlite `Connection`; it is `Send` so it can be moved into
//! a worker thread, but not `Sync`, so it is never shared. Concurrency
//! between workers is left to SQLite's own locking (WAL + busy timeout).

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use labelbook_core::config::StorageConfig;
use labelbook_core::error::{LabelbookError, Result};

use crate::schema::{self, SchemaInitializer, StoreKind};

/// Map a rusqlite error into a storage error with a short context prefix.
pub(crate) fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> LabelbookError {
    move |e| LabelbookError::Storage(format!("{}: {}", context, e))
}

/// True when an error means the table vanished under us.
pub(crate) fn is_missing_table(err: &LabelbookError) -> bool {
    matches!(err, LabelbookError::Storage(msg) if msg.contains("no such table"))
}

/// Factory for per-worker handles on one store file.
#[derive(Clone, Debug)]
pub struct ConnectionProvider {
    path: PathBuf,
    kind: StoreKind,
    settings: StorageConfig,
}

impl ConnectionProvider {
    pub fn new(path: impl Into<PathBuf>, kind: StoreKind, settings: StorageConfig) -> Self {
        Self {
            path: path.into(),
            kind,
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Schema initializer for the same file.
    pub fn schema(&self) -> SchemaInitializer {
        SchemaInitializer::new(&self.path, self.kind)
    }

    /// Open a handle for the calling worker. The schema is initialized as
    /// part of opening.
    pub fn get_connection(&self) -> Result<Database> {
        Database::open(&self.path, self.kind, self.settings.clone())
    }
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// A single worker's connection to one store file.
pub struct Database {
    conn: RefCell<Connection>,
    location: Location,
    kind: StoreKind,
    settings: StorageConfig,
}

impl Database {
    /// Open (or create) a store file and bring its schema up to date.
    pub fn open(path: &Path, kind: StoreKind, settings: StorageConfig) -> Result<Self> {
        let conn = open_file(path, &settings)?;
        schema::apply(&conn, kind)?;
        debug!(path = %path.display(), store = ?kind, "Database handle opened");

        Ok(Self {
            conn: RefCell::new(conn),
            location: Location::File(path.to_path_buf()),
            kind,
            settings,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory(kind: StoreKind) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(db_err("Failed to open in-memory db"))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_err("Failed to set pragmas"))?;
        schema::apply(&conn, kind)?;

        Ok(Self {
            conn: RefCell::new(conn),
            location: Location::Memory,
            kind,
            settings: StorageConfig::default(),
        })
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(p) => Some(p),
            Location::Memory => None,
        }
    }

    /// Execute a closure with the underlying connection.
    ///
    /// If the backing file was deleted since the handle was opened, the file
    /// is recreated (with its schema) before the closure runs.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.reopen_if_missing()?;
        let conn = self
            .conn
            .try_borrow()
            .map_err(|e| LabelbookError::Storage(format!("Connection busy: {}", e)))?;
        f(&conn)
    }

    /// Run a read, re-initializing the schema and retrying once if the
    /// table turned out to be missing.
    pub fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T>,
    {
        match self.with_conn(&f) {
            Err(e) if is_missing_table(&e) => {
                warn!(store = ?self.kind, error = %e, "Table missing, re-initializing schema");
                self.ensure_schema()?;
                self.with_conn(&f)
            }
            other => other,
        }
    }

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        self.reopen_if_missing()?;
        let mut conn = self
            .conn
            .try_borrow_mut()
            .map_err(|e| LabelbookError::Storage(format!("Connection busy: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;

        // Dropping an uncommitted transaction rolls it back.
        let value = f(&tx)?;
        tx.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(value)
    }

    /// Re-run the idempotent schema statements on this handle.
    pub fn ensure_schema(&self) -> Result<()> {
        let kind = self.kind;
        self.with_conn(|conn| schema::apply(conn, kind))
    }

    /// Release the handle, surfacing any close error.
    pub fn close(self) -> Result<()> {
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| LabelbookError::Storage(format!("Failed to close database: {}", e)))
    }

    fn reopen_if_missing(&self) -> Result<()> {
        let Location::File(path) = &self.location else {
            return Ok(());
        };
        if path.exists() {
            return Ok(());
        }

        warn!(path = %path.display(), "Database file disappeared, recreating");
        let mut slot = self
            .conn
            .try_borrow_mut()
            .map_err(|e| LabelbookError::Storage(format!("Connection busy: {}", e)))?;

        // The stale connection must be closed before a new file exists at the
        // same path: closing a WAL connection removes `<path>-wal` by name.
        let placeholder =
            Connection::open_in_memory().map_err(db_err("Failed to open placeholder"))?;
        drop(std::mem::replace(&mut *slot, placeholder));

        let fresh = open_file(path, &self.settings)?;
        schema::apply(&fresh, self.kind)?;
        *slot = fresh;
        info!(path = %path.display(), "Database file recreated");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("kind", &self.kind)
            .finish()
    }
}

fn open_file(path: &Path, settings: &StorageConfig) -> Result<Connection> {
    // Ensure parent directory exists.
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(|e| {
        LabelbookError::Storage(format!("Failed to open {}: {}", path.display(), e))
    })?;

    conn.busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
        .map_err(db_err("Failed to set busy timeout"))?;

    let journal = if settings.wal { "WAL" } else { "DELETE" };
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = {};
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
        journal
    ))
    .map_err(db_err("Failed to set pragmas"))?;

    Ok(conn)
}
