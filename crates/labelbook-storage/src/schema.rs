//! Schema initialization for the record store files.
//!
//! Every statement is idempotent so the initializer can run on each handle
//! open and again before every write. That is what lets a store heal itself
//! when a table is dropped or the file disappears while the app is running.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, error, info};

use labelbook_core::error::{LabelbookError, Result};

/// Which database file a handle or initializer targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// `logs/shipping_logs/shipping_logs.db`, table `shipping_logs`.
    ShippingLogs,
    /// `database/labels.db`, table `label_metadata`.
    Labels,
}

impl StoreKind {
    pub fn table(&self) -> &'static str {
        match self {
            StoreKind::ShippingLogs => "shipping_logs",
            StoreKind::Labels => "label_metadata",
        }
    }
}

/// Current schema version per store kind.
const SHIPPING_LOGS_VERSION: i64 = 1;
const LABELS_VERSION: i64 = 2;

/// Creates a store file, its directory and its tables on demand.
#[derive(Clone, Debug)]
pub struct SchemaInitializer {
    path: PathBuf,
    kind: StoreKind,
}

impl SchemaInitializer {
    pub fn new(path: impl Into<PathBuf>, kind: StoreKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory tree, the file and the schema.
    pub fn try_initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path).map_err(|e| {
            LabelbookError::Storage(format!(
                "Failed to open {}: {}",
                self.path.display(),
                e
            ))
        })?;
        apply(&conn, self.kind)
    }

    /// Boolean form for callers that only need to know whether it worked.
    /// Failures are logged, never raised.
    pub fn initialize(&self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    store = ?self.kind,
                    error = %e,
                    "Schema initialization failed"
                );
                false
            }
        }
    }
}

/// Apply the schema for `kind` to an open connection.
pub fn apply(conn: &Connection, kind: StoreKind) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );",
    )
    .map_err(|e| LabelbookError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let before = current_version(conn)?;

    match kind {
        StoreKind::ShippingLogs => apply_shipping_logs(conn)?,
        StoreKind::Labels => apply_labels(conn)?,
    }

    let target = match kind {
        StoreKind::ShippingLogs => SHIPPING_LOGS_VERSION,
        StoreKind::Labels => LABELS_VERSION,
    };
    if before < target {
        info!(store = ?kind, from = before, to = target, "Schema upgraded");
    } else {
        debug!(store = ?kind, version = target, "Schema verified");
    }
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| LabelbookError::Storage(format!("Failed to query schema version: {}", e)))
}

fn apply_shipping_logs(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS shipping_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       TEXT NOT NULL,
            tracking_number TEXT,
            sku             TEXT,
            action          TEXT NOT NULL DEFAULT 'unknown',
            status          TEXT NOT NULL,
            details         TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_shipping_logs_timestamp
            ON shipping_logs (timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_shipping_logs_tracking
            ON shipping_logs (tracking_number);

        CREATE INDEX IF NOT EXISTS idx_shipping_logs_sku
            ON shipping_logs (sku);

        CREATE INDEX IF NOT EXISTS idx_shipping_logs_status
            ON shipping_logs (status);

        -- Legacy sources already copied into this store.
        CREATE TABLE IF NOT EXISTS legacy_imports (
            source_key   TEXT PRIMARY KEY NOT NULL,
            source       TEXT NOT NULL,
            imported     INTEGER NOT NULL,
            skipped      INTEGER NOT NULL,
            completed_at TEXT NOT NULL
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'shipping_logs');
        ",
    )
    .map_err(|e| LabelbookError::Storage(format!("Failed to apply shipping log schema: {}", e)))
}

fn apply_labels(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS label_metadata (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            upc                 TEXT,
            item_variant_number TEXT,
            department          TEXT,
            category            TEXT,
            color               TEXT,
            website_color       TEXT,
            website_name        TEXT,
            label_name          TEXT,
            sku                 TEXT,
            user_notes          TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        CREATE INDEX IF NOT EXISTS idx_label_upc ON label_metadata (upc);
        CREATE INDEX IF NOT EXISTS idx_label_item_variant ON label_metadata (item_variant_number);
        CREATE INDEX IF NOT EXISTS idx_label_department ON label_metadata (department);
        CREATE INDEX IF NOT EXISTS idx_label_category ON label_metadata (category);
        CREATE INDEX IF NOT EXISTS idx_label_color ON label_metadata (color);
        CREATE INDEX IF NOT EXISTS idx_label_website_name ON label_metadata (website_name);
        CREATE INDEX IF NOT EXISTS idx_label_label_name ON label_metadata (label_name);
        CREATE INDEX IF NOT EXISTS idx_label_sku ON label_metadata (sku);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'label_metadata');
        ",
    )
    .map_err(|e| LabelbookError::Storage(format!("Failed to apply label schema: {}", e)))?;

    // v2: files created before notes existed lack the column.
    if !has_column(conn, "label_metadata", "user_notes")? {
        conn.execute_batch("ALTER TABLE label_metadata ADD COLUMN user_notes TEXT;")
            .map_err(|e| LabelbookError::Storage(format!("Failed to add user_notes: {}", e)))?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'label_user_notes')",
        [],
    )
    .map_err(|e| LabelbookError::Storage(format!("Failed to record label schema v2: {}", e)))?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .map_err(|e| LabelbookError::Storage(e.to_string()))?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(|e| LabelbookError::Storage(e.to_string()))?;
    for name in names {
        if name.map_err(|e| LabelbookError::Storage(e.to_string()))? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    fn index_names(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name=?1")
            .unwrap();
        stmt.query_map([table], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_apply_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn, StoreKind::ShippingLogs).unwrap();
        apply(&conn, StoreKind::ShippingLogs).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
        assert!(table_exists(&conn, "shipping_logs"));
        assert!(table_exists(&conn, "legacy_imports"));
    }

    #[test]
    fn test_shipping_indexes_created() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn, StoreKind::ShippingLogs).unwrap();
        let indexes = index_names(&conn, "shipping_logs");
        for name in [
            "idx_shipping_logs_timestamp",
            "idx_shipping_logs_tracking",
            "idx_shipping_logs_sku",
            "idx_shipping_logs_status",
        ] {
            assert!(indexes.iter().any(|i| i == name), "missing {}", name);
        }
    }

    #[test]
    fn test_label_indexes_created() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn, StoreKind::Labels).unwrap();
        assert_eq!(
            index_names(&conn, "label_metadata")
                .iter()
                .filter(|n| n.starts_with("idx_label_"))
                .count(),
            8
        );
    }

    #[test]
    fn test_recreates_dropped_table() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn, StoreKind::Labels).unwrap();
        conn.execute_batch("DROP TABLE label_metadata;").unwrap();
        assert!(!table_exists(&conn, "label_metadata"));

        apply(&conn, StoreKind::Labels).unwrap();
        assert!(table_exists(&conn, "label_metadata"));
    }

    #[test]
    fn test_upgrades_label_table_without_notes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE label_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                upc TEXT, item_variant_number TEXT, department TEXT, category TEXT,
                color TEXT, website_color TEXT, website_name TEXT, label_name TEXT,
                sku TEXT, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .unwrap();
        assert!(!has_column(&conn, "label_metadata", "user_notes").unwrap());

        apply(&conn, StoreKind::Labels).unwrap();
        assert!(has_column(&conn, "label_metadata", "user_notes").unwrap());
    }

    #[test]
    fn test_initializer_creates_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("shipping_logs").join("shipping_logs.db");
        let init = SchemaInitializer::new(&path, StoreKind::ShippingLogs);

        assert!(init.initialize());
        assert!(path.exists());
        // Second call on an existing file is fine too.
        assert!(init.initialize());
    }

    #[test]
    fn test_initializer_reports_false_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected.
        let blocker = dir.path().join("database");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let init = SchemaInitializer::new(blocker.join("labels.db"), StoreKind::Labels);
        assert!(!init.initialize());
        assert!(init.try_initialize().is_err());
    }
}
