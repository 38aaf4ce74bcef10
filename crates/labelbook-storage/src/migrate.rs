//! One-time migration of legacy shipping records into the consolidated store.
//!
//! Two legacy sources are understood: the flat text log written by older
//! builds, and the single-table `shipping_records` database. Each source is
//! copied in its own transaction together with a `legacy_imports` marker, so
//! a source that was already copied is recognised and not imported twice.
//! A bad line or row is skipped and counted; only failures writing the target
//! store abort the run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use tracing::{error, info, warn};

use labelbook_core::config::{MigrationConfig, StorePaths};
use labelbook_core::error::{LabelbookError, Result};
use labelbook_core::types::{NewShippingLog, ShipAction, ShippingLogEntry, TIMESTAMP_FORMAT};

use crate::db::{db_err, ConnectionProvider, Database};
use crate::repository::{insert_row, now_timestamp};

const TEXT_LOG_DETAILS: &str = "Imported from text log";

/// A legacy store the migrator knows how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacySource {
    TextLog,
    LegacyDatabase,
}

impl LegacySource {
    pub fn label(&self) -> &'static str {
        match self {
            LegacySource::TextLog => "Text Log",
            LegacySource::LegacyDatabase => "Database",
        }
    }
}

impl fmt::Display for LegacySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of migrating one source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: LegacySource,
    pub success: bool,
    pub imported: usize,
    pub skipped: usize,
    pub message: Option<String>,
    /// Where the text log was copied, when it was archived.
    pub archived_to: Option<PathBuf>,
}

impl SourceReport {
    fn empty(source: LegacySource, message: impl Into<String>) -> Self {
        Self {
            source,
            success: true,
            imported: 0,
            skipped: 0,
            message: Some(message.into()),
            archived_to: None,
        }
    }
}

/// Per-source results of a migration run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub sources: Vec<SourceReport>,
}

impl MigrationReport {
    pub fn total_imported(&self) -> usize {
        self.sources.iter().map(|s| s.imported).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.sources.iter().map(|s| s.skipped).sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.sources.iter().all(|s| s.success)
    }

    pub fn source(&self, source: LegacySource) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == source)
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration results:")?;
        for s in &self.sources {
            let status = if s.success { "Success" } else { "Failed" };
            writeln!(f, "{}: {}", s.source, status)?;
            if s.success {
                writeln!(f, "  - {} records imported", s.imported)?;
                if s.skipped > 0 {
                    writeln!(f, "  - {} records skipped", s.skipped)?;
                }
            }
            if let Some(message) = &s.message {
                writeln!(f, "  - {}", message)?;
            }
        }
        Ok(())
    }
}

/// Copies legacy shipping records into the consolidated shipping log store.
#[derive(Clone, Debug)]
pub struct LegacyMigrator {
    paths: StorePaths,
    target: ConnectionProvider,
    archive_text_log: bool,
}

impl LegacyMigrator {
    pub fn new(paths: StorePaths, target: ConnectionProvider, config: &MigrationConfig) -> Self {
        Self {
            paths,
            target,
            archive_text_log: config.archive_text_log,
        }
    }

    /// Legacy sources present on disk.
    pub fn detect(&self) -> Vec<LegacySource> {
        let mut found = Vec::new();
        if self.paths.legacy_text_log().is_file() {
            found.push(LegacySource::TextLog);
        }
        if self.paths.legacy_shipping_db().is_file() {
            found.push(LegacySource::LegacyDatabase);
        }
        found
    }

    /// Migrate every source. Only a target store failure is an `Err`.
    pub fn run(&self) -> Result<MigrationReport> {
        let detected = self.detect();
        info!(sources = ?detected, "Starting legacy migration");

        let db = self.target.get_connection().map_err(|e| {
            LabelbookError::Migration(format!("Cannot initialize shipping log store: {}", e))
        })?;

        let report = MigrationReport {
            sources: vec![self.migrate_text_log(&db)?, self.migrate_legacy_db(&db)?],
        };

        info!(
            imported = report.total_imported(),
            skipped = report.total_skipped(),
            "Legacy migration finished"
        );
        Ok(report)
    }

    fn migrate_text_log(&self, db: &Database) -> Result<SourceReport> {
        let source = LegacySource::TextLog;
        let path = self.paths.legacy_text_log();
        if !path.is_file() {
            return Ok(SourceReport::empty(source, "No text log found"));
        }

        let key = match source_key(&path) {
            Ok(key) => key,
            Err(e) => return Ok(unreadable(source, &path, e)),
        };
        if already_imported(db, &key)? {
            info!(path = %path.display(), "Text log already migrated");
            return Ok(SourceReport::empty(source, "Already imported"));
        }

        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) => return Ok(unreadable(source, &path, e.into())),
        };
        let (entries, skipped) = parse_text_log(&content);

        let imported = write_source(db, source, &key, &entries, skipped)?;
        let mut report = SourceReport {
            source,
            success: true,
            imported,
            skipped,
            message: None,
            archived_to: None,
        };

        if self.archive_text_log && imported > 0 {
            match archive_text_log(&path, &self.paths.archive_dir(), imported, skipped) {
                Ok(archived) => {
                    info!(archive = %archived.display(), "Text log archived");
                    report.archived_to = Some(archived);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to archive text log");
                    report.message = Some(format!("Archive failed: {}", e));
                }
            }
        }
        Ok(report)
    }

    fn migrate_legacy_db(&self, db: &Database) -> Result<SourceReport> {
        let source = LegacySource::LegacyDatabase;
        let path = self.paths.legacy_shipping_db();
        if !path.is_file() {
            return Ok(SourceReport::empty(source, "No legacy database found"));
        }

        let key = match source_key(&path) {
            Ok(key) => key,
            Err(e) => return Ok(unreadable(source, &path, e)),
        };
        if already_imported(db, &key)? {
            info!(path = %path.display(), "Legacy database already migrated");
            return Ok(SourceReport::empty(source, "Already imported"));
        }

        let (entries, skipped) = match read_legacy_rows(&path) {
            Ok(rows) => rows,
            Err(e) => return Ok(unreadable(source, &path, e)),
        };

        let imported = write_source(db, source, &key, &entries, skipped)?;
        Ok(SourceReport {
            source,
            success: true,
            imported,
            skipped,
            message: None,
            archived_to: None,
        })
    }
}

fn unreadable(source: LegacySource, path: &Path, err: LabelbookError) -> SourceReport {
    warn!(source = %source, path = %path.display(), error = %err, "Legacy source unreadable");
    SourceReport::empty(source, format!("Could not read {}: {}", path.display(), err))
}

/// Insert a source's rows plus its import marker in one transaction.
fn write_source(
    db: &Database,
    source: LegacySource,
    key: &str,
    entries: &[NewShippingLog],
    skipped: usize,
) -> Result<usize> {
    if entries.is_empty() {
        return Ok(0);
    }

    db.ensure_schema()?;
    let now = now_timestamp();
    db.transaction(|conn| {
        for entry in entries {
            insert_row::<ShippingLogEntry>(conn, entry, &now)?;
        }
        conn.execute(
            "INSERT OR REPLACE INTO legacy_imports (source_key, source, imported, skipped, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![key, source.label(), entries.len() as i64, skipped as i64, now],
        )
        .map_err(db_err("Failed to record legacy import"))?;
        Ok(())
    })
    .map_err(|e| LabelbookError::Migration(format!("Writing {} records failed: {}", source, e)))?;

    info!(source = %source, imported = entries.len(), skipped, "Legacy source migrated");
    Ok(entries.len())
}

fn already_imported(db: &Database, key: &str) -> Result<bool> {
    db.read(|conn| {
        conn.query_row(
            "SELECT 1 FROM legacy_imports WHERE source_key = ?1",
            [key],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(db_err("Failed to check legacy imports"))
    })
}

/// Identity of a source file's current contents: path, size and mtime.
fn source_key(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    let modified = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(format!("{}|{}|{}", canonical.display(), meta.len(), modified))
}

// =============================================================================
// Text log parsing
// =============================================================================

fn valid_timestamp(ts: &str) -> Option<String> {
    let ts = ts.trim();
    NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
        .ok()
        .map(|_| ts.to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a whole text log, returning the usable entries plus the number of
/// lines skipped. Lines are decoded one at a time, so a line that is not
/// UTF-8 is skipped like any other malformed line.
fn parse_text_log(content: &[u8]) -> (Vec<NewShippingLog>, usize) {
    let mut entries = Vec::new();
    let mut skipped = 0;
    for (number, raw) in content.split(|b| *b == b'\n').enumerate() {
        let Ok(line) = std::str::from_utf8(raw) else {
            warn!(line = number + 1, "Text log line is not valid UTF-8, skipped");
            skipped += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_text_log_line(line) {
            Some(entry) => entries.push(entry),
            None => {
                warn!(line, "Unparseable text log line skipped");
                skipped += 1;
            }
        }
    }
    (entries, skipped)
}

/// Parse one text log line in either legacy layout:
///
/// - `<ts> | Tracking: <t> | SKU: <s> | Label: <label info>`
/// - `<ts> - Tracking=<t>, SKU=<s>, Status=<status>`
///
/// Returns `None` for anything that matches neither.
pub fn parse_text_log_line(line: &str) -> Option<NewShippingLog> {
    let parts: Vec<&str> = line.split(" | ").collect();
    if parts.len() >= 3 {
        return parse_piped(&parts);
    }
    parse_dashed(line)
}

fn parse_piped(parts: &[&str]) -> Option<NewShippingLog> {
    let timestamp = valid_timestamp(parts[0])?;
    let mut tracking = None;
    let mut sku = None;
    let mut label_info = String::new();
    for part in &parts[1..] {
        if let Some(v) = part.strip_prefix("Tracking: ") {
            tracking = non_empty(v);
        } else if let Some(v) = part.strip_prefix("SKU: ") {
            sku = non_empty(v);
        } else if let Some(v) = part.strip_prefix("Label: ") {
            label_info = v.trim().to_string();
        }
    }

    let (action, status) = classify_label_info(&label_info);
    Some(NewShippingLog {
        timestamp: Some(timestamp),
        tracking_number: tracking,
        sku,
        action,
        status: status.to_string(),
        details: non_empty(&label_info),
    })
}

fn parse_dashed(line: &str) -> Option<NewShippingLog> {
    let (ts, info) = line.split_once(" - ")?;
    let timestamp = valid_timestamp(ts)?;
    let mut tracking = None;
    let mut sku = None;
    let mut status = None;
    for item in info.split(", ") {
        if let Some(v) = item.strip_prefix("Tracking=") {
            tracking = non_empty(v);
        } else if let Some(v) = item.strip_prefix("SKU=") {
            sku = non_empty(v);
        } else if let Some(v) = item.strip_prefix("Status=") {
            status = non_empty(v);
        }
    }

    let sku = sku?;
    let status = status?;
    Some(NewShippingLog {
        timestamp: Some(timestamp),
        tracking_number: tracking,
        sku: Some(sku),
        action: action_from_keywords(&status).unwrap_or_default(),
        status,
        details: Some(TEXT_LOG_DETAILS.to_string()),
    })
}

/// Action and status implied by the `Label:` segment of a piped line.
fn classify_label_info(label_info: &str) -> (ShipAction, &'static str) {
    let lower = label_info.to_ascii_lowercase();
    if label_info.contains("No print - logging only") {
        (ShipAction::LogOnly, "success")
    } else if label_info.contains("Label printed successfully")
        || lower.contains(".png")
        || lower.contains(".jpg")
    {
        (ShipAction::Print, "success")
    } else {
        (ShipAction::Unknown, "unknown")
    }
}

/// Action named by free text such as a legacy status or notes field.
/// "printed" wins over "logged" when both appear.
fn action_from_keywords(text: &str) -> Option<ShipAction> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("printed") {
        Some(ShipAction::Print)
    } else if lower.contains("logged") {
        Some(ShipAction::LogOnly)
    } else {
        None
    }
}

// =============================================================================
// Legacy database
// =============================================================================

struct LegacyRow {
    timestamp: Option<String>,
    tracking_number: Option<String>,
    sku: Option<String>,
    status: Option<String>,
    notes: Option<String>,
}

impl LegacyRow {
    fn into_entry(self) -> Option<NewShippingLog> {
        let timestamp = valid_timestamp(self.timestamp.as_deref()?)?;
        let status = self.status?;
        let action = action_from_keywords(&status)
            .or_else(|| self.notes.as_deref().and_then(action_from_keywords))
            .unwrap_or_default();
        Some(NewShippingLog {
            timestamp: Some(timestamp),
            tracking_number: self.tracking_number,
            sku: self.sku,
            action,
            status,
            details: self.notes,
        })
    }
}

/// Read every `shipping_records` row, returning the decodable ones plus the
/// number skipped.
fn read_legacy_rows(path: &Path) -> Result<(Vec<NewShippingLog>, usize)> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(db_err("Failed to open legacy database"))?;

    let mut stmt = conn
        .prepare(
            "SELECT timestamp, tracking_number, sku, status, notes
             FROM shipping_records ORDER BY timestamp, id",
        )
        .map_err(db_err("Legacy query prepare"))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(LegacyRow {
                timestamp: row.get("timestamp")?,
                tracking_number: row.get("tracking_number")?,
                sku: row.get("sku")?,
                status: row.get("status")?,
                notes: row.get("notes")?,
            })
        })
        .map_err(db_err("Legacy query"))?;

    let mut entries = Vec::new();
    let mut skipped = 0;
    for row in rows {
        match row.map(LegacyRow::into_entry) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => skipped += 1,
            Err(e) => {
                warn!(error = %e, "Undecodable legacy row skipped");
                skipped += 1;
            }
        }
    }
    Ok((entries, skipped))
}

// =============================================================================
// Archiving
// =============================================================================

/// Copy the text log into `archive_dir` and replace it with a marker. The
/// original is only rewritten after the copy succeeded.
fn archive_text_log(
    path: &Path,
    archive_dir: &Path,
    imported: usize,
    skipped: usize,
) -> Result<PathBuf> {
    std::fs::create_dir_all(archive_dir)?;

    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut archive = archive_dir.join(format!("shipping_records_{}.txt.bak", unix));
    let mut n = 1;
    while archive.exists() {
        archive = archive_dir.join(format!("shipping_records_{}_{}.txt.bak", unix, n));
        n += 1;
    }

    std::fs::copy(path, &archive)?;

    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let marker = format!(
        "# Archived on {}\n\
         # {} records imported to database, {} records skipped\n\
         # Archive file: {}\n\
         \n\
         # This file is no longer used. All logs are now stored in the database.\n",
        now_timestamp(),
        imported,
        skipped,
        name
    );
    std::fs::write(path, marker)?;
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StoreKind;

    #[test]
    fn test_parse_piped_print_line() {
        let entry = parse_text_log_line(
            "2024-02-01 10:15:00 | Tracking: 1Z999 | SKU: SKU1 | Label: Label printed successfully",
        )
        .unwrap();
        assert_eq!(entry.timestamp.as_deref(), Some("2024-02-01 10:15:00"));
        assert_eq!(entry.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(entry.sku.as_deref(), Some("SKU1"));
        assert_eq!(entry.action, ShipAction::Print);
        assert_eq!(entry.status, "success");
        assert_eq!(entry.details.as_deref(), Some("Label printed successfully"));
    }

    #[test]
    fn test_parse_piped_classifies_label_info() {
        let log_only = parse_text_log_line(
            "2024-02-01 10:15:00 | Tracking: T | SKU: S | Label: No print - logging only",
        )
        .unwrap();
        assert_eq!(log_only.action, ShipAction::LogOnly);

        let image = parse_text_log_line(
            "2024-02-01 10:15:00 | Tracking: T | SKU: S | Label: labels/Blue_Tee.PNG",
        )
        .unwrap();
        assert_eq!(image.action, ShipAction::Print);

        let unknown = parse_text_log_line("2024-02-01 10:15:00 | Tracking: T | SKU: S").unwrap();
        assert_eq!(unknown.action, ShipAction::Unknown);
        assert_eq!(unknown.status, "unknown");
        assert_eq!(unknown.details, None);
    }

    #[test]
    fn test_parse_dashed_line() {
        let entry =
            parse_text_log_line("2023-12-24 08:00:00 - Tracking=1Z1, SKU=ABC, Status=Logged only")
                .unwrap();
        assert_eq!(entry.sku.as_deref(), Some("ABC"));
        assert_eq!(entry.status, "Logged only");
        assert_eq!(entry.action, ShipAction::LogOnly);
        assert_eq!(entry.details.as_deref(), Some(TEXT_LOG_DETAILS));

        let printed =
            parse_text_log_line("2023-12-24 08:00:00 - Tracking=1Z1, SKU=ABC, Status=Printed")
                .unwrap();
        assert_eq!(printed.action, ShipAction::Print);
    }

    #[test]
    fn test_malformed_lines_rejected() {
        for line in [
            "garbage",
            "not-a-date | Tracking: T | SKU: S | Label: x",
            "2024-13-45 99:00:00 | Tracking: T | SKU: S",
            "2023-12-24 08:00:00 - Tracking=1Z1, Status=Printed",
            "2023-12-24 08:00:00 - Tracking=1Z1, SKU=ABC",
            "only | two",
        ] {
            assert!(parse_text_log_line(line).is_none(), "accepted: {}", line);
        }
    }

    #[test]
    fn test_action_keywords() {
        assert_eq!(action_from_keywords("Label printed"), Some(ShipAction::Print));
        assert_eq!(action_from_keywords("LOGGED"), Some(ShipAction::LogOnly));
        assert_eq!(action_from_keywords("Connection Failed"), None);
    }

    #[test]
    fn test_action_keywords_mixed() {
        assert_eq!(
            action_from_keywords("Printed and logged"),
            Some(ShipAction::Print)
        );
        assert_eq!(
            action_from_keywords("Logged, then printed"),
            Some(ShipAction::Print)
        );
        assert_eq!(action_from_keywords("Print failed"), None);
        assert_eq!(action_from_keywords("log only"), None);
    }

    #[test]
    fn test_text_log_skips_non_utf8_lines() {
        let mut content = Vec::new();
        content.extend_from_slice(
            b"2024-02-01 10:15:00 | Tracking: 1Z1 | SKU: S1 | Label: Label printed successfully\n",
        );
        content.extend_from_slice(b"2024-02-01 10:15:30 | Tracking: \xff\xfe | SKU: S9\n");
        content.extend_from_slice(b"# comment\r\n");
        content.extend_from_slice(b"2023-12-24 08:00:00 - Tracking=1Z3, SKU=S3, Status=Printed\r\n");

        let (entries, skipped) = parse_text_log(&content);
        assert_eq!(entries.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(entries[1].sku.as_deref(), Some("S3"));
    }

    #[test]
    fn test_failed_source_write_commits_nothing() {
        let db = Database::in_memory(StoreKind::ShippingLogs).unwrap();
        let good = parse_text_log_line("2023-12-24 08:00:00 - Tracking=1Z1, SKU=A, Status=Printed")
            .unwrap();
        let bad = NewShippingLog {
            timestamp: Some("yesterday".into()),
            ..good.clone()
        };

        let result = write_source(&db, LegacySource::TextLog, "key", &[good, bad], 0);
        assert!(matches!(result, Err(LabelbookError::Migration(_))));

        let rows: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM shipping_logs", [], |row| row.get(0))
                    .map_err(db_err("count"))
            })
            .unwrap();
        assert_eq!(rows, 0);
        assert!(!already_imported(&db, "key").unwrap());
    }

    #[test]
    fn test_legacy_row_uses_notes_when_status_is_silent() {
        let row = LegacyRow {
            timestamp: Some("2024-01-01 00:00:00".into()),
            tracking_number: Some("1Z".into()),
            sku: None,
            status: Some("success".into()),
            notes: Some("printed twice".into()),
        };
        let entry = row.into_entry().unwrap();
        assert_eq!(entry.action, ShipAction::Print);
        assert_eq!(entry.status, "success");
        assert_eq!(entry.details.as_deref(), Some("printed twice"));
    }

    #[test]
    fn test_legacy_row_without_status_is_skipped() {
        let row = LegacyRow {
            timestamp: Some("2024-01-01 00:00:00".into()),
            tracking_number: None,
            sku: None,
            status: None,
            notes: None,
        };
        assert!(row.into_entry().is_none());
    }

    #[test]
    fn test_archive_leaves_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("shipping_records.txt");
        std::fs::write(&log, "2024-01-01 00:00:00 | Tracking: T | SKU: S\n").unwrap();

        let archived = archive_text_log(&log, &dir.path().join("archive"), 1, 0).unwrap();
        assert!(archived.exists());
        assert!(std::fs::read_to_string(&archived).unwrap().contains("Tracking: T"));

        let marker = std::fs::read_to_string(&log).unwrap();
        assert!(marker.lines().all(|l| l.is_empty() || l.starts_with('#')));
        assert!(marker.contains("1 records imported"));
    }

    #[test]
    fn test_report_display() {
        let report = MigrationReport {
            sources: vec![SourceReport {
                source: LegacySource::TextLog,
                success: true,
                imported: 3,
                skipped: 1,
                message: None,
                archived_to: None,
            }],
        };
        let text = report.to_string();
        assert!(text.contains("Text Log: Success"));
        assert!(text.contains("3 records imported"));
        assert!(text.contains("1 records skipped"));
    }
}
