//! Generic CRUD and paginated search over one record type.
//!
//! `Repository<R>` is instantiated twice, as `ShippingLogRepository` and
//! `LabelRepository`. Reads go through `Database::read` so a dropped table is
//! recreated and the query retried once; writes re-run the schema first.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use chrono::Local;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use labelbook_core::config::DEFAULT_NOTES_PREFIX_LEN;
use labelbook_core::error::{LabelbookError, Result};
use labelbook_core::types::{
    LabelMetadataRecord, NewShippingLog, RecordFilter, ShipAction, ShippingLogEntry,
    TIMESTAMP_FORMAT,
};

use crate::db::{db_err, Database};
use crate::record::Record;
use crate::search::{self, like_prefix};

pub type ShippingLogRepository<'db> = Repository<'db, ShippingLogEntry>;
pub type LabelRepository<'db> = Repository<'db, LabelMetadataRecord>;

/// Current local time in the stored timestamp layout.
pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Repository for one record type on one database handle.
pub struct Repository<'db, R> {
    db: &'db Database,
    _record: PhantomData<R>,
}

impl<'db, R: Record> Repository<'db, R> {
    pub fn new(db: &'db Database) -> Self {
        Self {
            db,
            _record: PhantomData,
        }
    }

    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Insert one row and return its id.
    pub fn insert(&self, new: &R::New) -> Result<i64> {
        self.db.ensure_schema()?;
        let now = now_timestamp();
        let id = self.db.with_conn(|conn| insert_row::<R>(conn, new, &now))?;
        debug!(entity = R::ENTITY, id, "Record inserted");
        Ok(id)
    }

    /// Insert many rows in one transaction.
    pub fn insert_many(&self, news: &[R::New]) -> Result<usize> {
        self.db.ensure_schema()?;
        let now = now_timestamp();
        let inserted = self.db.transaction(|conn| {
            for new in news {
                insert_row::<R>(conn, new, &now)?;
            }
            Ok(news.len())
        })?;
        info!(entity = R::ENTITY, inserted, "Batch insert committed");
        Ok(inserted)
    }

    /// Fetch one row by id.
    pub fn get(&self, id: i64) -> Result<Option<R>> {
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", R::COLUMNS, R::table());
        self.db.read(|conn| {
            conn.query_row(&sql, [id], |row| R::from_row(row))
                .optional()
                .map_err(db_err("Failed to fetch record"))
        })
    }

    /// One page of matching rows in the record type's display order.
    ///
    /// `limit = None` returns every match from `offset` on.
    pub fn list(
        &self,
        filter: &RecordFilter<R::Field>,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<R>> {
        let (clause, mut params) = where_clause::<R>(filter);
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
            R::COLUMNS,
            R::table(),
            clause,
            R::ORDER_BY
        );
        // SQLite reads a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(-1));
        params.push(Value::Integer(limit));
        params.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

        self.db.read(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(db_err("List query prepare"))?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| R::from_row(row))
                .map_err(db_err("List query"))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(db_err("Failed to decode row"))?);
            }
            Ok(records)
        })
    }

    /// Number of rows the same filter would list without pagination.
    pub fn count(&self, filter: &RecordFilter<R::Field>) -> Result<u64> {
        let (clause, params) = where_clause::<R>(filter);
        let sql = format!("SELECT COUNT(*) FROM {}{}", R::table(), clause);
        self.db.read(|conn| {
            let count: i64 = conn
                .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
                .map_err(db_err("Count query"))?;
            Ok(count as u64)
        })
    }

    /// Apply a partial update. An empty patch changes nothing and succeeds.
    pub fn update(&self, id: i64, patch: &R::Patch) -> Result<()> {
        let sets = R::patch_values(patch);
        if sets.is_empty() {
            debug!(entity = R::ENTITY, id, "Empty patch, nothing to update");
            return Ok(());
        }

        self.db.ensure_schema()?;
        let assignments: Vec<String> = sets.iter().map(|(col, _)| format!("{} = ?", col)).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            R::table(),
            assignments.join(", ")
        );
        let mut params: Vec<Value> = sets.into_iter().map(|(_, v)| v).collect();
        params.push(Value::Integer(id));

        let changed = self.db.with_conn(|conn| {
            conn.execute(&sql, params_from_iter(params.iter()))
                .map_err(db_err("Failed to update record"))
        })?;
        if changed == 0 {
            return Err(LabelbookError::NotFound {
                entity: R::ENTITY,
                id,
            });
        }
        debug!(entity = R::ENTITY, id, "Record updated");
        Ok(())
    }

    /// Remove one row.
    pub fn delete(&self, id: i64) -> Result<()> {
        self.db.ensure_schema()?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", R::table());
        let changed = self.db.with_conn(|conn| {
            conn.execute(&sql, [id])
                .map_err(db_err("Failed to delete record"))
        })?;
        if changed == 0 {
            return Err(LabelbookError::NotFound {
                entity: R::ENTITY,
                id,
            });
        }
        debug!(entity = R::ENTITY, id, "Record deleted");
        Ok(())
    }

    /// Distinct non-empty values of one allow-listed column, sorted.
    pub fn distinct_values(&self, field: R::Field) -> Result<BTreeSet<String>> {
        let column = R::column(field);
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL AND {col} != ''",
            col = column,
            table = R::table()
        );
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&sql).map_err(db_err("Distinct query prepare"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err("Distinct query"))?;

            let mut values = BTreeSet::new();
            for row in rows {
                values.insert(row.map_err(db_err("Failed to decode value"))?);
            }
            Ok(values)
        })
    }

    /// Every row matching the filter, in display order.
    pub fn all_matching(&self, filter: &RecordFilter<R::Field>) -> Result<Vec<R>> {
        self.list(filter, None, 0)
    }
}

impl<'db> Repository<'db, ShippingLogEntry> {
    /// Record a shipping event stamped with the current time.
    pub fn log_event(
        &self,
        action: ShipAction,
        status: &str,
        tracking_number: Option<&str>,
        sku: Option<&str>,
        details: Option<&str>,
    ) -> Result<i64> {
        let entry = NewShippingLog {
            tracking_number: tracking_number.map(str::to_string),
            sku: sku.map(str::to_string),
            details: details.map(str::to_string),
            ..NewShippingLog::new(action, status)
        };
        self.insert(&entry)
    }
}

impl<'db> Repository<'db, LabelMetadataRecord> {
    /// Set notes on one label. See [`Self::update_notes_with_prefix_len`].
    pub fn update_notes(&self, id: i64, notes: &str, sync_by_prefix: bool) -> Result<usize> {
        self.update_notes_with_prefix_len(id, notes, sync_by_prefix, DEFAULT_NOTES_PREFIX_LEN)
    }

    /// Set notes on one label, and with `sync_by_prefix` on every label whose
    /// variant number shares the first `prefix_len` characters. Returns the
    /// number of rows updated.
    pub fn update_notes_with_prefix_len(
        &self,
        id: i64,
        notes: &str,
        sync_by_prefix: bool,
        prefix_len: usize,
    ) -> Result<usize> {
        let label = self.get(id)?.ok_or(LabelbookError::NotFound {
            entity: LabelMetadataRecord::ENTITY,
            id,
        })?;

        let prefix: Option<String> = label
            .item_variant_number
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && sync_by_prefix && prefix_len > 0)
            .map(|v| v.chars().take(prefix_len).collect());

        self.db.ensure_schema()?;
        let updated = self.db.with_conn(|conn| match &prefix {
            Some(prefix) => conn
                .execute(
                    "UPDATE label_metadata SET user_notes = ?1
                     WHERE item_variant_number LIKE ?2 ESCAPE '\\'",
                    rusqlite::params![notes, like_prefix(prefix)],
                )
                .map_err(db_err("Failed to sync notes")),
            None => conn
                .execute(
                    "UPDATE label_metadata SET user_notes = ?1 WHERE id = ?2",
                    rusqlite::params![notes, id],
                )
                .map_err(db_err("Failed to update notes")),
        })?;

        info!(id, updated, prefix = prefix.as_deref(), "Label notes updated");
        Ok(updated)
    }

    /// Delete every label row.
    pub fn clear(&self) -> Result<usize> {
        self.db.ensure_schema()?;
        let removed = self.db.with_conn(|conn| clear_labels(conn))?;
        info!(removed, "Label metadata cleared");
        Ok(removed)
    }
}

pub(crate) fn clear_labels(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM label_metadata", [])
        .map_err(db_err("Failed to clear labels"))
}

/// Insert one row on an open connection or transaction.
pub(crate) fn insert_row<R: Record>(conn: &Connection, new: &R::New, now: &str) -> Result<i64> {
    let values = R::insert_values(new, now)?;
    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        R::table(),
        columns.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(values.iter().map(|(_, v)| v)))
        .map_err(db_err("Failed to insert record"))?;
    Ok(conn.last_insert_rowid())
}

/// ` WHERE ...` (or empty) plus its parameters for a filter.
fn where_clause<R: Record>(filter: &RecordFilter<R::Field>) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(term) = filter.term() {
        let predicate = match filter.field {
            Some(field) => search::build_single(term, R::column(field)),
            None => search::build(term, R::search_columns(), R::WORD_JOIN),
        };
        if let Some(p) = predicate {
            conditions.push(p.sql);
            params.extend(p.params);
        }
    }

    if let Some(range) = &filter.date_range {
        if let Some(lower) = range.lower_bound() {
            conditions.push(format!("{} >= ?", R::DATE_COLUMN));
            params.push(Value::Text(lower));
        }
        if let Some(upper) = range.upper_bound() {
            conditions.push(format!("{} <= ?", R::DATE_COLUMN));
            params.push(Value::Text(upper));
        }
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use labelbook_core::types::{
        DateRange, LabelField, LabelFilter, LabelPatch, NewLabel, ShippingField, ShippingFilter,
        ShippingLogPatch,
    };

    use crate::schema::StoreKind;

    fn shipping_db() -> Database {
        Database::in_memory(StoreKind::ShippingLogs).unwrap()
    }

    fn labels_db() -> Database {
        Database::in_memory(StoreKind::Labels).unwrap()
    }

    fn label(name: &str, variant: &str, color: &str) -> NewLabel {
        NewLabel {
            label_name: Some(name.to_string()),
            item_variant_number: Some(variant.to_string()),
            color: Some(color.to_string()),
            ..NewLabel::default()
        }
        .with_derived_sku()
    }

    #[test]
    fn test_insert_and_get() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        let id = repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").tracking("1Z999"))
            .unwrap();

        let entry = repo.get(id).unwrap().unwrap();
        assert_eq!(entry.tracking_number.as_deref(), Some("1Z999"));
        assert_eq!(entry.action, ShipAction::Print);
        assert_eq!(entry.timestamp.len(), 19);
        assert!(repo.get(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_list_orders_newest_first_with_id_tiebreak() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        let a = repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").at("2024-01-01 09:00:00"))
            .unwrap();
        let b = repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").at("2024-01-01 09:00:00"))
            .unwrap();
        let c = repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").at("2024-01-02 09:00:00"))
            .unwrap();

        let ids: Vec<i64> = repo
            .list(&ShippingFilter::default(), None, 0)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![c, b, a]);
    }

    #[test]
    fn test_pagination_and_count() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        for i in 0..7 {
            repo.insert(&NewShippingLog::new(ShipAction::Print, "success").sku(format!("SKU{}", i)))
                .unwrap();
        }
        let filter = ShippingFilter::default();
        assert_eq!(repo.count(&filter).unwrap(), 7);
        assert_eq!(repo.list(&filter, Some(3), 0).unwrap().len(), 3);
        assert_eq!(repo.list(&filter, Some(3), 6).unwrap().len(), 1);
        assert!(repo.list(&filter, Some(3), 9).unwrap().is_empty());
        assert_eq!(repo.list(&filter, Some(0), 0).unwrap().len(), 0);
    }

    #[test]
    fn test_single_field_search() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        repo.insert(&NewShippingLog::new(ShipAction::Print, "success").sku("ABC-1"))
            .unwrap();
        repo.insert(&NewShippingLog::new(ShipAction::Print, "success").tracking("ABC-TRACK"))
            .unwrap();

        let filter = ShippingFilter::search("abc").in_field(ShippingField::Sku);
        assert_eq!(repo.count(&filter).unwrap(), 1);
        assert_eq!(repo.count(&ShippingFilter::search("abc")).unwrap(), 2);
    }

    #[test]
    fn test_date_range_filter() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        for ts in ["2024-03-01 00:00:00", "2024-03-15 23:59:59", "2024-04-01 08:00:00"] {
            repo.insert(&NewShippingLog::new(ShipAction::Print, "success").at(ts))
                .unwrap();
        }
        let march = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 1),
            NaiveDate::from_ymd_opt(2024, 3, 15),
        );
        let filter = ShippingFilter::default().between(march);
        assert_eq!(repo.count(&filter).unwrap(), 2);
    }

    #[test]
    fn test_update_and_missing_ids() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        let id = repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").at("2024-01-01 00:00:00"))
            .unwrap();

        let patch = ShippingLogPatch {
            status: Some("error".into()),
            ..ShippingLogPatch::default()
        };
        repo.update(id, &patch).unwrap();
        let entry = repo.get(id).unwrap().unwrap();
        assert_eq!(entry.status, "error");
        assert_eq!(entry.timestamp, "2024-01-01 00:00:00");

        repo.update(id, &ShippingLogPatch::default()).unwrap();
        assert!(matches!(
            repo.update(999, &patch),
            Err(LabelbookError::NotFound { id: 999, .. })
        ));
        assert!(matches!(
            repo.delete(999),
            Err(LabelbookError::NotFound { .. })
        ));
        repo.delete(id).unwrap();
        assert!(repo.get(id).unwrap().is_none());
    }

    #[test]
    fn test_distinct_values_skip_empty() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        for status in ["success", "error", "success", ""] {
            repo.insert(&NewShippingLog::new(ShipAction::Print, status)).unwrap();
        }
        let values = repo.distinct_values(ShippingField::Status).unwrap();
        assert_eq!(values.into_iter().collect::<Vec<_>>(), vec!["error", "success"]);
    }

    #[test]
    fn test_label_search_requires_every_word() {
        let db = labels_db();
        let repo = LabelRepository::new(&db);
        repo.insert(&label("Blue Tee -- 123456-01", "123456-01", "Blue")).unwrap();
        repo.insert(&label("Red Tee -- 123456-02", "123456-02", "Red")).unwrap();
        repo.insert(&label("Blue Mug -- 777777-01", "777777-01", "Blue")).unwrap();

        assert_eq!(repo.count(&LabelFilter::search("blue tee")).unwrap(), 1);
        assert_eq!(repo.count(&LabelFilter::search("BLUE")).unwrap(), 2);

        let names: Vec<String> = repo
            .list(&LabelFilter::search("tee"), None, 0)
            .unwrap()
            .into_iter()
            .filter_map(|l| l.label_name)
            .collect();
        assert_eq!(names, vec!["Blue Tee -- 123456-01", "Red Tee -- 123456-02"]);
    }

    #[test]
    fn test_label_single_field_matches_whole_term() {
        let db = labels_db();
        let repo = LabelRepository::new(&db);
        repo.insert(&label("Blue Tee", "1", "Blue")).unwrap();
        repo.insert(&label("Tee Blue", "2", "Blue")).unwrap();

        let filter = LabelFilter::search("blue tee").in_field(LabelField::LabelName);
        assert_eq!(repo.count(&filter).unwrap(), 1);
    }

    #[test]
    fn test_update_notes_syncs_by_prefix() {
        let db = labels_db();
        let repo = LabelRepository::new(&db);
        let first = repo.insert(&label("A", "123456-01", "Blue")).unwrap();
        repo.insert(&label("B", "123456-02", "Red")).unwrap();
        let other = repo.insert(&label("C", "654321-01", "Red")).unwrap();

        assert_eq!(repo.update_notes(first, "fragile", true).unwrap(), 2);
        assert_eq!(
            repo.get(other).unwrap().unwrap().user_notes,
            None
        );

        assert_eq!(repo.update_notes(other, "solo", false).unwrap(), 1);
        assert!(matches!(
            repo.update_notes(999, "x", true),
            Err(LabelbookError::NotFound { .. })
        ));
    }

    #[test]
    fn test_update_notes_without_variant_touches_one_row() {
        let db = labels_db();
        let repo = LabelRepository::new(&db);
        let id = repo
            .insert(&NewLabel {
                label_name: Some("No variant".into()),
                ..NewLabel::default()
            })
            .unwrap();
        repo.insert(&label("Other", "123456-01", "Blue")).unwrap();
        assert_eq!(repo.update_notes(id, "n", true).unwrap(), 1);
    }

    #[test]
    fn test_label_patch_and_clear() {
        let db = labels_db();
        let repo = LabelRepository::new(&db);
        let id = repo.insert(&label("A", "1", "Blue")).unwrap();
        repo.update(
            id,
            &LabelPatch {
                color: Some("Green".into()),
                ..LabelPatch::default()
            },
        )
        .unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().color.as_deref(), Some("Green"));

        repo.insert(&label("B", "2", "Red")).unwrap();
        assert_eq!(repo.clear().unwrap(), 2);
        assert_eq!(repo.count(&LabelFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_insert_many_is_atomic() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        let good = vec![
            NewShippingLog::new(ShipAction::Print, "success"),
            NewShippingLog::new(ShipAction::LogOnly, "success"),
        ];
        assert_eq!(repo.insert_many(&good).unwrap(), 2);

        let mixed = vec![
            NewShippingLog::new(ShipAction::Print, "success").tracking("BATCH-1"),
            NewShippingLog::new(ShipAction::Print, "success").at("31/12/2024"),
        ];
        let err = repo.insert_many(&mixed).unwrap_err();
        assert!(matches!(err, LabelbookError::InvalidValue { .. }));
        assert_eq!(repo.count(&ShippingFilter::default()).unwrap(), 2);
        assert_eq!(
            repo.count(&ShippingFilter::search("BATCH-1")).unwrap(),
            0
        );
    }

    #[test]
    fn test_insert_stamps_created_at_with_now() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        let before = now_timestamp();
        let id = repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").at("2020-06-01 12:00:00"))
            .unwrap();
        let entry = repo.get(id).unwrap().unwrap();
        assert_eq!(entry.timestamp, "2020-06-01 12:00:00");
        assert!(entry.created_at >= before);
        assert!(entry.created_at <= now_timestamp());

        assert!(repo
            .insert(&NewShippingLog::new(ShipAction::Print, "success").at("not a time"))
            .is_err());
        assert_eq!(repo.count(&ShippingFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_offset_beyond_i64_is_empty_page() {
        let db = shipping_db();
        let repo = ShippingLogRepository::new(&db);
        repo.insert(&NewShippingLog::new(ShipAction::Print, "success"))
            .unwrap();
        let page = repo
            .list(&ShippingFilter::default(), Some(10), u64::MAX)
            .unwrap();
        assert!(page.is_empty());
        assert_eq!(repo.list(&ShippingFilter::default(), Some(0), 0).unwrap().len(), 0);
    }

    #[test]
    fn test_insert_recreates_dropped_table() {
        let db = shipping_db();
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE shipping_logs;")
                .map_err(db_err("drop"))
        })
        .unwrap();

        let repo = ShippingLogRepository::new(&db);
        repo.log_event(ShipAction::LogOnly, "success", Some("1Z1"), None, None)
            .unwrap();
        assert_eq!(repo.count(&ShippingFilter::default()).unwrap(), 1);
    }
}
