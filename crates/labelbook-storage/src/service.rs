//! UI-facing facade over both record stores.
//!
//! `LabelbookStore` is cheap to clone and can be shared between threads; each
//! worker calls `open_session` to get its own handles. Every session method
//! returns an `Outcome`, logging the failure before converting it, so callers
//! never have to handle storage errors or panics themselves.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use labelbook_core::config::{LabelbookConfig, StorePaths};
use labelbook_core::error::{LabelbookError, Result};
use labelbook_core::types::{
    DateRange, LabelField, LabelMetadataRecord, LabelPatch, NewLabel, NewShippingLog, Outcome,
    RecordFilter, ShipAction, ShippingField, ShippingLogEntry, ShippingLogPatch,
};

use crate::db::{ConnectionProvider, Database};
use crate::export::export_csv;
use crate::import::{import_labels_csv, ImportSummary};
use crate::migrate::{LegacyMigrator, MigrationReport};
use crate::record::Record;
use crate::repository::{LabelRepository, ShippingLogRepository};
use crate::schema::StoreKind;

/// String-typed filter as it arrives from a UI or the command line. The
/// field name is checked against the record type's allow-list on use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterQuery {
    pub search_term: Option<String>,
    pub field: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl FilterQuery {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search_term: Some(term.into()),
            ..Self::default()
        }
    }

    pub fn in_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn between(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Typed filter; an unknown field name is `InvalidField`.
    pub fn parse<F>(&self) -> Result<RecordFilter<F>>
    where
        F: FromStr<Err = LabelbookError>,
    {
        let field = match self.field.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Some(name.parse::<F>()?),
            _ => None,
        };
        let range = DateRange::new(self.start_date, self.end_date);
        Ok(RecordFilter {
            search_term: self.search_term.clone(),
            field,
            date_range: (!range.is_empty()).then_some(range),
        })
    }
}

/// Shared entry point: configuration plus one connection provider per file.
#[derive(Clone, Debug)]
pub struct LabelbookStore {
    config: Arc<LabelbookConfig>,
    paths: StorePaths,
    shipping: ConnectionProvider,
    labels: ConnectionProvider,
}

impl LabelbookStore {
    pub fn new(config: LabelbookConfig) -> Self {
        let paths = config.paths();
        let shipping = ConnectionProvider::new(
            paths.shipping_logs_db(),
            StoreKind::ShippingLogs,
            config.storage.clone(),
        );
        let labels =
            ConnectionProvider::new(paths.labels_db(), StoreKind::Labels, config.storage.clone());
        Self {
            config: Arc::new(config),
            paths,
            shipping,
            labels,
        }
    }

    pub fn config(&self) -> &LabelbookConfig {
        &self.config
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Create both store files and their schema.
    pub fn initialize(&self) -> Outcome<()> {
        let shipping = self.shipping.schema().initialize();
        let labels = self.labels.schema().initialize();
        if shipping && labels {
            Outcome::ok(())
        } else {
            Outcome::failed("Schema initialization failed; see log for details")
        }
    }

    /// Handles for the calling worker.
    pub fn open_session(&self) -> Result<StoreSession> {
        Ok(StoreSession {
            shipping: self.shipping.get_connection()?,
            labels: self.labels.get_connection()?,
            config: Arc::clone(&self.config),
        })
    }

    pub fn migrator(&self) -> LegacyMigrator {
        LegacyMigrator::new(
            self.paths.clone(),
            self.shipping.clone(),
            &self.config.migration,
        )
    }

    /// Copy legacy shipping records into the shipping log store.
    pub fn run_migration(&self) -> Outcome<MigrationReport> {
        outcome("run_migration", self.migrator().run())
    }
}

/// One worker's handles on both store files.
#[derive(Debug)]
pub struct StoreSession {
    shipping: Database,
    labels: Database,
    config: Arc<LabelbookConfig>,
}

impl StoreSession {
    fn logs(&self) -> ShippingLogRepository<'_> {
        ShippingLogRepository::new(&self.shipping)
    }

    fn label_repo(&self) -> LabelRepository<'_> {
        LabelRepository::new(&self.labels)
    }

    // -- shipping logs ------------------------------------------------------

    pub fn insert_log(&self, entry: &NewShippingLog) -> Outcome<i64> {
        outcome("insert_log", self.logs().insert(entry))
    }

    pub fn log_event(
        &self,
        action: ShipAction,
        status: &str,
        tracking_number: Option<&str>,
        sku: Option<&str>,
        details: Option<&str>,
    ) -> Outcome<i64> {
        outcome(
            "log_event",
            self.logs()
                .log_event(action, status, tracking_number, sku, details),
        )
    }

    /// One page of shipping logs, newest first. `limit = None` lists every
    /// match from `offset` on.
    pub fn list_logs(
        &self,
        query: &FilterQuery,
        limit: Option<u64>,
        offset: u64,
    ) -> Outcome<Vec<ShippingLogEntry>> {
        let result = query
            .parse::<ShippingField>()
            .and_then(|filter| self.logs().list(&filter, limit, offset));
        outcome("list_logs", result)
    }

    pub fn count_logs(&self, query: &FilterQuery) -> Outcome<u64> {
        let result = query
            .parse::<ShippingField>()
            .and_then(|filter| self.logs().count(&filter));
        outcome("count_logs", result)
    }

    pub fn update_log(&self, id: i64, patch: &ShippingLogPatch) -> Outcome<()> {
        outcome("update_log", self.logs().update(id, patch))
    }

    pub fn delete_log(&self, id: i64) -> Outcome<()> {
        outcome("delete_log", self.logs().delete(id))
    }

    pub fn distinct_log_values(&self, field: &str) -> Outcome<BTreeSet<String>> {
        let result = field
            .parse::<ShippingField>()
            .and_then(|field| self.logs().distinct_values(field));
        outcome("distinct_log_values", result)
    }

    pub fn export_logs(&self, path: &Path, query: &FilterQuery) -> Outcome<usize> {
        let result = query
            .parse::<ShippingField>()
            .and_then(|filter| export_csv(&self.logs(), path, &filter));
        outcome("export_logs", result)
    }

    // -- label metadata -----------------------------------------------------

    pub fn insert_label(&self, label: &NewLabel) -> Outcome<i64> {
        let label = label.clone().with_derived_sku();
        outcome("insert_label", self.label_repo().insert(&label))
    }

    pub fn get_label(&self, id: i64) -> Outcome<LabelMetadataRecord> {
        let result = self.label_repo().get(id).and_then(|found| {
            found.ok_or(LabelbookError::NotFound {
                entity: LabelMetadataRecord::ENTITY,
                id,
            })
        });
        outcome("get_label", result)
    }

    /// One page of labels ordered by name.
    pub fn list_labels(
        &self,
        query: &FilterQuery,
        limit: Option<u64>,
        offset: u64,
    ) -> Outcome<Vec<LabelMetadataRecord>> {
        let result = query
            .parse::<LabelField>()
            .and_then(|filter| self.label_repo().list(&filter, limit, offset));
        outcome("list_labels", result)
    }

    pub fn count_labels(&self, query: &FilterQuery) -> Outcome<u64> {
        let result = query
            .parse::<LabelField>()
            .and_then(|filter| self.label_repo().count(&filter));
        outcome("count_labels", result)
    }

    pub fn update_label(&self, id: i64, patch: &LabelPatch) -> Outcome<()> {
        outcome("update_label", self.label_repo().update(id, patch))
    }

    /// Set notes on a label, optionally on every label sharing its variant
    /// prefix. The value is the number of labels updated.
    pub fn update_label_notes(&self, id: i64, notes: &str, sync_by_prefix: bool) -> Outcome<usize> {
        let prefix_len = self.config.labels.notes_prefix_len;
        outcome(
            "update_label_notes",
            self.label_repo()
                .update_notes_with_prefix_len(id, notes, sync_by_prefix, prefix_len),
        )
    }

    pub fn delete_label(&self, id: i64) -> Outcome<()> {
        outcome("delete_label", self.label_repo().delete(id))
    }

    pub fn distinct_label_values(&self, field: &str) -> Outcome<BTreeSet<String>> {
        let result = field
            .parse::<LabelField>()
            .and_then(|field| self.label_repo().distinct_values(field));
        outcome("distinct_label_values", result)
    }

    pub fn export_labels(&self, path: &Path, query: &FilterQuery) -> Outcome<usize> {
        let result = query
            .parse::<LabelField>()
            .and_then(|filter| export_csv(&self.label_repo(), path, &filter));
        outcome("export_labels", result)
    }

    pub fn import_labels(&self, path: &Path, replace_existing: bool) -> Outcome<ImportSummary> {
        outcome(
            "import_labels",
            import_labels_csv(&self.label_repo(), path, replace_existing),
        )
    }

    /// Release both handles.
    pub fn close(self) -> Result<()> {
        let shipping = self.shipping.close();
        let labels = self.labels.close();
        shipping.and(labels)
    }
}

/// Log a failed operation at a level matching its kind and convert it.
fn outcome<T>(operation: &'static str, result: Result<T>) -> Outcome<T> {
    match result {
        Ok(value) => Outcome::ok(value),
        Err(e) => {
            match &e {
                LabelbookError::NotFound { .. }
                | LabelbookError::NothingToExport
                | LabelbookError::InvalidField { .. }
                | LabelbookError::InvalidValue { .. } => {
                    warn!(operation, error = %e, "Store operation rejected")
                }
                _ => error!(operation, error = %e, "Store operation failed"),
            }
            Outcome::failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> LabelbookStore {
        let mut config = LabelbookConfig::default();
        config.general.data_root = dir.display().to_string();
        LabelbookStore::new(config)
    }

    #[test]
    fn test_initialize_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.initialize().success);
        assert!(store.paths().shipping_logs_db().exists());
        assert!(store.paths().labels_db().exists());
    }

    #[test]
    fn test_invalid_field_is_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let session = store(dir.path()).open_session().unwrap();

        let out = session.list_logs(&FilterQuery::search("x").in_field("password"), None, 0);
        assert!(!out.success);
        assert!(out.message.unwrap().contains("password"));

        let out = session.distinct_label_values("id; DROP TABLE label_metadata");
        assert!(!out.success);
    }

    #[test]
    fn test_missing_record_is_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let session = store(dir.path()).open_session().unwrap();
        let out = session.delete_log(42);
        assert!(!out.success);
        assert!(out.message.unwrap().contains("42"));
        assert!(!session.get_label(1).success);
    }

    #[test]
    fn test_list_limit_is_taken_as_given() {
        let dir = tempfile::tempdir().unwrap();
        let session = store(dir.path()).open_session().unwrap();

        let rows: Vec<NewShippingLog> = (0..1_500)
            .map(|i| NewShippingLog::new(ShipAction::Print, "success").tracking(format!("T{i}")))
            .collect();
        ShippingLogRepository::new(&session.shipping)
            .insert_many(&rows)
            .unwrap();
        let query = FilterQuery::default();

        assert!(session.list_logs(&query, Some(0), 0).value.unwrap().is_empty());
        assert_eq!(session.list_logs(&query, Some(1_200), 0).value.unwrap().len(), 1_200);
        assert_eq!(session.list_logs(&query, Some(1_200), 1_200).value.unwrap().len(), 300);

        let all = session.list_logs(&query, None, 0).value.unwrap();
        assert_eq!(Some(all.len() as u64), session.count_logs(&query).value);
        assert!(session.list_logs(&query, None, u64::MAX).value.unwrap().is_empty());
    }

    #[test]
    fn test_notes_sync_uses_configured_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LabelbookConfig::default();
        config.general.data_root = dir.path().display().to_string();
        config.labels.notes_prefix_len = 3;
        let session = LabelbookStore::new(config).open_session().unwrap();

        let mut ids = Vec::new();
        for variant in ["ABC111", "ABC222", "XYZ111"] {
            let label = NewLabel {
                item_variant_number: Some(variant.into()),
                ..NewLabel::default()
            };
            ids.push(session.insert_label(&label).value.unwrap());
        }
        assert_eq!(session.update_label_notes(ids[0], "fragile", true).value, Some(2));
        assert_eq!(session.get_label(ids[2]).value.unwrap().user_notes, None);
    }

    #[test]
    fn test_insert_label_derives_sku() {
        let dir = tempfile::tempdir().unwrap();
        let session = store(dir.path()).open_session().unwrap();
        let id = session
            .insert_label(&NewLabel {
                label_name: Some("Blue Tee -- 123456-01".into()),
                ..NewLabel::default()
            })
            .value
            .unwrap();
        let label = session.get_label(id).value.unwrap();
        assert_eq!(label.sku.as_deref(), Some("123456-01"));
        session.close().unwrap();
    }

    #[test]
    fn test_filter_query_parse() {
        let query = FilterQuery::search("tee").in_field(" Label_Name ").between(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            None,
        );
        let filter: RecordFilter<LabelField> = query.parse().unwrap();
        assert_eq!(filter.field, Some(LabelField::LabelName));
        assert!(filter.date_range.is_some());

        let blank: RecordFilter<LabelField> =
            FilterQuery::default().in_field("  ").parse().unwrap();
        assert_eq!(blank.field, None);
        assert_eq!(blank.date_range, None);
    }
}
