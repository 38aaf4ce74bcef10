//! Labelbook storage crate - SQLite persistence for shipping logs and label
//! metadata.
//!
//! Provides per-worker WAL-mode database handles with self-healing schema,
//! a generic repository with multi-field search and pagination, CSV export
//! and import, and the one-time migration of legacy shipping records.

pub mod db;
pub mod export;
pub mod import;
pub mod migrate;
pub mod record;
pub mod repository;
pub mod schema;
pub mod search;
pub mod service;

pub use db::{ConnectionProvider, Database};
pub use export::export_csv;
pub use import::{import_labels_csv, ImportSummary};
pub use migrate::{parse_text_log_line, LegacyMigrator, LegacySource, MigrationReport, SourceReport};
pub use record::Record;
pub use repository::{
    LabelRepository, Repository, ShippingLogRepository,
};
pub use schema::{SchemaInitializer, StoreKind};
pub use search::{SearchPredicate, WordJoin};
pub use service::{FilterQuery, LabelbookStore, StoreSession};
