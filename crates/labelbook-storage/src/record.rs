//! Table mappings for the two record types.
//!
//! `Record` is the seam that lets one generic repository serve both stores:
//! each implementation names its table, columns, ordering and search
//! behaviour, and knows how to decode a row and encode inserts and patches.

use rusqlite::types::Value;
use rusqlite::Row;

use labelbook_core::error::Result;
use labelbook_core::types::{
    validate_timestamp, LabelField, LabelMetadataRecord, LabelPatch, NewLabel, NewShippingLog,
    ShipAction, ShippingField, ShippingLogEntry, ShippingLogPatch,
};

use crate::schema::StoreKind;
use crate::search::WordJoin;

/// A row type stored in one table of one store file.
pub trait Record: Sized {
    /// Allow-listed column selector.
    type Field: Copy + std::fmt::Debug;
    /// Values for a new row.
    type New;
    /// Partial update.
    type Patch;

    /// Human name used in `NotFound` errors and logs.
    const ENTITY: &'static str;
    const KIND: StoreKind;
    const COLUMNS: &'static str;
    const ORDER_BY: &'static str;
    /// Column the date-range filter applies to.
    const DATE_COLUMN: &'static str;
    /// How words of an all-field search combine.
    const WORD_JOIN: WordJoin;
    const CSV_HEADER: &'static [&'static str];

    fn table() -> &'static str {
        Self::KIND.table()
    }

    /// Columns an all-field search looks at.
    fn search_columns() -> &'static [&'static str];

    fn column(field: Self::Field) -> &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    /// Column/value pairs for an insert. `now` fills unset timestamps and is
    /// always the `created_at` value. Supplied timestamps are validated.
    fn insert_values(new: &Self::New, now: &str) -> Result<Vec<(&'static str, Value)>>;

    /// Column/value pairs for the fields a patch sets.
    fn patch_values(patch: &Self::Patch) -> Vec<(&'static str, Value)>;

    fn csv_row(&self) -> Vec<String>;

    fn id(&self) -> i64;
}

fn text(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s.clone()),
        None => Value::Null,
    }
}

fn push_set(out: &mut Vec<(&'static str, Value)>, column: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        out.push((column, Value::Text(v.clone())));
    }
}

fn cell(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

// =============================================================================
// Shipping logs
// =============================================================================

impl Record for ShippingLogEntry {
    type Field = ShippingField;
    type New = NewShippingLog;
    type Patch = ShippingLogPatch;

    const ENTITY: &'static str = "shipping log";
    const KIND: StoreKind = StoreKind::ShippingLogs;
    const COLUMNS: &'static str =
        "id, timestamp, tracking_number, sku, action, status, details, created_at";
    const ORDER_BY: &'static str = "timestamp DESC, id DESC";
    const DATE_COLUMN: &'static str = "timestamp";
    const WORD_JOIN: WordJoin = WordJoin::Any;
    const CSV_HEADER: &'static [&'static str] =
        &["id", "timestamp", "tracking_number", "sku", "status", "notes"];

    fn search_columns() -> &'static [&'static str] {
        &["tracking_number", "sku", "status", "details"]
    }

    fn column(field: ShippingField) -> &'static str {
        field.as_str()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let action: Option<String> = row.get("action")?;
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            tracking_number: row.get("tracking_number")?,
            sku: row.get("sku")?,
            action: action
                .as_deref()
                .map(ShipAction::from_stored)
                .unwrap_or_default(),
            status: row.get::<_, Option<String>>("status")?.unwrap_or_default(),
            details: row.get("details")?,
            created_at: row.get::<_, Option<String>>("created_at")?.unwrap_or_default(),
        })
    }

    fn insert_values(new: &NewShippingLog, now: &str) -> Result<Vec<(&'static str, Value)>> {
        let timestamp = match new.timestamp.as_deref().map(str::trim) {
            Some(ts) => {
                validate_timestamp(ts)?;
                ts.to_string()
            }
            None => now.to_string(),
        };
        Ok(vec![
            ("timestamp", Value::Text(timestamp)),
            ("tracking_number", text(&new.tracking_number)),
            ("sku", text(&new.sku)),
            ("action", Value::Text(new.action.as_str().to_string())),
            ("status", Value::Text(new.status.clone())),
            ("details", text(&new.details)),
            ("created_at", Value::Text(now.to_string())),
        ])
    }

    fn patch_values(patch: &ShippingLogPatch) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_set(&mut out, "tracking_number", &patch.tracking_number);
        push_set(&mut out, "sku", &patch.sku);
        if let Some(action) = patch.action {
            out.push(("action", Value::Text(action.as_str().to_string())));
        }
        push_set(&mut out, "status", &patch.status);
        push_set(&mut out, "details", &patch.details);
        out
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.timestamp.clone(),
            cell(&self.tracking_number),
            cell(&self.sku),
            self.status.clone(),
            cell(&self.details),
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }
}

// =============================================================================
// Label metadata
// =============================================================================

impl Record for LabelMetadataRecord {
    type Field = LabelField;
    type New = NewLabel;
    type Patch = LabelPatch;

    const ENTITY: &'static str = "label";
    const KIND: StoreKind = StoreKind::Labels;
    const COLUMNS: &'static str = "id, upc, item_variant_number, department, category, color, \
         website_color, website_name, label_name, sku, user_notes, created_at";
    const ORDER_BY: &'static str = "label_name ASC, id ASC";
    const DATE_COLUMN: &'static str = "created_at";
    const WORD_JOIN: WordJoin = WordJoin::All;
    const CSV_HEADER: &'static [&'static str] = &[
        "id",
        "upc",
        "item_variant_number",
        "department",
        "category",
        "color",
        "website_color",
        "website_name",
        "label_name",
        "sku",
    ];

    fn search_columns() -> &'static [&'static str] {
        &[
            "upc",
            "item_variant_number",
            "department",
            "category",
            "color",
            "website_color",
            "website_name",
            "label_name",
            "sku",
        ]
    }

    fn column(field: LabelField) -> &'static str {
        field.as_str()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            upc: row.get("upc")?,
            item_variant_number: row.get("item_variant_number")?,
            department: row.get("department")?,
            category: row.get("category")?,
            color: row.get("color")?,
            website_color: row.get("website_color")?,
            website_name: row.get("website_name")?,
            label_name: row.get("label_name")?,
            sku: row.get("sku")?,
            user_notes: row.get("user_notes")?,
            created_at: row.get::<_, Option<String>>("created_at")?.unwrap_or_default(),
        })
    }

    fn insert_values(new: &NewLabel, now: &str) -> Result<Vec<(&'static str, Value)>> {
        Ok(vec![
            ("upc", text(&new.upc)),
            ("item_variant_number", text(&new.item_variant_number)),
            ("department", text(&new.department)),
            ("category", text(&new.category)),
            ("color", text(&new.color)),
            ("website_color", text(&new.website_color)),
            ("website_name", text(&new.website_name)),
            ("label_name", text(&new.label_name)),
            ("sku", text(&new.sku)),
            ("user_notes", text(&new.user_notes)),
            ("created_at", Value::Text(now.to_string())),
        ])
    }

    fn patch_values(patch: &LabelPatch) -> Vec<(&'static str, Value)> {
        let mut out = Vec::new();
        push_set(&mut out, "upc", &patch.upc);
        push_set(&mut out, "item_variant_number", &patch.item_variant_number);
        push_set(&mut out, "department", &patch.department);
        push_set(&mut out, "category", &patch.category);
        push_set(&mut out, "color", &patch.color);
        push_set(&mut out, "website_color", &patch.website_color);
        push_set(&mut out, "website_name", &patch.website_name);
        push_set(&mut out, "label_name", &patch.label_name);
        push_set(&mut out, "sku", &patch.sku);
        push_set(&mut out, "user_notes", &patch.user_notes);
        out
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            cell(&self.upc),
            cell(&self.item_variant_number),
            cell(&self.department),
            cell(&self.category),
            cell(&self.color),
            cell(&self.website_color),
            cell(&self.website_name),
            cell(&self.label_name),
            cell(&self.sku),
        ]
    }

    fn id(&self) -> i64 {
        self.id
    }
}
