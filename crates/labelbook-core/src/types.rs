use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::LabelbookError;

/// Timestamp layout used by every stored time column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Check that `value` is a timestamp in the stored layout.
pub fn validate_timestamp(value: &str) -> crate::error::Result<()> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|_| ())
        .map_err(|_| LabelbookError::InvalidValue {
            field: "timestamp",
            value: value.to_string(),
            expected: "YYYY-MM-DD HH:MM:SS",
        })
}

// =============================================================================
// Enums
// =============================================================================

/// What the printing layer did for a shipping event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipAction {
    /// A label was sent to the printer.
    Print,
    /// The event was recorded without printing.
    LogOnly,
    /// Could not be determined (typically migrated rows).
    #[default]
    Unknown,
}

impl ShipAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipAction::Print => "print",
            ShipAction::LogOnly => "log_only",
            ShipAction::Unknown => "unknown",
        }
    }

    /// Lenient decoding for stored values: anything unrecognised is `Unknown`.
    pub fn from_stored(value: &str) -> Self {
        value.parse().unwrap_or(ShipAction::Unknown)
    }
}

impl fmt::Display for ShipAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipAction {
    type Err = LabelbookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "print" => Ok(ShipAction::Print),
            "log_only" => Ok(ShipAction::LogOnly),
            "unknown" => Ok(ShipAction::Unknown),
            other => Err(LabelbookError::InvalidField {
                field: other.to_string(),
                allowed: "print, log_only, unknown".to_string(),
            }),
        }
    }
}

// =============================================================================
// Allow-listed search fields
// =============================================================================

/// Columns of `shipping_logs` that callers may search or list values of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingField {
    TrackingNumber,
    Sku,
    Action,
    Status,
    Details,
}

impl ShippingField {
    pub const ALL: &'static [ShippingField] = &[
        ShippingField::TrackingNumber,
        ShippingField::Sku,
        ShippingField::Action,
        ShippingField::Status,
        ShippingField::Details,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingField::TrackingNumber => "tracking_number",
            ShippingField::Sku => "sku",
            ShippingField::Action => "action",
            ShippingField::Status => "status",
            ShippingField::Details => "details",
        }
    }
}

/// Columns of `label_metadata` that callers may search or list values of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelField {
    Upc,
    ItemVariantNumber,
    Department,
    Category,
    Color,
    WebsiteColor,
    WebsiteName,
    LabelName,
    Sku,
}

impl LabelField {
    pub const ALL: &'static [LabelField] = &[
        LabelField::Upc,
        LabelField::ItemVariantNumber,
        LabelField::Department,
        LabelField::Category,
        LabelField::Color,
        LabelField::WebsiteColor,
        LabelField::WebsiteName,
        LabelField::LabelName,
        LabelField::Sku,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LabelField::Upc => "upc",
            LabelField::ItemVariantNumber => "item_variant_number",
            LabelField::Department => "department",
            LabelField::Category => "category",
            LabelField::Color => "color",
            LabelField::WebsiteColor => "website_color",
            LabelField::WebsiteName => "website_name",
            LabelField::LabelName => "label_name",
            LabelField::Sku => "sku",
        }
    }
}

fn parse_field<F: Copy>(s: &str, all: &[F], name: impl Fn(&F) -> &'static str) -> Result<F, LabelbookError> {
    let wanted = s.trim();
    all.iter()
        .copied()
        .find(|f| name(f).eq_ignore_ascii_case(wanted))
        .ok_or_else(|| LabelbookError::InvalidField {
            field: wanted.to_string(),
            allowed: all.iter().map(|f| name(f)).collect::<Vec<_>>().join(", "),
        })
}

impl FromStr for ShippingField {
    type Err = LabelbookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s, Self::ALL, ShippingField::as_str)
    }
}

impl FromStr for LabelField {
    type Err = LabelbookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_field(s, Self::ALL, LabelField::as_str)
    }
}

impl fmt::Display for ShippingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LabelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Inclusive calendar-date window.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Lower bound as a stored timestamp string (start of day).
    pub fn lower_bound(&self) -> Option<String> {
        self.start.map(|d| format!("{} 00:00:00", d.format("%Y-%m-%d")))
    }

    /// Upper bound as a stored timestamp string (end of day).
    pub fn upper_bound(&self) -> Option<String> {
        self.end.map(|d| format!("{} 23:59:59", d.format("%Y-%m-%d")))
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Search, column restriction and date window shared by list, count and export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordFilter<F> {
    pub search_term: Option<String>,
    pub field: Option<F>,
    pub date_range: Option<DateRange>,
}

impl<F> Default for RecordFilter<F> {
    fn default() -> Self {
        Self {
            search_term: None,
            field: None,
            date_range: None,
        }
    }
}

impl<F> RecordFilter<F> {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search_term: Some(term.into()),
            ..Self::default()
        }
    }

    pub fn in_field(mut self, field: F) -> Self {
        self.field = Some(field);
        self
    }

    pub fn between(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    /// The search term with surrounding whitespace removed, if any remains.
    pub fn term(&self) -> Option<&str> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

pub type ShippingFilter = RecordFilter<ShippingField>;
pub type LabelFilter = RecordFilter<LabelField>;

// =============================================================================
// Shipping log records
// =============================================================================

/// One row of the consolidated shipping log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingLogEntry {
    pub id: i64,
    pub timestamp: String,
    pub tracking_number: Option<String>,
    pub sku: Option<String>,
    pub action: ShipAction,
    pub status: String,
    pub details: Option<String>,
    pub created_at: String,
}

/// Fields for a new shipping log row. A missing `timestamp` is filled at
/// insert; `created_at` is always the insert time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShippingLog {
    pub timestamp: Option<String>,
    pub tracking_number: Option<String>,
    pub sku: Option<String>,
    pub action: ShipAction,
    pub status: String,
    pub details: Option<String>,
}

impl NewShippingLog {
    pub fn new(action: ShipAction, status: impl Into<String>) -> Self {
        Self {
            action,
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn tracking(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self
    }

    pub fn sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn at(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// Partial update of a shipping log row. There is no `timestamp` field: a
/// row's timestamp never changes after insert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShippingLogPatch {
    pub tracking_number: Option<String>,
    pub sku: Option<String>,
    pub action: Option<ShipAction>,
    pub status: Option<String>,
    pub details: Option<String>,
}

impl ShippingLogPatch {
    pub fn is_empty(&self) -> bool {
        self.tracking_number.is_none()
            && self.sku.is_none()
            && self.action.is_none()
            && self.status.is_none()
            && self.details.is_none()
    }
}

// =============================================================================
// Label metadata records
// =============================================================================

/// One row of label metadata imported from the product spreadsheet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMetadataRecord {
    pub id: i64,
    pub upc: Option<String>,
    pub item_variant_number: Option<String>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub website_color: Option<String>,
    pub website_name: Option<String>,
    pub label_name: Option<String>,
    pub sku: Option<String>,
    pub user_notes: Option<String>,
    pub created_at: String,
}

/// Fields for a new label metadata row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLabel {
    pub upc: Option<String>,
    pub item_variant_number: Option<String>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub website_color: Option<String>,
    pub website_name: Option<String>,
    pub label_name: Option<String>,
    pub sku: Option<String>,
    pub user_notes: Option<String>,
}

impl NewLabel {
    /// Fill `sku` from the variant number, or from the text after `" -- "` in
    /// the label name, unless one was supplied explicitly.
    pub fn with_derived_sku(mut self) -> Self {
        if self.sku.as_deref().map_or(true, |s| s.trim().is_empty()) {
            self.sku = derive_sku(
                self.item_variant_number.as_deref(),
                self.label_name.as_deref(),
            );
        }
        self
    }
}

/// Partial update of a label metadata row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelPatch {
    pub upc: Option<String>,
    pub item_variant_number: Option<String>,
    pub department: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub website_color: Option<String>,
    pub website_name: Option<String>,
    pub label_name: Option<String>,
    pub sku: Option<String>,
    pub user_notes: Option<String>,
}

impl LabelPatch {
    pub fn is_empty(&self) -> bool {
        self.upc.is_none()
            && self.item_variant_number.is_none()
            && self.department.is_none()
            && self.category.is_none()
            && self.color.is_none()
            && self.website_color.is_none()
            && self.website_name.is_none()
            && self.label_name.is_none()
            && self.sku.is_none()
            && self.user_notes.is_none()
    }
}

/// SKU correlation rule shared by the CSV importer and manual inserts.
pub fn derive_sku(item_variant_number: Option<&str>, label_name: Option<&str>) -> Option<String> {
    if let Some(variant) = item_variant_number.map(str::trim).filter(|v| !v.is_empty()) {
        return Some(variant.to_string());
    }
    label_name
        .and_then(|name| name.split(" -- ").nth(1))
        .map(|segment| segment.trim().to_string())
        .filter(|s| !s.is_empty())
}

// =============================================================================
// Facade result
// =============================================================================

/// Success flag plus either a value or a human-readable message.
///
/// Returned by every UI-facing store operation so callers never depend on
/// panics or log text to learn what happened.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub message: Option<String>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self {
            success: true,
            value: Some(value),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.value) {
            (true, Some(value)) => Ok(value),
            _ => Err(self.message.unwrap_or_else(|| "operation failed".to_string())),
        }
    }
}

impl<T> From<crate::error::Result<T>> for Outcome<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::ok(value),
            Err(e) => Outcome::failed(e.to_string()),
        }
    }
}
