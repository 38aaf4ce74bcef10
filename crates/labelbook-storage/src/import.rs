//! Bulk import of label metadata from a spreadsheet CSV export.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use labelbook_core::error::Result;
use labelbook_core::types::{LabelMetadataRecord, NewLabel};

use crate::repository::{clear_labels, insert_row, now_timestamp, LabelRepository};

/// Rows written and rows passed over by one import.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Placeholder the spreadsheet uses for "no product".
const PLACEHOLDER: &str = "--";

#[derive(Default)]
struct Columns {
    upc: Option<usize>,
    variant: Option<usize>,
    department: Option<usize>,
    category: Option<usize>,
    color: Option<usize>,
    website_color: Option<usize>,
    website_name: Option<usize>,
    label_name: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
            .collect();
        let find = |name: &str| index.get(name).copied();

        Self {
            upc: find("upc"),
            variant: find("item variant number").or_else(|| find("variant")),
            department: find("department"),
            category: find("category"),
            color: find("color"),
            website_color: find("website color"),
            website_name: find("website name"),
            label_name: find("label name"),
        }
    }
}

fn field(record: &csv::StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Import labels from `path`. With `replace_existing` every current label is
/// removed first; the clear and all inserts commit together or not at all.
pub fn import_labels_csv(
    repo: &LabelRepository<'_>,
    path: &Path,
    replace_existing: bool,
) -> Result<ImportSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let columns = Columns::from_headers(reader.headers()?);

    let mut labels = Vec::new();
    let mut summary = ImportSummary::default();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line + 2, error = %e, "Unreadable label row skipped");
                summary.skipped += 1;
                continue;
            }
        };

        let label_name = field(&record, columns.label_name);
        let website_name = field(&record, columns.website_name);
        if label_name.as_deref() == Some(PLACEHOLDER) || website_name.as_deref() == Some(PLACEHOLDER)
        {
            summary.skipped += 1;
            continue;
        }

        labels.push(
            NewLabel {
                upc: field(&record, columns.upc),
                item_variant_number: field(&record, columns.variant),
                department: field(&record, columns.department),
                category: field(&record, columns.category),
                color: field(&record, columns.color),
                website_color: field(&record, columns.website_color),
                website_name,
                label_name,
                ..NewLabel::default()
            }
            .with_derived_sku(),
        );
    }

    let db = repo.database();
    db.ensure_schema()?;
    let now = now_timestamp();
    let removed = db.transaction(|conn| {
        let removed = if replace_existing {
            clear_labels(conn)?
        } else {
            0
        };
        for label in &labels {
            insert_row::<LabelMetadataRecord>(conn, label, &now)?;
        }
        Ok(removed)
    })?;
    summary.imported = labels.len();

    info!(
        path = %path.display(),
        imported = summary.imported,
        skipped = summary.skipped,
        replaced = removed,
        "Label CSV imported"
    );
    Ok(summary)
}
