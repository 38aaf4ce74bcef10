//! CSV export of filtered record sets.

use std::path::Path;

use tracing::{error, info, warn};

use labelbook_core::error::{LabelbookError, Result};
use labelbook_core::types::RecordFilter;

use crate::record::Record;
use crate::repository::Repository;

/// Write every row matching `filter` to `path` as CSV and return the row
/// count. An empty result is `NothingToExport` and no file is written.
pub fn export_csv<R: Record>(
    repo: &Repository<'_, R>,
    path: &Path,
    filter: &RecordFilter<R::Field>,
) -> Result<usize> {
    let records = repo.all_matching(filter)?;
    if records.is_empty() {
        warn!(entity = R::ENTITY, path = %path.display(), "No records matched, nothing exported");
        return Err(LabelbookError::NothingToExport);
    }

    match write_rows(path, &records) {
        Ok(()) => {
            info!(
                entity = R::ENTITY,
                rows = records.len(),
                path = %path.display(),
                "CSV export written"
            );
            Ok(records.len())
        }
        Err(e) => {
            error!(entity = R::ENTITY, path = %path.display(), error = %e, "CSV export failed");
            Err(e)
        }
    }
}

fn write_rows<R: Record>(path: &Path, records: &[R]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(R::CSV_HEADER)?;
    for record in records {
        writer.write_record(record.csv_row())?;
    }
    writer.flush()?;
    Ok(())
}
