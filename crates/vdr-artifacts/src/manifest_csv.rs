//! Incoming manifests exported as CSV.
//!
//! The CSV keeps the spreadsheet's geometry: line 1 is row 1, field 1 is
//! column 1. Blank lines still count as rows. No header handling happens
//! here.

use std::path::Path;

use tracing::debug;
use vdr_register::{CellValue, Sheet};

use crate::error::ArtifactError;

pub fn read_manifest_csv(path: &Path) -> Result<Sheet, ArtifactError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|source| ArtifactError::Csv {
            path: path.display().to_string(),
            source,
        })?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut sheet = Sheet::new(name);

    let mut records = 0usize;
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|source| ArtifactError::Csv {
            path: path.display().to_string(),
            source,
        })?;
        // The reader skips blank lines; the record's line keeps rows aligned.
        let row = rec
            .position()
            .map(|p| p.line() as u32)
            .unwrap_or(i as u32 + 1);
        for (c, field) in rec.iter().enumerate() {
            if !field.trim().is_empty() {
                sheet.set(row, c as u32 + 1, CellValue::text(field));
            }
        }
        records += 1;
    }

    debug!(path = %path.display(), records, "manifest csv read");
    Ok(sheet)
}
