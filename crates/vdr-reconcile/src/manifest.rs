//! Incoming transmittal manifests.
//!
//! The manifest is a small sheet: a transmittal date in a fixed cell, a
//! header row whose column order varies between senders, and one row per
//! returned document.

use tracing::{debug, warn};
use vdr_config::ManifestLayout;
use vdr_register::Sheet;

use crate::error::ReconcileError;
use crate::types::IncomingSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestColumns {
    pub doc_number: u32,
    pub filename: u32,
    pub revision: u32,
    pub remark: u32,
}

/// Column of `label` in the header row: exact (case-insensitive) match
/// first, then the first cell containing it.
fn find_label(header: &[(u32, String)], label: &str) -> Option<u32> {
    let label = label.trim().to_lowercase();
    header
        .iter()
        .find(|(_, text)| *text == label)
        .or_else(|| header.iter().find(|(_, text)| text.contains(&label)))
        .map(|(col, _)| *col)
}

impl ManifestColumns {
    pub fn locate(
        sheet: &Sheet,
        layout: &ManifestLayout,
        transmittal: &str,
    ) -> Result<Self, ReconcileError> {
        let header: Vec<(u32, String)> = sheet
            .row(layout.header_row)
            .filter_map(|(col, v)| v.as_text().map(|t| (col, t.to_lowercase())))
            .collect();

        let labels = &layout.labels;
        let wanted = [
            &labels.doc_number,
            &labels.filename,
            &labels.revision,
            &labels.remark,
        ];
        let found: Vec<Option<u32>> = wanted.iter().map(|l| find_label(&header, l)).collect();

        match found[..] {
            [Some(doc_number), Some(filename), Some(revision), Some(remark)] => Ok(Self {
                doc_number,
                filename,
                revision,
                remark,
            }),
            _ => {
                let missing: Vec<String> = wanted
                    .iter()
                    .zip(&found)
                    .filter(|(_, f)| f.is_none())
                    .map(|(l, _)| l.to_string())
                    .collect();
                warn!(transmittal, ?missing, "manifest header not recognised");
                Err(ReconcileError::ManifestColumnsUnrecognized {
                    transmittal: transmittal.to_string(),
                    missing,
                })
            }
        }
    }
}

/// Drop a trailing file extension (`.pdf`, `.docx`, ...).
///
/// Document names contain dots of their own, so only a short alphabetic
/// tail counts as an extension.
pub fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            stem
        }
        _ => name,
    }
}

pub fn parse_manifest(
    sheet: &Sheet,
    layout: &ManifestLayout,
    transmittal: &str,
    phase: &str,
) -> Result<Vec<IncomingSnapshot>, ReconcileError> {
    let cols = ManifestColumns::locate(sheet, layout, transmittal)?;
    let transmittal_date = sheet
        .get(layout.date_row, layout.date_column)
        .and_then(|v| v.as_date());
    if transmittal_date.is_none() {
        warn!(transmittal, "manifest carries no transmittal date");
    }

    let mut out = Vec::new();
    for row in layout.first_data_row..=sheet.max_row() {
        if sheet.text(row, layout.presence_column).is_none() {
            continue;
        }
        let filename = sheet.text(row, cols.filename).unwrap_or_default();
        let doc_number = sheet.text(row, cols.doc_number).unwrap_or_default();
        if filename.is_empty() && doc_number.is_empty() {
            warn!(transmittal, row, "manifest row without document number or file name");
            continue;
        }
        out.push(IncomingSnapshot {
            doc_number,
            filename,
            revision: sheet.text(row, cols.revision).unwrap_or_default(),
            remark_code: sheet.text(row, cols.remark),
            phase: phase.to_string(),
            transmittal_date,
        });
    }
    debug!(transmittal, rows = out.len(), "manifest parsed");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdr_register::CellValue;

    fn manifest() -> Sheet {
        let mut s = Sheet::new("Transmittal");
        s.set(1, 9, CellValue::text("05.07.2021"));
        for (col, label) in [
            (2, "Project Doc Number"),
            (3, "Rev"),
            (4, "Electronic Filename"),
            (6, "Reviewer comments"),
            (7, "Revision notes"),
        ] {
            s.set(7, col, CellValue::text(label));
        }
        s.set(8, 2, CellValue::text("0055-CPC-GA1-4.2-AB-0001"));
        s.set(8, 3, CellValue::text("B1"));
        s.set(8, 4, CellValue::text("0055-CPC-GA1-4.2-AB-0001_02_RU.pdf"));
        s.set(8, 6, CellValue::Number(1.0));
        // no presence column value: ignored
        s.set(9, 2, CellValue::text("0055-IGNORED"));
        s
    }

    #[test]
    fn header_is_found_regardless_of_order_and_case() {
        let cols = ManifestColumns::locate(&manifest(), &ManifestLayout::default(), "T").unwrap();
        // "rev" matches exactly before the "revision notes" substring.
        assert_eq!(cols.revision, 3);
        assert_eq!(cols.remark, 6);
        assert_eq!(cols.filename, 4);
    }

    #[test]
    fn rows_need_the_presence_column() {
        let rows = parse_manifest(&manifest(), &ManifestLayout::default(), "T", "2").unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.revision, "B1");
        assert_eq!(r.remark_code.as_deref(), Some("1"));
        assert_eq!(r.phase, "2");
        assert_eq!(r.transmittal_date, chrono::NaiveDate::from_ymd_opt(2021, 7, 5));
    }

    #[test]
    fn missing_label_names_what_is_missing() {
        let mut s = manifest();
        s.clear(7, 6);
        s.clear(7, 7);
        let err = parse_manifest(&s, &ManifestLayout::default(), "TRM-1", "2").unwrap_err();
        assert_eq!(
            err,
            ReconcileError::ManifestColumnsUnrecognized {
                transmittal: "TRM-1".into(),
                missing: vec!["comments".into()],
            }
        );
    }

    #[test]
    fn extension_stripping_keeps_document_dots() {
        assert_eq!(strip_extension("0055-CPC-GA1-4.2-AB-0001.pdf"), "0055-CPC-GA1-4.2-AB-0001");
        assert_eq!(strip_extension("0055-CPC-GA1-4.2-AB-0001"), "0055-CPC-GA1-4.2-AB-0001");
        assert_eq!(strip_extension("0055-ER.KM-0012"), "0055-ER.KM-0012");
    }
}
