//! Sheet builders laid out per the default configuration.
//!
//! Register: markers in row 9, keys in column 41, revision in column 54,
//! documents from row 13. Manifest: date at (1, 9), header in row 7,
//! data from row 8 with the file name in the presence column.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use vdr_config::VdrConfig;
use vdr_register::{CellValue, Register, Sheet};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

struct Group {
    issue: u32,
    returned: u32,
}

pub struct RegisterBuilder {
    cfg: VdrConfig,
    sheet: Sheet,
    groups: BTreeMap<String, Group>,
    rows: BTreeMap<String, u32>,
    next_row: u32,
    first_review_seen: bool,
}

impl Default for RegisterBuilder {
    fn default() -> Self {
        Self::new(VdrConfig::default())
    }
}

impl RegisterBuilder {
    pub fn new(cfg: VdrConfig) -> Self {
        let sheet = Sheet::new(cfg.register.sheet.clone());
        let next_row = cfg.register.first_data_row;
        Self {
            cfg,
            sheet,
            groups: BTreeMap::new(),
            rows: BTreeMap::new(),
            next_row,
            first_review_seen: false,
        }
    }

    /// A1, B1, C1 at 62/100/110 and 00, 01, 02 at 130/140/150.
    pub fn standard() -> Self {
        Self::default()
            .review("A1", 62)
            .review("B1", 100)
            .review("C1", 110)
            .use_label("00", 130)
            .use_label("01", 140)
            .use_label("02", 150)
    }

    fn marker(mut self, label: &str, column: u32, purpose: &str, first_review: bool) -> Self {
        let layout = &self.cfg.register;
        self.sheet.set(
            layout.header_row,
            column,
            CellValue::text(format!("Issue for {purpose} rev.{label}")),
        );
        let issue = column + layout.offsets.issue;
        let returned = issue
            + if first_review {
                layout.offsets.first_review_returned
            } else {
                layout.offsets.returned
            };
        self.groups.insert(label.to_string(), Group { issue, returned });
        self
    }

    pub fn review(mut self, label: &str, column: u32) -> Self {
        let first = !self.first_review_seen;
        self.first_review_seen = true;
        self.marker(label, column, "review", first)
    }

    pub fn use_label(self, label: &str, column: u32) -> Self {
        self.marker(label, column, "use", false)
    }

    /// Next free row, keyed `key`, current revision `revision`.
    pub fn document(mut self, key: &str, revision: &str) -> Self {
        let row = self.next_row;
        self.next_row += 1;
        let cols = &self.cfg.register.columns;
        self.sheet.set(row, self.cfg.register.key_column, CellValue::text(key));
        self.sheet.set(row, cols.revision, CellValue::text(revision));
        self.rows.insert(key.to_string(), row);
        self
    }

    /// Arbitrary cell, for static fields and malformed content.
    pub fn cell(mut self, row: u32, col: u32, value: CellValue) -> Self {
        self.sheet.set(row, col, value);
        self
    }

    pub fn issued(mut self, key: &str, label: &str, on: NaiveDate, reference: &str) -> Self {
        if let (Some(&row), Some(g)) = (self.rows.get(key), self.groups.get(label)) {
            self.sheet.set(row, g.issue, CellValue::Date(on));
            self.sheet.set(row, g.issue + 1, CellValue::text(reference));
        }
        self
    }

    pub fn returned(
        mut self,
        key: &str,
        label: &str,
        on: NaiveDate,
        reference: &str,
        remark: Option<&str>,
    ) -> Self {
        if let (Some(&row), Some(g)) = (self.rows.get(key), self.groups.get(label)) {
            self.sheet.set(row, g.returned, CellValue::Date(on));
            self.sheet.set(row, g.returned + 1, CellValue::text(reference));
            if let Some(remark) = remark {
                self.sheet.set(row, g.returned + 2, CellValue::text(remark));
            }
        }
        self
    }

    pub fn row_of(&self, key: &str) -> Option<u32> {
        self.rows.get(key).copied()
    }

    /// Issued-date column of `label`.
    pub fn issue_column(&self, label: &str) -> Option<u32> {
        self.groups.get(label).map(|g| g.issue)
    }

    /// Returned-date column of `label`.
    pub fn return_column(&self, label: &str) -> Option<u32> {
        self.groups.get(label).map(|g| g.returned)
    }

    pub fn sheet(&self) -> Sheet {
        self.sheet.clone()
    }

    pub fn build(&self) -> Result<Register> {
        Register::from_sheet(self.sheet.clone(), &self.cfg).context("build register")
    }
}

/// Incoming manifest with the default header labels.
pub struct ManifestBuilder {
    sheet: Sheet,
    next_row: u32,
}

pub const MANIFEST_DOC_NUMBER_COL: u32 = 2;
pub const MANIFEST_FILENAME_COL: u32 = 4;
pub const MANIFEST_REVISION_COL: u32 = 6;
pub const MANIFEST_REMARK_COL: u32 = 8;

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestBuilder {
    pub fn new() -> Self {
        let mut sheet = Sheet::new("Transmittal");
        for (col, label) in [
            (MANIFEST_DOC_NUMBER_COL, "Project Doc Number"),
            (MANIFEST_FILENAME_COL, "Electronic Filename"),
            (MANIFEST_REVISION_COL, "Rev"),
            (MANIFEST_REMARK_COL, "Comments code"),
        ] {
            sheet.set(7, col, CellValue::text(label));
        }
        Self { sheet, next_row: 8 }
    }

    pub fn dated(mut self, on: NaiveDate) -> Self {
        self.sheet.set(1, 9, CellValue::Date(on));
        self
    }

    pub fn row(mut self, doc_number: &str, filename: &str, revision: &str, remark: Option<&str>) -> Self {
        let row = self.next_row;
        self.next_row += 1;
        for (col, text) in [
            (MANIFEST_DOC_NUMBER_COL, doc_number),
            (MANIFEST_FILENAME_COL, filename),
            (MANIFEST_REVISION_COL, revision),
            (MANIFEST_REMARK_COL, remark.unwrap_or_default()),
        ] {
            if !text.is_empty() {
                self.sheet.set(row, col, CellValue::text(text));
            }
        }
        self
    }

    pub fn build(self) -> Sheet {
        self.sheet
    }

    /// Same sheet written as CSV, the form manifests arrive in on disk.
    pub fn write_csv(&self, path: &std::path::Path) -> Result<()> {
        let mut w = csv::Writer::from_path(path)
            .with_context(|| format!("create manifest csv {}", path.display()))?;
        let width = self.sheet.max_column() as usize;
        for row in 1..=self.sheet.max_row() {
            let mut rec = vec![String::new(); width];
            for (col, value) in self.sheet.row(row) {
                let text = match value {
                    CellValue::Date(d) => d.format("%d.%m.%Y").to_string(),
                    other => other.as_text().unwrap_or_default(),
                };
                let slot = rec
                    .get_mut(col as usize - 1)
                    .ok_or_else(|| anyhow!("column {col} outside sheet width"))?;
                *slot = text;
            }
            w.write_record(&rec)?;
        }
        w.flush()?;
        Ok(())
    }
}
