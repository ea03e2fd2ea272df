//! Sparse in-memory worksheet.
//!
//! Cells are addressed 1-based `(row, column)` like the spreadsheets the
//! register is exported from. Empty cells are simply absent.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date formats accepted when a date arrives as text.
const TEXT_DATE_FORMATS: &[&str] = &["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// Trimmed text rendering; `None` for blank text.
    ///
    /// Whole numbers render without a fractional part so a remark code typed
    /// as a number reads back as `"1"`, not `"1.0"`.
    pub fn as_text(&self) -> Option<String> {
        let s = match self {
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Date(d) => d.format("%d.%m.%Y").to_string(),
        };
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            CellValue::Text(s) => parse_text_date(s),
            CellValue::Number(_) => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.trim().is_empty())
    }
}

pub fn parse_text_date(s: &str) -> Option<NaiveDate> {
    let t = s.trim();
    TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "SheetFile", into = "SheetFile")]
pub struct Sheet {
    name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Build from text rows (row 1 first). Blank strings leave the cell empty.
    pub fn from_text_rows<R, C>(name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator<Item = String>,
    {
        let mut sheet = Sheet::new(name);
        for (r, row) in rows.into_iter().enumerate() {
            for (c, raw) in row.into_iter().enumerate() {
                if !raw.trim().is_empty() {
                    sheet.set(r as u32 + 1, c as u32 + 1, CellValue::Text(raw));
                }
            }
        }
        sheet
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    /// Trimmed text of a cell; `None` when empty or blank.
    pub fn text(&self, row: u32, col: u32) -> Option<String> {
        self.get(row, col).and_then(CellValue::as_text)
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        self.cells.insert((row, col), value);
    }

    pub fn clear(&mut self, row: u32, col: u32) -> Option<CellValue> {
        self.cells.remove(&(row, col))
    }

    pub fn max_row(&self) -> u32 {
        self.cells.keys().map(|(r, _)| *r).max().unwrap_or(0)
    }

    pub fn max_column(&self) -> u32 {
        self.cells.keys().map(|(_, c)| *c).max().unwrap_or(0)
    }

    /// Non-empty cells of one row, left to right.
    pub fn row(&self, row: u32) -> impl Iterator<Item = (u32, &CellValue)> + '_ {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|((_, c), v)| (*c, v))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

// ---------------------------------------------------------------------------
// Serialized form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SheetFile {
    name: String,
    cells: Vec<CellEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CellEntry {
    row: u32,
    col: u32,
    #[serde(flatten)]
    value: CellValue,
}

impl From<SheetFile> for Sheet {
    fn from(f: SheetFile) -> Self {
        let mut sheet = Sheet::new(f.name);
        for e in f.cells {
            sheet.set(e.row, e.col, e.value);
        }
        sheet
    }
}

impl From<Sheet> for SheetFile {
    fn from(s: Sheet) -> Self {
        SheetFile {
            name: s.name,
            cells: s
                .cells
                .into_iter()
                .map(|((row, col), value)| CellEntry { row, col, value })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_remark_code_reads_as_integer_text() {
        assert_eq!(CellValue::Number(1.0).as_text().as_deref(), Some("1"));
        assert_eq!(CellValue::Number(2.5).as_text().as_deref(), Some("2.5"));
        assert_eq!(CellValue::text("  ").as_text(), None);
    }

    #[test]
    fn text_dates_parse_in_register_format() {
        let d = NaiveDate::from_ymd_opt(2021, 3, 14).unwrap();
        assert_eq!(CellValue::text("14.03.2021").as_date(), Some(d));
        assert_eq!(CellValue::text("2021-03-14").as_date(), Some(d));
        assert_eq!(CellValue::text("-").as_date(), None);
    }

    #[test]
    fn row_iteration_is_ordered_and_bounded_to_row() {
        let mut s = Sheet::new("VDR");
        s.set(9, 70, CellValue::text("b"));
        s.set(9, 62, CellValue::text("a"));
        s.set(10, 1, CellValue::text("other row"));
        let cols: Vec<u32> = s.row(9).map(|(c, _)| c).collect();
        assert_eq!(cols, vec![62, 70]);
        assert_eq!(s.max_row(), 10);
        assert_eq!(s.max_column(), 70);
    }

    #[test]
    fn serialized_form_survives_json() {
        let mut s = Sheet::new("VDR");
        s.set(13, 41, CellValue::text("0055-DOC-0001"));
        s.set(13, 64, CellValue::Date(NaiveDate::from_ymd_opt(2021, 1, 5).unwrap()));
        s.set(13, 70, CellValue::Number(1.0));
        let json = serde_json::to_string(&s).unwrap();
        let back: Sheet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
