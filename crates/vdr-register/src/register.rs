//! The loaded register: row lookup, cell access and revision posting.

use std::collections::BTreeMap;
use std::thread;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vdr_config::{RegisterLayout, VdrConfig};

use crate::columns::{ColumnGroup, ColumnTable, GroupField};
use crate::error::{RegisterError, StoreError};
use crate::key::{DocumentKey, KeyNormalizer};
use crate::scheme::{Classified, RevisionSchemes, Scheme};
use crate::sheet::{CellValue, Sheet};
use crate::store::{RegisterStore, RetryPolicy, StoreLease};

/// Per-document fields outside the revision column groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticField {
    DocNumber,
    IssuePurpose,
    Class,
    NameLocal,
    NameForeign,
    Revision,
    DisciplineCode,
    TypeCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WarningKind {
    /// An earlier revision of the scheme has no issued date.
    MissingDate,
    /// A date cell holds something that is not a date.
    NotADate { found: String },
}

/// A data-quality problem found while reading a row. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataWarning {
    pub key: String,
    pub label: String,
    pub column: u32,
    #[serde(flatten)]
    pub kind: WarningKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionEvent {
    pub label: String,
    pub date: NaiveDate,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOutcome {
    pub row: u32,
    /// False when the issued date was already present.
    pub written: bool,
    /// Dated events of the scheme up to and including the posted label.
    pub history: Vec<RevisionEvent>,
    pub warnings: Vec<DataWarning>,
}

/// Values read from an incoming manifest row for the returned block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReturnFields {
    pub date: Option<NaiveDate>,
    pub reference: String,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    pub row: u32,
    pub written: bool,
    /// Reference already in the register when nothing was written.
    pub existing_reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Unchanged,
    Saved { attempts: u32 },
}

enum DateCell {
    Blank,
    Date(NaiveDate),
    Other(String),
}

#[derive(Debug)]
pub struct Register {
    sheet: Sheet,
    layout: RegisterLayout,
    schemes: RevisionSchemes,
    normalizer: KeyNormalizer,
    columns: ColumnTable,
    /// Key -> row; first occurrence wins.
    rows: BTreeMap<DocumentKey, u32>,
    /// Keys in row order.
    order: Vec<(DocumentKey, u32)>,
    dirty: bool,
    writes: usize,
    /// Held from load until drop when opened for writing.
    lease: Option<StoreLease>,
}

/// Lease `store`, retrying `Locked` with backoff. Returns the attempt that
/// got it.
fn acquire_lease(
    store: &dyn RegisterStore,
    retry: &RetryPolicy,
) -> Result<(StoreLease, u32), RegisterError> {
    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        match store.lease() {
            Ok(lease) => return Ok((lease, attempt)),
            Err(StoreError::Locked) => {
                warn!(register = %store.describe(), attempt, attempts, "register locked");
                if attempt < attempts {
                    thread::sleep(retry.backoff_after(attempt));
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(RegisterError::StoreLocked { attempts })
}

impl Register {
    /// Lease the store and load it. Fails with `StoreLocked` at once when
    /// another writer holds the register.
    pub fn load(store: &dyn RegisterStore, cfg: &VdrConfig) -> Result<Self, RegisterError> {
        Self::open(store, cfg, &RetryPolicy::once())
    }

    /// Lease the store, waiting out a lock per `retry`, then load. The
    /// lease lasts until the register is dropped, so no other writer can
    /// save in between.
    pub fn open(
        store: &dyn RegisterStore,
        cfg: &VdrConfig,
        retry: &RetryPolicy,
    ) -> Result<Self, RegisterError> {
        let (lease, _) = acquire_lease(store, retry)?;
        let mut register = Self::snapshot(store, cfg)?;
        register.lease = Some(lease);
        Ok(register)
    }

    /// Read-only load without a lease.
    pub fn snapshot(store: &dyn RegisterStore, cfg: &VdrConfig) -> Result<Self, RegisterError> {
        let sheet = store.load()?;
        info!(register = %store.describe(), cells = sheet.cell_count(), "register loaded");
        Self::from_sheet(sheet, cfg)
    }

    pub fn is_leased(&self) -> bool {
        self.lease.is_some()
    }

    pub fn from_sheet(sheet: Sheet, cfg: &VdrConfig) -> Result<Self, RegisterError> {
        let layout = cfg.register.clone();
        if sheet.name() != layout.sheet {
            warn!(found = sheet.name(), expected = %layout.sheet, "register sheet name differs");
        }
        let schemes = RevisionSchemes::new(&cfg.revisions);
        let columns = ColumnTable::discover(&sheet, &layout, &schemes)?;

        let mut rows = BTreeMap::new();
        let mut order = Vec::new();
        for row in layout.first_data_row..=sheet.max_row() {
            let Some(text) = sheet.text(row, layout.key_column) else {
                continue;
            };
            let key = DocumentKey::new(text);
            if let Some(first) = rows.get(&key) {
                warn!(%key, first, duplicate = row, "duplicate register key, keeping first row");
                continue;
            }
            rows.insert(key.clone(), row);
            order.push((key, row));
        }
        debug!(documents = order.len(), "register rows indexed");

        Ok(Self {
            sheet,
            layout,
            schemes,
            normalizer: KeyNormalizer::new(&cfg.keys),
            columns,
            rows,
            order,
            dirty: false,
            writes: 0,
            lease: None,
        })
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn normalizer(&self) -> &KeyNormalizer {
        &self.normalizer
    }

    pub fn schemes(&self) -> &RevisionSchemes {
        &self.schemes
    }

    pub fn columns(&self) -> &ColumnTable {
        &self.columns
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn classify(&self, raw: &str) -> Result<Classified, RegisterError> {
        self.schemes.classify(raw)
    }

    /// Row of a document; the raw name is normalized first.
    pub fn find_row(&self, raw_key: &str) -> Result<u32, RegisterError> {
        let key = self.normalizer.normalize(raw_key);
        self.row_of(&key)
    }

    pub fn contains(&self, raw_key: &str) -> bool {
        self.find_row(raw_key).is_ok()
    }

    fn row_of(&self, key: &DocumentKey) -> Result<u32, RegisterError> {
        self.rows
            .get(key)
            .copied()
            .ok_or_else(|| RegisterError::RowNotFound {
                key: key.to_string(),
            })
    }

    /// Rows taking part in a full status scan, in register order.
    pub fn documents(&self) -> impl Iterator<Item = (&DocumentKey, u32)> + '_ {
        let prefix = self.layout.document_prefix.as_deref();
        self.order
            .iter()
            .filter(move |(k, _)| prefix.map_or(true, |p| k.as_str().contains(p)))
            .map(|(k, r)| (k, *r))
    }

    // -----------------------------------------------------------------------
    // Cells
    // -----------------------------------------------------------------------

    pub fn read_cell(&self, row: u32, group: &ColumnGroup, field: GroupField) -> Option<&CellValue> {
        self.sheet.get(row, group.column(field))
    }

    pub fn read_text(&self, row: u32, group: &ColumnGroup, field: GroupField) -> Option<String> {
        self.read_cell(row, group, field)
            .and_then(CellValue::as_text)
            .filter(|t| t != self.schemes.placeholder())
    }

    pub fn write_cell(&mut self, row: u32, group: &ColumnGroup, field: GroupField, value: CellValue) {
        self.sheet.set(row, group.column(field), value);
        self.dirty = true;
        self.writes += 1;
    }

    pub fn read_static(&self, row: u32, field: StaticField) -> Option<String> {
        let c = &self.layout.columns;
        let col = match field {
            StaticField::DocNumber => c.doc_number,
            StaticField::IssuePurpose => c.issue_purpose,
            StaticField::Class => c.class,
            StaticField::NameLocal => c.name_local,
            StaticField::NameForeign => c.name_foreign,
            StaticField::Revision => c.revision,
            StaticField::DisciplineCode => c.discipline_code,
            StaticField::TypeCode => c.type_code,
        };
        self.sheet.text(row, col)
    }

    fn date_cell(&self, row: u32, col: u32) -> DateCell {
        let Some(value) = self.sheet.get(row, col) else {
            return DateCell::Blank;
        };
        if let Some(d) = value.as_date() {
            return DateCell::Date(d);
        }
        match value.as_text() {
            None => DateCell::Blank,
            Some(t) if t == self.schemes.placeholder() => DateCell::Blank,
            Some(t) => DateCell::Other(t),
        }
    }

    // -----------------------------------------------------------------------
    // Posting
    // -----------------------------------------------------------------------

    /// Dated issued events of `scheme` before label index `upto`.
    ///
    /// Gaps and non-date cells are reported, not fatal.
    pub fn history(
        &self,
        key: &DocumentKey,
        row: u32,
        scheme: Scheme,
        upto: usize,
    ) -> (Vec<RevisionEvent>, Vec<DataWarning>) {
        let mut events = Vec::new();
        let mut warnings = Vec::new();
        for group in self.columns.groups(scheme).iter().take(upto) {
            let col = group.column(GroupField::IssueDate);
            let kind = match self.date_cell(row, col) {
                DateCell::Date(date) => {
                    events.push(RevisionEvent {
                        label: group.label.clone(),
                        date,
                        reference: self.read_text(row, group, GroupField::IssueReference),
                    });
                    continue;
                }
                DateCell::Blank => WarningKind::MissingDate,
                DateCell::Other(found) => WarningKind::NotADate { found },
            };
            let w = DataWarning {
                key: key.to_string(),
                label: group.label.clone(),
                column: col,
                kind,
            };
            warn!(key = %w.key, label = %w.label, column = w.column, kind = ?w.kind, "revision history gap");
            warnings.push(w);
        }
        (events, warnings)
    }

    /// Record that revision `rev` of a document was issued on `date` under
    /// transmittal `reference`.
    ///
    /// An issued date already present is never overwritten, so posting the
    /// same event twice leaves the register unchanged.
    pub fn post_revision_event(
        &mut self,
        raw_key: &str,
        rev: &Classified,
        date: NaiveDate,
        reference: &str,
    ) -> Result<PostOutcome, RegisterError> {
        let key = self.normalizer.normalize(raw_key);
        let row = self.row_of(&key)?;
        let group = self.columns.group(rev.scheme, rev.index)?.clone();
        let (mut history, mut warnings) = self.history(&key, row, rev.scheme, rev.index);

        let date_col = group.column(GroupField::IssueDate);
        let (written, terminal_date) = match self.date_cell(row, date_col) {
            DateCell::Blank => {
                self.write_cell(row, &group, GroupField::IssueDate, CellValue::Date(date));
                self.write_cell(row, &group, GroupField::IssueReference, CellValue::text(reference));
                (true, date)
            }
            DateCell::Date(existing) => (false, existing),
            DateCell::Other(found) => {
                let w = DataWarning {
                    key: key.to_string(),
                    label: group.label.clone(),
                    column: date_col,
                    kind: WarningKind::NotADate { found },
                };
                warn!(key = %w.key, label = %w.label, column = w.column, "issued date cell is not a date, left as is");
                warnings.push(w);
                (false, date)
            }
        };

        let terminal_reference = if written {
            Some(reference.to_string())
        } else {
            self.read_text(row, &group, GroupField::IssueReference)
        };
        history.push(RevisionEvent {
            label: group.label.clone(),
            date: terminal_date,
            reference: terminal_reference,
        });

        if written {
            info!(%key, row, label = %group.label, %date, reference, "revision posted");
        } else {
            debug!(%key, row, label = %group.label, "revision already posted");
        }

        Ok(PostOutcome {
            row,
            written,
            history,
            warnings,
        })
    }

    /// Fill the returned block of revision `rev`.
    ///
    /// A returned reference already present wins; nothing is overwritten.
    pub fn post_return_event(
        &mut self,
        raw_key: &str,
        rev: &Classified,
        fields: &ReturnFields,
    ) -> Result<ReturnOutcome, RegisterError> {
        let key = self.normalizer.normalize(raw_key);
        let row = self.row_of(&key)?;
        let group = self.columns.group(rev.scheme, rev.index)?.clone();

        if let Some(existing) = self.read_text(row, &group, GroupField::ReturnReference) {
            debug!(%key, row, label = %group.label, %existing, "returned block already filled");
            return Ok(ReturnOutcome {
                row,
                written: false,
                existing_reference: Some(existing),
            });
        }

        if let Some(date) = fields.date {
            self.write_cell(row, &group, GroupField::ReturnDate, CellValue::Date(date));
        }
        self.write_cell(row, &group, GroupField::ReturnReference, CellValue::text(&fields.reference));
        if let Some(remark) = fields.remark.as_deref().filter(|r| !r.trim().is_empty()) {
            self.write_cell(row, &group, GroupField::RemarkCode, CellValue::text(remark.trim()));
        }
        info!(%key, row, label = %group.label, reference = %fields.reference, remark = ?fields.remark, "return posted");

        Ok(ReturnOutcome {
            row,
            written: true,
            existing_reference: None,
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Persist pending writes.
    ///
    /// A leased register writes under its lease. Otherwise the store is
    /// leased for the write alone, retrying a lock with backoff; the
    /// snapshot then replaces whatever the store held. On lock exhaustion
    /// the register stays dirty and nothing is lost in memory.
    pub fn save(
        &mut self,
        store: &dyn RegisterStore,
        retry: &RetryPolicy,
    ) -> Result<SaveOutcome, RegisterError> {
        if !self.dirty {
            debug!(register = %store.describe(), "no pending writes, save skipped");
            return Ok(SaveOutcome::Unchanged);
        }

        let attempts = if self.lease.is_some() {
            store.save(&self.sheet)?;
            1
        } else {
            let (_lease, attempts) = acquire_lease(store, retry)?;
            store.save(&self.sheet)?;
            attempts
        };
        self.dirty = false;
        info!(register = %store.describe(), attempts, writes = self.writes, "register saved");
        Ok(SaveOutcome::Saved { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    /// Markers: A1 @62, B1 @100, C1 @110, 00 @130, 01 @140.
    fn sheet() -> Sheet {
        let mut s = Sheet::new("VDR");
        for (col, text) in [
            (62, "issue for rev.A1"),
            (100, "issue for rev.B1"),
            (110, "issue for rev.C1"),
            (130, "issue for rev.00"),
            (140, "issue for rev.01"),
        ] {
            s.set(9, col, CellValue::text(text));
        }
        s.set(13, 41, CellValue::text("0055-DOC-0001"));
        s.set(14, 41, CellValue::text("0055-ER.KM-0012"));
        s.set(15, 41, CellValue::text("9999-OTHER"));
        s.set(16, 41, CellValue::text("0055-DOC-0001"));
        s.set(13, 50, CellValue::text("Pump datasheet"));
        s
    }

    fn register() -> Register {
        Register::from_sheet(sheet(), &VdrConfig::default()).unwrap()
    }

    struct FlakyStore {
        locked_for: RefCell<u32>,
        saved: RefCell<Option<Sheet>>,
    }

    impl RegisterStore for FlakyStore {
        fn describe(&self) -> String {
            "flaky".into()
        }
        fn lease(&self) -> Result<StoreLease, StoreError> {
            let mut left = self.locked_for.borrow_mut();
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Locked);
            }
            Ok(StoreLease::new(()))
        }
        fn load(&self) -> Result<Sheet, StoreError> {
            Ok(sheet())
        }
        fn save(&self, sheet: &Sheet) -> Result<(), StoreError> {
            *self.saved.borrow_mut() = Some(sheet.clone());
            Ok(())
        }
    }

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            ..RetryPolicy::once()
        }
    }

    #[test]
    fn lookup_normalizes_and_keeps_first_duplicate() {
        let r = register();
        assert_eq!(r.find_row("0055-DOC-0001").unwrap(), 13);
        assert_eq!(r.find_row("0055-ER-KM-0012_reply").unwrap(), 14);
        assert!(matches!(
            r.find_row("0055-NOPE"),
            Err(RegisterError::RowNotFound { .. })
        ));
        let docs: Vec<u32> = r.documents().map(|(_, row)| row).collect();
        assert_eq!(docs, vec![13, 14]);
        assert_eq!(r.read_static(13, StaticField::NameLocal).as_deref(), Some("Pump datasheet"));
    }

    #[test]
    fn post_writes_once_and_is_idempotent() {
        let mut r = register();
        let rev = r.classify("A1").unwrap();

        let first = r.post_revision_event("0055-DOC-0001", &rev, d(2021, 2, 1), "TRM-00001").unwrap();
        assert!(first.written);
        assert_eq!(first.history.len(), 1);
        assert_eq!(r.sheet().get(13, 64), Some(&CellValue::Date(d(2021, 2, 1))));
        assert_eq!(r.sheet().text(13, 65).as_deref(), Some("TRM-00001"));
        let writes = r.write_count();

        let again = r.post_revision_event("0055-DOC-0001", &rev, d(2022, 5, 5), "TRM-99999").unwrap();
        assert!(!again.written);
        assert_eq!(again.history[0].date, d(2021, 2, 1));
        assert_eq!(again.history[0].reference.as_deref(), Some("TRM-00001"));
        assert_eq!(r.write_count(), writes);
    }

    #[test]
    fn history_reports_gaps_without_failing() {
        let mut r = register();
        let a1 = r.classify("A1").unwrap();
        r.post_revision_event("0055-DOC-0001", &a1, d(2021, 1, 10), "TRM-1").unwrap();

        let c1 = r.classify("C1").unwrap();
        let out = r.post_revision_event("0055-DOC-0001", &c1, d(2021, 3, 1), "TRM-3").unwrap();
        assert!(out.written);
        let labels: Vec<&str> = out.history.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["A1", "C1"]);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].label, "B1");
        assert_eq!(out.warnings[0].kind, WarningKind::MissingDate);
    }

    #[test]
    fn placeholder_date_is_overwritten_but_text_is_not() {
        let mut s = sheet();
        s.set(13, 132, CellValue::text("-"));
        s.set(14, 132, CellValue::text("n/a"));
        let mut r = Register::from_sheet(s, &VdrConfig::default()).unwrap();
        let u0 = r.classify("00").unwrap();

        let a = r.post_revision_event("0055-DOC-0001", &u0, d(2021, 4, 4), "TRM-4").unwrap();
        assert!(a.written);

        let b = r.post_revision_event("0055-ER.KM-0012", &u0, d(2021, 4, 4), "TRM-4").unwrap();
        assert!(!b.written);
        assert_eq!(r.sheet().text(14, 132).as_deref(), Some("n/a"));
        assert!(matches!(b.warnings[0].kind, WarningKind::NotADate { .. }));
        assert_eq!(b.history.last().unwrap().date, d(2021, 4, 4));
    }

    #[test]
    fn return_event_fills_once() {
        let mut r = register();
        let b1 = r.classify("B1").unwrap();
        let fields = ReturnFields {
            date: Some(d(2021, 6, 1)),
            reference: "0055-P2-CPC-GA1-TRM-00007".into(),
            remark: Some("2".into()),
        };
        let out = r.post_return_event("0055-DOC-0001", &b1, &fields).unwrap();
        assert!(out.written);
        // B1 @100: issued date 102, returned date 106.
        assert_eq!(r.sheet().text(13, 107).as_deref(), Some("0055-P2-CPC-GA1-TRM-00007"));
        assert_eq!(r.sheet().text(13, 108).as_deref(), Some("2"));

        let again = r
            .post_return_event(
                "0055-DOC-0001",
                &b1,
                &ReturnFields {
                    reference: "OTHER".into(),
                    ..fields
                },
            )
            .unwrap();
        assert!(!again.written);
        assert_eq!(again.existing_reference.as_deref(), Some("0055-P2-CPC-GA1-TRM-00007"));
    }

    #[test]
    fn save_retries_locked_store_then_succeeds() {
        let store = FlakyStore {
            locked_for: RefCell::new(2),
            saved: RefCell::new(None),
        };
        let mut r = Register::snapshot(&store, &VdrConfig::default()).unwrap();
        assert!(!r.is_leased());
        assert_eq!(r.save(&store, &no_wait(3)).unwrap(), SaveOutcome::Unchanged);

        let a1 = r.classify("A1").unwrap();
        r.post_revision_event("0055-DOC-0001", &a1, d(2021, 1, 1), "TRM-1").unwrap();
        assert_eq!(r.save(&store, &no_wait(3)).unwrap(), SaveOutcome::Saved { attempts: 3 });
        assert!(!r.is_dirty());
        assert!(store.saved.borrow().is_some());
    }

    #[test]
    fn open_waits_out_lock_and_saves_under_its_lease() {
        let store = FlakyStore {
            locked_for: RefCell::new(2),
            saved: RefCell::new(None),
        };
        assert_eq!(
            Register::load(&store, &VdrConfig::default()).unwrap_err(),
            RegisterError::StoreLocked { attempts: 1 }
        );
        let mut r = Register::open(&store, &VdrConfig::default(), &no_wait(3)).unwrap();
        assert!(r.is_leased());

        let a1 = r.classify("A1").unwrap();
        r.post_revision_event("0055-DOC-0001", &a1, d(2021, 1, 1), "TRM-1").unwrap();
        assert_eq!(r.save(&store, &no_wait(3)).unwrap(), SaveOutcome::Saved { attempts: 1 });
    }

    #[test]
    fn save_exhaustion_keeps_register_dirty() {
        let store = FlakyStore {
            locked_for: RefCell::new(10),
            saved: RefCell::new(None),
        };
        let mut r = register();
        let a1 = r.classify("A1").unwrap();
        r.post_revision_event("0055-DOC-0001", &a1, d(2021, 1, 1), "TRM-1").unwrap();
        assert_eq!(
            r.save(&store, &no_wait(2)).unwrap_err(),
            RegisterError::StoreLocked { attempts: 2 }
        );
        assert!(r.is_dirty());
    }
}
