//! Transmittal posting against a register.
//!
//! Per-document problems land in the [`BatchReport`] and never abort the
//! batch. Structural problems (missing column groups, missing register,
//! unreadable manifest) abort the operation for that transmittal only.

use chrono::{Local, NaiveDate};
use tracing::{error, info, warn};
use vdr_config::VdrConfig;
use vdr_register::{
    DataWarning, KeyNormalizer, Register, RegisterCatalog, RegisterError, RetryPolicy,
    ReturnFields, SaveOutcome, Sheet, StaticField,
};

use crate::error::ReconcileError;
use crate::manifest::{parse_manifest, strip_extension};
use crate::types::{BatchReport, DocumentEntry, DocumentRecord, Transmittal};

pub struct ReconciliationEngine {
    cfg: VdrConfig,
    normalizer: KeyNormalizer,
    retry: RetryPolicy,
}

/// Per-document failures are reported and skipped; anything else stops the
/// operation.
fn is_per_document(e: &RegisterError) -> bool {
    matches!(
        e,
        RegisterError::RowNotFound { .. } | RegisterError::UnknownRevision { .. }
    )
}

impl ReconciliationEngine {
    pub fn new(cfg: VdrConfig) -> Self {
        let retry = RetryPolicy::from(&cfg.store);
        Self {
            normalizer: KeyNormalizer::new(&cfg.keys),
            cfg,
            retry,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &VdrConfig {
        &self.cfg
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Post every document of an outgoing transmittal into `register`.
    ///
    /// The send date is `send_date`, else the transmittal's own date, else
    /// today.
    pub fn post_outgoing(
        &self,
        register: &mut Register,
        transmittal: &mut Transmittal,
        send_date: Option<NaiveDate>,
    ) -> Result<BatchReport, ReconcileError> {
        let date = send_date
            .or(transmittal.date)
            .unwrap_or_else(|| Local::now().date_naive());
        let mut report = BatchReport::new(transmittal);
        info!(
            batch = %report.batch_id,
            transmittal = %transmittal.name,
            documents = transmittal.documents.len(),
            %date,
            "posting outgoing transmittal"
        );

        for name in transmittal.document_names() {
            match self.post_one_outgoing(register, &transmittal.name, &name, date) {
                Ok((record, written, warnings)) => {
                    if written {
                        report.written.push(name.clone());
                    } else {
                        report.unchanged.push(name.clone());
                    }
                    report.warnings.extend(warnings);
                    transmittal
                        .documents
                        .insert(name, DocumentEntry::Outgoing(record));
                }
                Err(e) if is_per_document(&e) => {
                    error!(batch = %report.batch_id, document = %name, error = %e, "document skipped");
                    report.skip(name, &e);
                }
                Err(e) => {
                    error!(batch = %report.batch_id, transmittal = %transmittal.name, error = %e, "outgoing posting aborted");
                    return Err(e.into());
                }
            }
        }

        info!(
            batch = %report.batch_id,
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped.len(),
            warnings = report.warnings.len(),
            "outgoing transmittal posted"
        );
        Ok(report)
    }

    fn post_one_outgoing(
        &self,
        register: &mut Register,
        transmittal: &str,
        name: &str,
        date: NaiveDate,
    ) -> Result<(DocumentRecord, bool, Vec<DataWarning>), RegisterError> {
        let row = register.find_row(name)?;
        let raw_revision = register
            .read_static(row, StaticField::Revision)
            .unwrap_or_default();
        let rev = register.classify(&raw_revision)?;
        let outcome = register.post_revision_event(name, &rev, date, transmittal)?;

        let record = DocumentRecord {
            key: self.normalizer.normalize(name),
            row,
            doc_number: register.read_static(row, StaticField::DocNumber),
            issue_purpose: register.read_static(row, StaticField::IssuePurpose),
            class: register.read_static(row, StaticField::Class),
            name_local: register.read_static(row, StaticField::NameLocal),
            name_foreign: register.read_static(row, StaticField::NameForeign),
            current_revision: rev.label,
            scheme: rev.scheme,
            discipline_code: register.read_static(row, StaticField::DisciplineCode),
            type_code: register.read_static(row, StaticField::TypeCode),
            history: outcome.history,
        };
        Ok((record, outcome.written, outcome.warnings))
    }

    /// Open the phase register, post, and save once. The register stays
    /// leased from load until the save returns.
    pub fn send_transmittal(
        &self,
        catalog: &dyn RegisterCatalog,
        transmittal: &mut Transmittal,
        send_date: Option<NaiveDate>,
    ) -> Result<BatchReport, ReconcileError> {
        let store = catalog
            .open(&transmittal.phase)
            .map_err(RegisterError::from)?
            .ok_or_else(|| RegisterError::RegisterNotFound {
                phase: transmittal.phase.clone(),
            })?;
        let mut register = Register::open(store.as_ref(), &self.cfg, &self.retry)?;
        let mut report = self.post_outgoing(&mut register, transmittal, send_date)?;
        report.saved = matches!(
            register.save(store.as_ref(), &self.retry)?,
            SaveOutcome::Saved { .. }
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// Resolve a manifest file name against the transmittal's own names.
    ///
    /// Both sides are cut at the external-review marker; a candidate whose
    /// prefix matches wins. Otherwise the name is kept as given.
    pub fn clarify_name<'a, I>(&self, candidates: I, name: &str) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(prefix) = self.normalizer.prefix_before_marker(name) else {
            return name.to_string();
        };
        candidates
            .into_iter()
            .find(|c| self.normalizer.prefix_before_marker(c) == Some(prefix))
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }

    /// Read the manifest into the transmittal's documents map.
    ///
    /// Returns the number of manifest rows taken in.
    pub fn post_incoming(
        &self,
        transmittal: &mut Transmittal,
        manifest: &Sheet,
    ) -> Result<usize, ReconcileError> {
        let snapshots = parse_manifest(
            manifest,
            &self.cfg.manifest,
            &transmittal.name,
            &transmittal.phase,
        )?;
        if transmittal.date.is_none() {
            transmittal.date = snapshots.iter().find_map(|s| s.transmittal_date);
        }

        let candidates = transmittal.document_names();
        let count = snapshots.len();
        for snapshot in snapshots {
            let stem = strip_extension(&snapshot.filename);
            let raw = if stem.is_empty() {
                snapshot.doc_number.as_str()
            } else {
                stem
            };
            let name = self.clarify_name(candidates.iter().map(String::as_str), raw);
            if transmittal.documents.contains_key(&name) {
                info!(transmittal = %transmittal.name, document = %name, "manifest row matched");
            } else {
                warn!(transmittal = %transmittal.name, document = %name, "manifest row has no matching file");
            }
            transmittal
                .documents
                .insert(name, DocumentEntry::Incoming(snapshot));
        }
        Ok(count)
    }

    /// Write returned dates, references and remark codes into `register`.
    pub fn fill_fields(
        &self,
        register: &mut Register,
        transmittal: &Transmittal,
    ) -> Result<BatchReport, ReconcileError> {
        let mut report = BatchReport::new(transmittal);
        info!(batch = %report.batch_id, transmittal = %transmittal.name, "filling returned fields");

        for (name, snapshot) in transmittal.incoming() {
            // The clarified file name is the primary key; the manifest's
            // document number is the fallback.
            let key = if register.contains(name) {
                name.as_str()
            } else {
                snapshot.doc_number.as_str()
            };
            let fields = ReturnFields {
                date: snapshot.transmittal_date.or(transmittal.date),
                reference: transmittal.name.clone(),
                remark: snapshot.remark_code.clone(),
            };
            let result = register
                .classify(&snapshot.revision)
                .and_then(|rev| register.post_return_event(key, &rev, &fields));
            match result {
                Ok(outcome) if outcome.written => report.written.push(name.clone()),
                Ok(_) => report.unchanged.push(name.clone()),
                Err(e) if is_per_document(&e) => {
                    error!(batch = %report.batch_id, document = %name, error = %e, "document skipped");
                    report.skip(name.clone(), &e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            batch = %report.batch_id,
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped.len(),
            "returned fields filled"
        );
        Ok(report)
    }

    /// Manifest intake, field fill against the phase register, one save
    /// under the same lease.
    pub fn receive_transmittal(
        &self,
        catalog: &dyn RegisterCatalog,
        transmittal: &mut Transmittal,
        manifest: &Sheet,
    ) -> Result<BatchReport, ReconcileError> {
        self.post_incoming(transmittal, manifest)?;

        let Some(store) = catalog.open(&transmittal.phase).map_err(RegisterError::from)? else {
            error!(transmittal = %transmittal.name, phase = %transmittal.phase, "no register for phase, field fill aborted");
            return Err(RegisterError::RegisterNotFound {
                phase: transmittal.phase.clone(),
            }
            .into());
        };
        let mut register = Register::open(store.as_ref(), &self.cfg, &self.retry)?;
        let mut report = self.fill_fields(&mut register, transmittal)?;
        report.saved = matches!(
            register.save(store.as_ref(), &self.retry)?,
            SaveOutcome::Saved { .. }
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use vdr_register::CellValue;

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(VdrConfig::default())
    }

    fn register() -> Register {
        let mut s = Sheet::new("VDR");
        s.set(9, 62, CellValue::text("issue for rev.A1"));
        s.set(9, 100, CellValue::text("issue for rev.B1"));
        s.set(9, 110, CellValue::text("issue for rev.00"));
        for (row, key, rev) in [
            (13, "0055-CPC-GA1-4.2-AB-0001", "A1"),
            (14, "0055-CPC-GA1-4.2-AB-0002", "00"),
            (15, "0055-CPC-GA1-4.2-AB-0003", "Z1"),
        ] {
            s.set(row, 41, CellValue::text(key));
            s.set(row, 54, CellValue::text(rev));
            s.set(row, 22, CellValue::text("2"));
        }
        Register::from_sheet(s, &VdrConfig::default()).unwrap()
    }

    #[test]
    fn outgoing_skips_per_document_failures() {
        let mut reg = register();
        let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00010", Direction::Outgoing, "2")
            .with_document("0055-CPC-GA1-4.2-AB-0001")
            .with_document("0055-CPC-GA1-4.2-AB-0002")
            .with_document("0055-CPC-GA1-4.2-AB-0003")
            .with_document("0055-CPC-GA1-4.2-AB-9999");
        let date = NaiveDate::from_ymd_opt(2021, 9, 1);

        let report = engine().post_outgoing(&mut reg, &mut t, date).unwrap();
        assert_eq!(report.written.len(), 2);
        assert_eq!(report.skipped.len(), 2);
        assert!(reg.is_dirty());

        match &t.documents["0055-CPC-GA1-4.2-AB-0002"] {
            DocumentEntry::Outgoing(rec) => {
                assert_eq!(rec.current_revision, "00");
                assert_eq!(rec.class.as_deref(), Some("2"));
                assert_eq!(rec.history.len(), 1);
            }
            other => panic!("unexpected entry {other:?}"),
        }
        assert_eq!(t.documents["0055-CPC-GA1-4.2-AB-9999"], DocumentEntry::Unresolved);
    }

    #[test]
    fn clarify_prefers_candidate_with_same_prefix() {
        let e = engine();
        let cands = ["0055-ABC-ER-0001_01_EN"];
        assert_eq!(
            e.clarify_name(cands, "0055-ABC-ER-0001_02_RU.pdf"),
            "0055-ABC-ER-0001_01_EN"
        );
        assert_eq!(e.clarify_name(cands, "0055-XYZ-ER-0001_02_RU"), "0055-XYZ-ER-0001_02_RU");
        assert_eq!(e.clarify_name(cands, "0055-ABC-0001"), "0055-ABC-0001");
    }

    #[test]
    fn fill_writes_remarks_and_falls_back_to_doc_number() {
        let mut reg = register();
        let mut manifest = Sheet::new("T");
        manifest.set(1, 9, CellValue::text("10.10.2021"));
        for (col, label) in [(2, "project doc number"), (3, "rev"), (4, "electronic filename"), (5, "comments")] {
            manifest.set(7, col, CellValue::text(label));
        }
        manifest.set(8, 2, CellValue::text("0055-CPC-GA1-4.2-AB-0002"));
        manifest.set(8, 3, CellValue::text("00"));
        manifest.set(8, 4, CellValue::text("renamed-by-vendor.pdf"));
        manifest.set(8, 5, CellValue::text("1"));

        let mut t = Transmittal::new("0055-P2-CPC-GA1-TRM-00020", Direction::Incoming, "2");
        let e = engine();
        assert_eq!(e.post_incoming(&mut t, &manifest).unwrap(), 1);
        assert_eq!(t.date, NaiveDate::from_ymd_opt(2021, 10, 10));

        let report = e.fill_fields(&mut reg, &t).unwrap();
        assert_eq!(report.written, vec!["renamed-by-vendor".to_string()]);
        // 00 @110: issued date 112, returned date 116, reference 117, remark 118.
        assert_eq!(reg.sheet().text(14, 117).as_deref(), Some("0055-P2-CPC-GA1-TRM-00020"));
        assert_eq!(reg.sheet().text(14, 118).as_deref(), Some("1"));
    }
}
