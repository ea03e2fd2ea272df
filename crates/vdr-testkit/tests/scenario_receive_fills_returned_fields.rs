//! Incoming transmittal fills returned fields
//!
//! GREEN when:
//! - a manifest file name differing only after the external-review marker
//!   resolves to the transmittal's own document name,
//! - returned date, reference and remark land in the group of the
//!   manifest revision, using the manifest date,
//! - receiving the same transmittal again leaves the register untouched,
//! - a phase without a register aborts the fill with RegisterNotFound
//!   after the manifest was taken in.

use anyhow::Result;
use vdr_config::VdrConfig;
use vdr_reconcile::{
    Direction, DocumentEntry, ReconcileError, ReconciliationEngine, Status, StatusComputer,
    Transmittal,
};
use vdr_register::{CellValue, DocumentKey, RegisterError, RetryPolicy};
use vdr_testkit::*;

const ER_DOC: &str = "0055-ABC.ER-0001";
const ER_FILE: &str = "0055-ABC-ER-0001_01_EN";
const PLAIN_DOC: &str = "0055-CPC-GA1-4.2-AB-0002";
const RETURNED: &str = "0055-P2-CPC-GA1-TRM-00311";

fn transmittal() -> Transmittal {
    Transmittal::new(RETURNED, Direction::Incoming, "2")
        .with_artifact(ER_FILE, format!("/in/{RETURNED}/{ER_FILE}.pdf"))
        .with_artifact(PLAIN_DOC, format!("/in/{RETURNED}/{PLAIN_DOC}.pdf"))
}

fn manifest() -> ManifestBuilder {
    ManifestBuilder::new()
        .dated(date(2024, 2, 1))
        .row("0055-ABC-ER-0001", "0055-ABC-ER-0001_02_RU.pdf", "A1", Some("2"))
        .row(PLAIN_DOC, &format!("{PLAIN_DOC}.pdf"), "00", Some("1"))
}

#[test]
fn scenario_name_clarification_prefers_transmittal_name() {
    let engine = ReconciliationEngine::new(VdrConfig::default());
    let candidates = [ER_FILE];
    assert_eq!(
        engine.clarify_name(candidates.iter().copied(), "0055-ABC-ER-0001_02_RU"),
        ER_FILE
    );
    assert_eq!(
        engine.clarify_name(candidates.iter().copied(), "0055-XYZ-ER-0001_02_RU"),
        "0055-XYZ-ER-0001_02_RU"
    );
}

#[test]
fn scenario_receive_fills_returned_fields() -> Result<()> {
    let fixture = RegisterBuilder::standard()
        .document(ER_DOC, "A1")
        .document(PLAIN_DOC, "00")
        .issued(ER_DOC, "A1", date(2024, 1, 10), "0055-P2-GA1-CPC-TRM-00100")
        .issued(PLAIN_DOC, "00", date(2024, 1, 10), "0055-P2-GA1-CPC-TRM-00100");
    let store = MemoryStore::new("phase-2", fixture.sheet());
    let catalog = MemoryCatalog::new().with("2", store.clone());
    let engine = ReconciliationEngine::new(VdrConfig::default()).with_retry(RetryPolicy::once());

    let mut t = transmittal();
    let report = engine.receive_transmittal(&catalog, &mut t, &manifest().build())?;
    assert_eq!(report.written.len(), 2, "{report:?}");
    assert!(report.saved);
    assert_eq!(t.date, Some(date(2024, 2, 1)));

    // The manifest row was folded onto the transmittal's own name.
    assert_eq!(t.documents.len(), 2);
    let DocumentEntry::Incoming(snap) = &t.documents[ER_FILE] else {
        panic!("expected incoming snapshot for {ER_FILE}");
    };
    assert_eq!(snap.remark_code.as_deref(), Some("2"));

    let saved = store.sheet();
    let er_row = fixture.row_of(ER_DOC).unwrap();
    let a1_ret = fixture.return_column("A1").unwrap();
    assert_eq!(saved.get(er_row, a1_ret), Some(&CellValue::Date(date(2024, 2, 1))));
    assert_eq!(saved.text(er_row, a1_ret + 1).as_deref(), Some(RETURNED));
    assert_eq!(saved.text(er_row, a1_ret + 2).as_deref(), Some("2"));

    let plain_row = fixture.row_of(PLAIN_DOC).unwrap();
    let u00_ret = fixture.return_column("00").unwrap();
    assert_eq!(saved.text(plain_row, u00_ret + 1).as_deref(), Some(RETURNED));
    assert_eq!(saved.text(plain_row, u00_ret + 2).as_deref(), Some("1"));

    let reg = vdr_register::Register::from_sheet(saved.clone(), &VdrConfig::default())?;
    let statuses = StatusComputer.scan(&reg)?;
    assert_eq!(statuses[&DocumentKey::new(PLAIN_DOC)].status, Status::Accepted);
    assert_eq!(statuses[&DocumentKey::new(ER_DOC)].status, Status::NeverReturned);

    let mut again = transmittal();
    let report = engine.receive_transmittal(&catalog, &mut again, &manifest().build())?;
    assert!(report.written.is_empty());
    assert_eq!(report.unchanged.len(), 2);
    assert!(!report.saved);
    assert_eq!(store.sheet(), saved);

    Ok(())
}

#[test]
fn scenario_receive_without_register_aborts_fill() {
    let engine = ReconciliationEngine::new(VdrConfig::default());
    let catalog = MemoryCatalog::new();
    let mut t = transmittal();

    let err = engine
        .receive_transmittal(&catalog, &mut t, &manifest().build())
        .unwrap_err();
    assert_eq!(
        err,
        ReconcileError::Register(RegisterError::RegisterNotFound { phase: "2".into() })
    );
    assert_eq!(t.incoming().count(), 2);
}

#[test]
fn scenario_manifest_from_csv_matches_built_sheet() -> Result<()> {
    let dir = scratch()?;
    let path = dir.path().join(format!("{RETURNED}.csv"));
    manifest().write_csv(&path)?;

    let sheet = vdr_artifacts::read_manifest_csv(&path)?;
    let engine = ReconciliationEngine::new(VdrConfig::default());
    let mut t = transmittal();
    assert_eq!(engine.post_incoming(&mut t, &sheet)?, 2);
    assert_eq!(t.date, Some(date(2024, 2, 1)));
    assert!(matches!(t.documents[ER_FILE], DocumentEntry::Incoming(_)));
    Ok(())
}
