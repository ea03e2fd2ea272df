//! Outgoing posting is idempotent
//!
//! GREEN when:
//! - the first send writes issued date and reference for every document
//!   and saves once,
//! - a second send of the same transmittal writes nothing, reports every
//!   document unchanged, and does not save,
//! - the persisted register is identical after both sends.

use anyhow::Result;
use vdr_config::VdrConfig;
use vdr_reconcile::{Direction, DocumentEntry, ReconciliationEngine, Transmittal};
use vdr_register::{CellValue, RetryPolicy, Scheme};
use vdr_testkit::*;

const DOC_A: &str = "0055-CPC-GA1-4.2-AB-0001";
const DOC_B: &str = "0055-CPC-GA1-4.2-AB-0002";
const TRM: &str = "0055-P2-GA1-CPC-TRM-00572";

fn transmittal() -> Transmittal {
    Transmittal::new(TRM, Direction::Outgoing, "2")
        .with_document(DOC_A)
        .with_document(DOC_B)
}

#[test]
fn scenario_outgoing_post_is_idempotent() -> Result<()> {
    let fixture = RegisterBuilder::standard()
        .document(DOC_A, "B1")
        .document(DOC_B, "01")
        .issued(DOC_A, "A1", date(2024, 1, 10), "0055-P2-GA1-CPC-TRM-00100");
    let store = MemoryStore::new("phase-2", fixture.sheet());
    let catalog = MemoryCatalog::new().with("2", store.clone());
    let engine = ReconciliationEngine::new(VdrConfig::default()).with_retry(RetryPolicy::once());
    let on = date(2024, 3, 15);

    let mut first = transmittal();
    let report = engine.send_transmittal(&catalog, &mut first, Some(on))?;
    assert_eq!(report.written, vec![DOC_A.to_string(), DOC_B.to_string()]);
    assert!(report.saved);
    assert_eq!(store.saves(), 1);

    let after_first = store.sheet();
    let row_a = fixture.row_of(DOC_A).unwrap();
    let b1 = fixture.issue_column("B1").unwrap();
    assert_eq!(after_first.get(row_a, b1), Some(&CellValue::Date(on)));
    assert_eq!(after_first.text(row_a, b1 + 1).as_deref(), Some(TRM));

    // The outgoing record carries the revision history up to B1.
    let DocumentEntry::Outgoing(record) = &first.documents[DOC_A] else {
        panic!("expected outgoing record for {DOC_A}");
    };
    assert_eq!(record.scheme, Scheme::Review);
    assert_eq!(record.current_revision, "B1");
    let labels: Vec<&str> = record.history.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["A1", "B1"]);

    let mut second = transmittal();
    let report = engine.send_transmittal(&catalog, &mut second, Some(date(2024, 3, 20)))?;
    assert!(report.written.is_empty());
    assert_eq!(report.unchanged.len(), 2);
    assert!(!report.saved);
    assert_eq!(store.saves(), 1);
    assert_eq!(store.sheet(), after_first);

    Ok(())
}
