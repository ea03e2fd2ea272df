//! Outgoing transmittal straight from disk
//!
//! GREEN when:
//! - the transmittal folder is found by mask and its name is cleaned,
//! - only document PDFs are picked up (CRS sheets and covers are not),
//! - the phase register is resolved from the documents' phase,
//! - posting writes issued date and reference and the file on disk holds
//!   them after save,
//! - a held register lock makes the save fail with StoreLocked and leaves
//!   the file untouched.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use vdr_artifacts::*;
use vdr_config::VdrConfig;
use vdr_reconcile::{Direction, ReconcileError, ReconciliationEngine};
use vdr_register::{CellValue, RegisterError, RegisterStore, RetryPolicy, Sheet};

const DOC_1: &str = "0055-CPC-GA1-4.2-AB-0001";
const DOC_2: &str = "0055-CPC-GA1-4.2-AB-0002";
const TRM_FOLDER: &str = "0055-P2-GA1-CPC-TRM-00572_ first issue";
const TRM: &str = "0055-P2-GA1-CPC-TRM-00572";

fn register_sheet() -> Sheet {
    let mut s = Sheet::new("VDR");
    s.set(9, 62, CellValue::text("Issue for review rev.A1"));
    s.set(9, 100, CellValue::text("Issue for use rev.00"));
    for (row, key) in [(13, DOC_1), (14, DOC_2)] {
        s.set(row, 41, CellValue::text(key));
        s.set(row, 54, CellValue::text("A1"));
    }
    s
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"%PDF-1.4\n%%EOF").unwrap();
}

fn layout(root: &Path) -> JsonRegisterFile {
    let trm = root.join("sent").join(TRM_FOLDER);
    touch(&trm.join(format!("{DOC_1}.pdf")));
    touch(&trm.join(format!("{DOC_2}.PDF")));
    touch(&trm.join(format!("{DOC_2}_CRS.pdf")));
    touch(&trm.join("cover.pdf"));
    fs::create_dir_all(root.join("sent").join("unrelated")).unwrap();

    let registers = root.join("registers");
    fs::create_dir_all(&registers).unwrap();
    JsonRegisterFile::create(registers.join("0055-CPC-GA1-4.2 VDR.json"), &register_sheet())
        .unwrap()
}

#[test]
fn folder_scan_resolves_name_phase_and_documents() {
    let dir = tempfile::tempdir().unwrap();
    layout(dir.path());
    let cfg = VdrConfig::default();

    let found = discover_transmittals(&dir.path().join("sent"), &cfg.masks.sent_transmittal).unwrap();
    assert_eq!(found.len(), 1);

    let t = scan_transmittal(&found[0], Direction::Outgoing, &cfg.masks).unwrap();
    assert_eq!(t.name, TRM);
    assert_eq!(t.phase, "2");
    assert_eq!(t.document_names(), vec![DOC_1.to_string(), DOC_2.to_string()]);
    assert!(t.artifacts[DOC_2].ends_with(format!("{DOC_2}.PDF")));
}

#[test]
fn subfolder_layout_takes_first_pdf_per_document_folder() {
    let dir = tempfile::tempdir().unwrap();
    let trm = dir.path().join(TRM_FOLDER);
    touch(&trm.join(DOC_1).join(format!("{DOC_1}.pdf")));
    touch(&trm.join(DOC_1).join(format!("{DOC_1}_CRS.pdf")));
    fs::create_dir_all(trm.join(DOC_2)).unwrap();
    fs::create_dir_all(trm.join("misc")).unwrap();

    let t = scan_transmittal(&trm, Direction::Outgoing, &VdrConfig::default().masks).unwrap();
    assert_eq!(t.document_names(), vec![DOC_1.to_string()]);
    assert_eq!(t.phase, "2");
}

#[test]
fn send_persists_issue_date_and_reference() {
    let dir = tempfile::tempdir().unwrap();
    let file = layout(dir.path());
    let cfg = VdrConfig::default();
    let catalog = DirectoryCatalog::new(dir.path().join("registers"), &cfg.masks);

    let mut t = scan_transmittal(
        &dir.path().join("sent").join(TRM_FOLDER),
        Direction::Outgoing,
        &cfg.masks,
    )
    .unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
    let engine = ReconciliationEngine::new(cfg);
    let report = engine.send_transmittal(&catalog, &mut t, Some(date)).unwrap();

    assert_eq!(report.written.len(), 2);
    assert!(report.skipped.is_empty());
    assert!(report.saved);

    let saved = file.load().unwrap();
    for row in [13, 14] {
        assert_eq!(saved.get(row, 64), Some(&CellValue::Date(date)));
        assert_eq!(saved.text(row, 65).as_deref(), Some(TRM));
    }
}

#[test]
fn held_lock_fails_save_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let file = layout(dir.path());
    let cfg = VdrConfig::default();
    let catalog = DirectoryCatalog::new(dir.path().join("registers"), &cfg.masks);
    let before = fs::read(file.path()).unwrap();

    let _held = file.try_lock().unwrap();
    let engine = ReconciliationEngine::new(cfg).with_retry(RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    });
    let mut t = scan_transmittal(
        &dir.path().join("sent").join(TRM_FOLDER),
        Direction::Outgoing,
        &engine.config().masks,
    )
    .unwrap();
    let err = engine
        .send_transmittal(&catalog, &mut t, NaiveDate::from_ymd_opt(2024, 3, 15))
        .unwrap_err();

    assert_eq!(
        err,
        ReconcileError::Register(RegisterError::StoreLocked { attempts: 3 })
    );
    assert_eq!(fs::read(file.path()).unwrap(), before);
}
