//! Locked register save retries
//!
//! GREEN when:
//! - a register locked for two attempts is opened on the third and saved,
//! - a register locked longer than the retry budget fails the batch with
//!   StoreLocked and the stored content is unchanged,
//! - the in-memory register keeps its pending writes after the failure,
//! - a second writer cannot load a register while the first holds it, so
//!   both writers' cells end up persisted.

use std::time::Duration;

use anyhow::Result;
use vdr_config::VdrConfig;
use vdr_reconcile::{Direction, ReconcileError, ReconciliationEngine, Transmittal};
use vdr_register::{CellValue, Register, RegisterError, RetryPolicy, SaveOutcome};
use vdr_testkit::*;

const DOC: &str = "0055-CPC-GA1-4.2-AB-0001";

fn retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

fn fixture() -> RegisterBuilder {
    RegisterBuilder::standard().document(DOC, "A1")
}

#[test]
fn scenario_lock_released_within_budget() -> Result<()> {
    let store = MemoryStore::new("phase-2", fixture().sheet()).locked_for(2);
    let catalog = MemoryCatalog::new().with("2", store.clone());
    let engine = ReconciliationEngine::new(VdrConfig::default()).with_retry(retry());

    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00600", Direction::Outgoing, "2")
        .with_document(DOC);
    let report = engine.send_transmittal(&catalog, &mut t, Some(date(2024, 5, 6)))?;

    assert!(report.saved);
    assert_eq!(store.lease_attempts(), 3);
    assert_eq!(store.saves(), 1);
    assert!(!store.is_leased());
    Ok(())
}

#[test]
fn scenario_lock_outlasts_budget() -> Result<()> {
    let original = fixture().sheet();
    let store = MemoryStore::new("phase-2", original.clone()).locked_for(10);
    let catalog = MemoryCatalog::new().with("2", store.clone());
    let engine = ReconciliationEngine::new(VdrConfig::default()).with_retry(retry());

    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00601", Direction::Outgoing, "2")
        .with_document(DOC);
    let err = engine
        .send_transmittal(&catalog, &mut t, Some(date(2024, 5, 6)))
        .unwrap_err();
    assert_eq!(
        err,
        ReconcileError::Register(RegisterError::StoreLocked { attempts: 3 })
    );
    assert_eq!(store.lease_attempts(), 3);
    assert_eq!(store.saves(), 0);
    assert_eq!(store.sheet(), original);
    Ok(())
}

#[test]
fn scenario_register_stays_dirty_until_saved() -> Result<()> {
    let store = MemoryStore::new("phase-2", fixture().sheet()).locked_for(3);
    let engine = ReconciliationEngine::new(VdrConfig::default());
    let mut reg = fixture().build()?;
    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00602", Direction::Outgoing, "2")
        .with_document(DOC);
    engine.post_outgoing(&mut reg, &mut t, Some(date(2024, 5, 7)))?;
    assert!(reg.is_dirty());

    assert!(reg.save(&store, &retry()).is_err());
    assert!(reg.is_dirty());

    // Lock gone: the same in-memory writes go through.
    assert_eq!(reg.save(&store, &retry())?, SaveOutcome::Saved { attempts: 1 });
    assert!(!reg.is_dirty());
    assert_eq!(&store.sheet(), reg.sheet());
    Ok(())
}

#[test]
fn scenario_second_writer_waits_for_first() -> Result<()> {
    const OTHER: &str = "0055-CPC-GA1-4.2-AB-0002";
    let fixture = fixture().document(OTHER, "A1");
    let store = MemoryStore::new("phase-2", fixture.sheet());
    let cfg = VdrConfig::default();
    let engine = ReconciliationEngine::new(cfg.clone());

    let mut first = Register::load(&store, &cfg)?;
    assert_eq!(
        Register::load(&store, &cfg).unwrap_err(),
        RegisterError::StoreLocked { attempts: 1 }
    );

    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00603", Direction::Outgoing, "2")
        .with_document(DOC);
    engine.post_outgoing(&mut first, &mut t, Some(date(2024, 5, 8)))?;
    first.save(&store, &RetryPolicy::once())?;
    drop(first);

    let mut second = Register::load(&store, &cfg)?;
    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00604", Direction::Outgoing, "2")
        .with_document(OTHER);
    engine.post_outgoing(&mut second, &mut t, Some(date(2024, 5, 9)))?;
    second.save(&store, &RetryPolicy::once())?;
    drop(second);

    let saved = store.sheet();
    let col = fixture.issue_column("A1").unwrap();
    assert_eq!(
        saved.get(fixture.row_of(DOC).unwrap(), col),
        Some(&CellValue::Date(date(2024, 5, 8)))
    );
    assert_eq!(
        saved.get(fixture.row_of(OTHER).unwrap(), col),
        Some(&CellValue::Date(date(2024, 5, 9)))
    );
    assert_eq!(store.saves(), 2);
    Ok(())
}

#[test]
fn scenario_register_file_lease_spans_load_to_save() -> Result<()> {
    const OTHER: &str = "0055-CPC-GA1-4.2-AB-0002";
    let fixture = fixture().document(OTHER, "A1");
    let dir = scratch()?;
    let path = write_register_file(dir.path(), "2", &fixture.sheet())?;
    let file = vdr_artifacts::JsonRegisterFile::new(&path);
    let cfg = VdrConfig::default();
    let engine = ReconciliationEngine::new(cfg.clone());

    let mut first = Register::load(&file, &cfg)?;
    let second = vdr_artifacts::JsonRegisterFile::new(&path);
    assert_eq!(
        Register::load(&second, &cfg).unwrap_err(),
        RegisterError::StoreLocked { attempts: 1 }
    );

    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00605", Direction::Outgoing, "2")
        .with_document(DOC);
    engine.post_outgoing(&mut first, &mut t, Some(date(2024, 5, 10)))?;
    first.save(&file, &RetryPolicy::once())?;
    drop(first);

    let mut later = Register::load(&second, &cfg)?;
    let mut t = Transmittal::new("0055-P2-GA1-CPC-TRM-00606", Direction::Outgoing, "2")
        .with_document(OTHER);
    engine.post_outgoing(&mut later, &mut t, Some(date(2024, 5, 11)))?;
    later.save(&second, &RetryPolicy::once())?;
    drop(later);

    let saved = vdr_register::RegisterStore::load(&file)?;
    let col = fixture.issue_column("A1").unwrap();
    assert_eq!(
        saved.get(fixture.row_of(DOC).unwrap(), col),
        Some(&CellValue::Date(date(2024, 5, 10)))
    );
    assert_eq!(
        saved.get(fixture.row_of(OTHER).unwrap(), col),
        Some(&CellValue::Date(date(2024, 5, 11)))
    );
    Ok(())
}
