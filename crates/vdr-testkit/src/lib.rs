//! vdr-testkit
//!
//! Fixtures for scenario tests:
//! - register and manifest sheets built to the default layout,
//! - in-memory register store/catalog with lock simulation,
//! - fake artifact store and PDF metadata for the print gate,
//! - JSON fixture loading for sheets kept on disk.

mod builders;
mod fakes;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub use builders::{
    date, ManifestBuilder, RegisterBuilder, MANIFEST_DOC_NUMBER_COL, MANIFEST_FILENAME_COL,
    MANIFEST_REMARK_COL, MANIFEST_REVISION_COL,
};
pub use fakes::{FakeArtifacts, FakePdf, MemoryCatalog, MemoryStore};

use vdr_register::Sheet;

pub const MIB: u64 = 1024 * 1024;

pub fn load_sheet_json(path: &Path) -> Result<Sheet> {
    let s = fs::read_to_string(path).with_context(|| format!("read sheet: {}", path.display()))?;
    let sheet: Sheet = serde_json::from_str(&s).context("parse sheet json")?;
    Ok(sheet)
}

/// Write `sheet` as a register file under `dir`, named for `phase`.
pub fn write_register_file(dir: &Path, phase: &str, sheet: &Sheet) -> Result<std::path::PathBuf> {
    let path = dir.join(format!("0055-CPC-GA1-4.{phase} VDR.json"));
    vdr_artifacts::JsonRegisterFile::create(&path, sheet)
        .with_context(|| format!("write register {}", path.display()))?;
    Ok(path)
}

/// Scratch directory kept alive for the length of a scenario.
pub fn scratch() -> Result<tempfile::TempDir> {
    tempfile::tempdir().context("create scratch dir")
}
