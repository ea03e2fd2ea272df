//! Registers stored as JSON files.
//!
//! A lease is a non-blocking exclusive lock on `<file>.lock`, held by the
//! writer from load until its save returns. Saves write through a temp file
//! in the same directory followed by a rename, so a reader never sees a
//! half-written register.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};
use vdr_config::Masks;
use vdr_register::{RegisterCatalog, RegisterStore, Sheet, StoreError, StoreLease};

use crate::mask::mask_to_regex;

/// Exclusive hold on a register's lock file; released on drop.
pub struct RegisterLock {
    _file: File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRegisterFile {
    path: PathBuf,
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl JsonRegisterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Write a fresh register file.
    pub fn create(path: impl Into<PathBuf>, sheet: &Sheet) -> Result<Self, StoreError> {
        let file = Self::new(path);
        let _lease = file.lease()?;
        file.save(sheet)?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open_lock_file(&self) -> Result<File, StoreError> {
        let lock_path = self.lock_path();
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::Io(format!("open lock {}: {e}", lock_path.display())))
    }

    /// Take the register's lock without blocking.
    pub fn try_lock(&self) -> Result<RegisterLock, StoreError> {
        let file = self.open_lock_file()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(RegisterLock { _file: file }),
            Err(e) if is_contended(&e) => Err(StoreError::Locked),
            Err(e) => Err(StoreError::Io(format!(
                "lock {}: {e}",
                self.lock_path().display()
            ))),
        }
    }

    fn write_atomic(&self, payload: &[u8]) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| StoreError::Io(format!("temp file in {}: {e}", parent.display())))?;
        tmp.write_all(payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Io(format!("persist {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl RegisterStore for JsonRegisterFile {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn lease(&self) -> Result<StoreLease, StoreError> {
        Ok(StoreLease::new(self.try_lock()?))
    }

    fn load(&self) -> Result<Sheet, StoreError> {
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| StoreError::Format(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, sheet: &Sheet) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(sheet)
            .map_err(|e| StoreError::Format(format!("{}: {e}", self.path.display())))?;
        self.write_atomic(&payload)?;
        debug!(path = %self.path.display(), bytes = payload.len(), "register file written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Registers in one directory, one per phase, found by the register mask.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    dir: PathBuf,
    mask: String,
    stem: String,
}

impl DirectoryCatalog {
    pub fn new(dir: impl Into<PathBuf>, masks: &Masks) -> Self {
        Self {
            dir: dir.into(),
            mask: masks.register.clone(),
            stem: masks.register_stem().to_string(),
        }
    }

    /// Register file for `phase`, if any. Several candidates resolve to the
    /// first in name order.
    pub fn find(&self, phase: &str) -> Result<Option<PathBuf>, StoreError> {
        let re = mask_to_regex(&self.mask).map_err(|e| StoreError::Format(e.to_string()))?;
        let prefix = format!("{}{}", self.stem, phase);

        let entries = fs::read_dir(&self.dir)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", self.dir.display())))?;
        let mut found: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !re.is_match(&name) {
                continue;
            }
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            // Phase "1" must not pick up "12".
            if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            if entry.path().is_file() {
                found.push(entry.path());
            }
        }
        found.sort();
        if found.len() > 1 {
            warn!(phase, candidates = found.len(), "several registers match phase, using first");
        }
        Ok(found.into_iter().next())
    }
}

impl RegisterCatalog for DirectoryCatalog {
    fn open(&self, phase: &str) -> Result<Option<Box<dyn RegisterStore>>, StoreError> {
        Ok(self
            .find(phase)?
            .map(|p| Box::new(JsonRegisterFile::new(p)) as Box<dyn RegisterStore>))
    }
}
