//! In-memory stand-ins for the register store and the print collaborators.
//!
//! Deterministic, no disk or clock involved. Leases, saves and copies are recorded
//! so scenarios can assert on what would have been persisted.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use vdr_reconcile::{ArtifactStore, PdfMetadata};
use vdr_register::{RegisterCatalog, RegisterStore, Sheet, StoreError, StoreLease};

struct StoreState {
    name: String,
    sheet: RefCell<Sheet>,
    /// Lease requests still to be refused with `Locked`.
    locked_leases: Cell<u32>,
    leased: Cell<bool>,
    lease_attempts: Cell<u32>,
    saves: Cell<u32>,
}

/// Clears the store's lease flag on drop.
struct MemoryLease {
    state: Rc<StoreState>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.state.leased.set(false);
    }
}

/// Shared handle; clones see the same register.
#[derive(Clone)]
pub struct MemoryStore {
    state: Rc<StoreState>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, sheet: Sheet) -> Self {
        Self {
            state: Rc::new(StoreState {
                name: name.into(),
                sheet: RefCell::new(sheet),
                locked_leases: Cell::new(0),
                leased: Cell::new(false),
                lease_attempts: Cell::new(0),
                saves: Cell::new(0),
            }),
        }
    }

    /// Refuse the next `n` lease requests as if another user held the file.
    pub fn locked_for(self, n: u32) -> Self {
        self.state.locked_leases.set(n);
        self
    }

    /// Current persisted content.
    pub fn sheet(&self) -> Sheet {
        self.state.sheet.borrow().clone()
    }

    pub fn lease_attempts(&self) -> u32 {
        self.state.lease_attempts.get()
    }

    pub fn is_leased(&self) -> bool {
        self.state.leased.get()
    }

    /// Successful saves.
    pub fn saves(&self) -> u32 {
        self.state.saves.get()
    }
}

impl RegisterStore for MemoryStore {
    fn describe(&self) -> String {
        format!("memory:{}", self.state.name)
    }

    fn lease(&self) -> Result<StoreLease, StoreError> {
        let s = &self.state;
        s.lease_attempts.set(s.lease_attempts.get() + 1);
        if s.locked_leases.get() > 0 {
            s.locked_leases.set(s.locked_leases.get() - 1);
            return Err(StoreError::Locked);
        }
        if s.leased.get() {
            return Err(StoreError::Locked);
        }
        s.leased.set(true);
        Ok(StoreLease::new(MemoryLease {
            state: Rc::clone(&self.state),
        }))
    }

    fn load(&self) -> Result<Sheet, StoreError> {
        Ok(self.sheet())
    }

    fn save(&self, sheet: &Sheet) -> Result<(), StoreError> {
        let s = &self.state;
        *s.sheet.borrow_mut() = sheet.clone();
        s.saves.set(s.saves.get() + 1);
        Ok(())
    }
}

/// Registers by phase.
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    stores: BTreeMap<String, MemoryStore>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, phase: &str, store: MemoryStore) -> Self {
        self.stores.insert(phase.to_string(), store);
        self
    }

    pub fn store(&self, phase: &str) -> Option<&MemoryStore> {
        self.stores.get(phase)
    }
}

impl RegisterCatalog for MemoryCatalog {
    fn open(&self, phase: &str) -> Result<Option<Box<dyn RegisterStore>>, StoreError> {
        Ok(self
            .stores
            .get(phase)
            .map(|s| Box::new(s.clone()) as Box<dyn RegisterStore>))
    }
}

// ---------------------------------------------------------------------------
// Print collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeArtifacts {
    sizes: BTreeMap<PathBuf, u64>,
    /// `None` makes free-space queries fail.
    free: Option<u64>,
    copied: RefCell<Vec<PathBuf>>,
}

impl FakeArtifacts {
    pub fn new(free: u64) -> Self {
        Self {
            free: Some(free),
            ..Self::default()
        }
    }

    /// A target whose free space cannot be read.
    pub fn space_unknown() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: impl Into<PathBuf>, bytes: u64) -> Self {
        self.sizes.insert(path.into(), bytes);
        self
    }

    /// Sources copied so far, in copy order.
    pub fn copied(&self) -> Vec<PathBuf> {
        self.copied.borrow().clone()
    }
}

fn not_found(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

impl ArtifactStore for FakeArtifacts {
    fn size_of(&self, path: &Path) -> std::io::Result<u64> {
        self.sizes.get(path).copied().ok_or_else(|| not_found(path))
    }

    fn available_space(&self, target: &Path) -> std::io::Result<u64> {
        self.free.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("statvfs {} denied", target.display()),
            )
        })
    }

    fn copy_into(&self, source: &Path, target_dir: &Path) -> std::io::Result<PathBuf> {
        let name = source.file_name().ok_or_else(|| not_found(source))?;
        self.copied.borrow_mut().push(source.to_path_buf());
        Ok(target_dir.join(name))
    }
}

/// Page sizes (points) per file.
#[derive(Default)]
pub struct FakePdf {
    pages: BTreeMap<PathBuf, Vec<(f64, f64)>>,
}

impl FakePdf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(mut self, path: impl Into<PathBuf>, sizes: Vec<(f64, f64)>) -> Self {
        self.pages.insert(path.into(), sizes);
        self
    }
}

impl PdfMetadata for FakePdf {
    fn page_sizes(&self, path: &Path) -> Result<Vec<(f64, f64)>, String> {
        self.pages
            .get(path)
            .cloned()
            .ok_or_else(|| format!("{} unreadable", path.display()))
    }
}
