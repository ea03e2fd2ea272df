//! Storage seam for registers.
//!
//! The register itself is storage-agnostic; a store hands out the sheet
//! and takes it back. Writers hold a [`StoreLease`] from before the load
//! until the save returns. A store already leased elsewhere answers
//! [`StoreError::Locked`], which [`crate::Register::open`] and
//! [`crate::Register::save`] retry.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use vdr_config::StoreSettings;

use crate::error::StoreError;
use crate::sheet::Sheet;

/// Exclusive hold on a store; released on drop.
pub struct StoreLease {
    _guard: Box<dyn Any>,
}

impl StoreLease {
    pub fn new(guard: impl Any) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for StoreLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreLease")
    }
}

pub trait RegisterStore {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Take exclusive access without waiting. `Locked` while another
    /// lease on the same register is alive.
    fn lease(&self) -> Result<StoreLease, StoreError>;

    fn load(&self) -> Result<Sheet, StoreError>;

    /// Write the sheet back. The caller holds a lease from this store.
    fn save(&self, sheet: &Sheet) -> Result<(), StoreError>;
}

/// Finds the register responsible for a transmittal phase.
pub trait RegisterCatalog {
    fn open(&self, phase: &str) -> Result<Option<Box<dyn RegisterStore>>, StoreError>;
}

/// Bounded exponential backoff for saving a locked register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `n + 1`, given that attempt `n` (1-based) failed.
    pub fn backoff_after(&self, n: u32) -> Duration {
        let factor = 1u32.checked_shl(n.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl From<&StoreSettings> for RetryPolicy {
    fn from(s: &StoreSettings) -> Self {
        Self {
            attempts: s.save_attempts.max(1),
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}
