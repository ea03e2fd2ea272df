//! vdr-register
//!
//! Vendor document register model.
//!
//! - The register is a worksheet: one row per document, keyed by a fixed
//!   column, with one column group per revision label.
//! - Column groups are discovered from the header row at load time.
//! - Posting is additive: filled cells are never overwritten.
//! - Persistence goes through [`RegisterStore`]; this crate does no file IO.
//!   A register opened for writing holds the store's lease until dropped.

mod columns;
mod error;
mod key;
mod register;
mod scheme;
mod sheet;
mod store;

pub use columns::{ColumnGroup, ColumnLocator, ColumnTable, GroupField};
pub use error::{RegisterError, StoreError};
pub use key::{DocumentKey, KeyNormalizer};
pub use register::{
    DataWarning, PostOutcome, Register, ReturnFields, ReturnOutcome, RevisionEvent, SaveOutcome,
    StaticField, WarningKind,
};
pub use scheme::{Classified, RevisionSchemes, Scheme};
pub use sheet::{parse_text_date, CellValue, Sheet};
pub use store::{RegisterCatalog, RegisterStore, RetryPolicy, StoreLease};
