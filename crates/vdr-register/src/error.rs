use thiserror::Error;

use crate::scheme::Scheme;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("document '{key}' not found in register")]
    RowNotFound { key: String },

    /// `label` is `None` when the scheme has no groups at all.
    #[error("register header has no {scheme} column group{}", .label.as_ref().map(|l| format!(" for '{l}'")).unwrap_or_default())]
    ColumnSchemeNotFound { scheme: Scheme, label: Option<String> },

    #[error("revision '{raw}' looks like a {scheme} label but is not configured")]
    UnknownRevision { raw: String, scheme: Scheme },

    #[error("register is still locked after {attempts} save attempt(s)")]
    StoreLocked { attempts: u32 },

    #[error("no register found for phase '{phase}'")]
    RegisterNotFound { phase: String },

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of the backing store, as seen through [`crate::RegisterStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("register file is locked by another process")]
    Locked,
    #[error("register io: {0}")]
    Io(String),
    #[error("register format: {0}")]
    Format(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}
