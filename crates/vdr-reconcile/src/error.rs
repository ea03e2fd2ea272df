use thiserror::Error;
use vdr_register::RegisterError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("manifest of '{transmittal}' has no column for: {}", .missing.join(", "))]
    ManifestColumnsUnrecognized {
        transmittal: String,
        missing: Vec<String>,
    },

    #[error("insufficient storage: {required} bytes needed, {usable} usable ({shortfall} short)")]
    InsufficientStorage {
        required: u64,
        usable: u64,
        shortfall: u64,
    },

    #[error("no artifact for '{document}' in transmittal '{transmittal}'")]
    ArtifactMissing {
        document: String,
        transmittal: String,
    },

    #[error("artifact io on '{path}': {reason}")]
    ArtifactIo { path: String, reason: String },
}
