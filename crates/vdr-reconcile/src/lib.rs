//! vdr-reconcile
//!
//! Transmittal reconciliation against a vendor document register.
//!
//! - Outgoing transmittals post issued dates and references.
//! - Incoming manifests are resolved to document names, then their returned
//!   dates and remark codes are filled into the register.
//! - Document status is derived from the Use scheme's returned blocks.
//! - Printing accepted documents is gated on free space at the target.
//!
//! Sequential and blocking. File access goes through the store and artifact
//! traits.

mod engine;
mod error;
mod gate;
mod manifest;
mod status;
mod types;

pub use engine::ReconciliationEngine;
pub use error::ReconcileError;
pub use gate::{
    classify_page, ArtifactStore, GateDecision, PdfMetadata, PrintBudgetGate, PrintEntry,
    PrintReport, OTHER_FORMAT,
};
pub use manifest::{parse_manifest, strip_extension, ManifestColumns};
pub use status::{DocumentStatus, Frontier, Status, StatusComputer, StatusMap, ACCEPTED_REMARK};
pub use types::*;
