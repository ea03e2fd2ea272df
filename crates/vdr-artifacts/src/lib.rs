//! vdr-artifacts
//!
//! Filesystem side of the register workflow.
//!
//! - Registers are JSON files, locked on save and written atomically.
//! - Registers are found per phase in a directory by name mask.
//! - Transmittal folders are scanned for document PDFs; incoming manifests
//!   are read from CSV.
//! - Print collaborators: file sizes, free space, copy, PDF page sizes.
//! - Report files for print and status runs.

mod error;
mod local;
mod manifest_csv;
mod mask;
mod register_file;
mod report;
mod transmittal;

pub use error::ArtifactError;
pub use local::{LocalArtifacts, MediaBoxScanner};
pub use manifest_csv::read_manifest_csv;
pub use mask::mask_to_regex;
pub use register_file::{DirectoryCatalog, JsonRegisterFile, RegisterLock};
pub use report::{
    write_print_report_csv, write_print_report_json, write_status_csv, PRINT_REPORT_CSV,
    PRINT_REPORT_JSON,
};
pub use transmittal::{
    clean_transmittal_name, discover_transmittals, document_phase, find_manifest,
    scan_transmittal,
};
