//! Typed configuration.
//!
//! Row and column numbers are 1-based, matching how the register and the
//! transmittal manifests are addressed in the spreadsheets they come from.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserve kept free on the print target (100 MiB).
pub const DEFAULT_SAFETY_MARGIN_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VdrConfig {
    pub register: RegisterLayout,
    pub revisions: RevisionLabels,
    pub keys: KeySettings,
    pub manifest: ManifestLayout,
    pub masks: Masks,
    pub print: PrintSettings,
    pub store: StoreSettings,
}

impl VdrConfig {
    /// Build from merged config JSON (produced by [`crate::load_layered_yaml`]).
    ///
    /// Missing sections and fields fall back to defaults. Structural checks
    /// that would otherwise surface deep inside a batch are done here.
    pub fn from_json(cfg: &Value) -> Result<Self> {
        let parsed: VdrConfig =
            serde_json::from_value(cfg.clone()).context("config does not match VdrConfig schema")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.revisions.review.is_empty() {
            bail!("revisions.review must list at least one label");
        }
        if self.revisions.use_labels.is_empty() {
            bail!("revisions.use must list at least one label");
        }
        if self.register.header_row == 0
            || self.register.key_column == 0
            || self.register.first_data_row == 0
        {
            bail!("register rows/columns are 1-based; 0 is not a valid position");
        }
        if self.register.first_data_row <= self.register.header_row {
            bail!(
                "register.first_data_row ({}) must come after register.header_row ({})",
                self.register.first_data_row,
                self.register.header_row
            );
        }
        if self.manifest.first_data_row <= self.manifest.header_row {
            bail!(
                "manifest.first_data_row ({}) must come after manifest.header_row ({})",
                self.manifest.first_data_row,
                self.manifest.header_row
            );
        }
        if self.keys.external_review_marker.trim().is_empty() {
            bail!("keys.external_review_marker must not be empty");
        }
        if self.store.save_attempts == 0 {
            bail!("store.save_attempts must be >= 1");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Register layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterLayout {
    /// Worksheet holding the register.
    pub sheet: String,
    /// Row carrying the "issue for ..." markers.
    pub header_row: u32,
    /// First column scanned for markers.
    pub marker_scan_from: u32,
    /// Column holding the document key.
    pub key_column: u32,
    pub first_data_row: u32,
    pub marker_phrase: String,
    /// Regex the marker cell must also match for Review groups.
    pub review_qualifier: String,
    /// Regex the marker cell must also match for Use groups.
    pub use_qualifier: String,
    /// Only rows whose key contains this text take part in a full status scan.
    pub document_prefix: Option<String>,
    pub columns: StaticColumns,
    pub offsets: GroupOffsets,
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self {
            sheet: "VDR".to_string(),
            header_row: 9,
            marker_scan_from: 62,
            key_column: 41,
            first_data_row: 13,
            marker_phrase: "issue for".to_string(),
            review_qualifier: r"rev.[A-Z]\d".to_string(),
            use_qualifier: r"rev.\d\d".to_string(),
            document_prefix: Some("0055".to_string()),
            columns: StaticColumns::default(),
            offsets: GroupOffsets::default(),
        }
    }
}

/// Columns of the per-document static fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticColumns {
    pub doc_number: u32,
    pub issue_purpose: u32,
    pub class: u32,
    pub name_local: u32,
    pub name_foreign: u32,
    pub revision: u32,
    pub discipline_code: u32,
    pub type_code: u32,
}

impl Default for StaticColumns {
    fn default() -> Self {
        Self {
            doc_number: 41,
            issue_purpose: 55,
            class: 22,
            name_local: 50,
            name_foreign: 49,
            revision: 54,
            discipline_code: 38,
            type_code: 40,
        }
    }
}

/// Displacements of a column group's blocks.
///
/// `issue` is measured from the marker column; `returned` and
/// `first_review_returned` from the issued-date column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupOffsets {
    pub issue: u32,
    pub returned: u32,
    /// Returned block of the first Review label lives further right.
    pub first_review_returned: u32,
}

impl Default for GroupOffsets {
    fn default() -> Self {
        Self {
            issue: 2,
            returned: 4,
            first_review_returned: 28,
        }
    }
}

// ---------------------------------------------------------------------------
// Revisions / keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionLabels {
    /// Issued-for-review labels, oldest first.
    pub review: Vec<String>,
    /// Issued-for-use labels, oldest first.
    #[serde(rename = "use")]
    pub use_labels: Vec<String>,
    /// Marks a revision that has not been assigned yet.
    pub placeholder: String,
}

impl Default for RevisionLabels {
    fn default() -> Self {
        Self {
            review: ["A1", "B1", "C1", "D1", "E1", "F1", "G1", "H1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            use_labels: ["00", "01", "02", "03", "04", "05", "06"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            placeholder: "-".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    /// Token marking a file name of an externally reviewed document.
    pub external_review_marker: String,
    /// Upper bound on normalization passes.
    pub max_passes: u8,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            external_review_marker: "ER".to_string(),
            max_passes: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Incoming manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestLayout {
    pub header_row: u32,
    pub first_data_row: u32,
    /// A data row counts only when this column is non-empty.
    pub presence_column: u32,
    pub date_row: u32,
    pub date_column: u32,
    pub labels: ManifestLabels,
}

impl Default for ManifestLayout {
    fn default() -> Self {
        Self {
            header_row: 7,
            first_data_row: 8,
            presence_column: 4,
            date_row: 1,
            date_column: 9,
            labels: ManifestLabels::default(),
        }
    }
}

/// Header labels, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestLabels {
    pub doc_number: String,
    pub filename: String,
    pub revision: String,
    pub remark: String,
}

impl Default for ManifestLabels {
    fn default() -> Self {
        Self {
            doc_number: "project doc number".to_string(),
            filename: "electronic filename".to_string(),
            revision: "rev".to_string(),
            remark: "comments".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// File masks
// ---------------------------------------------------------------------------

/// Name masks (`*` and `?` wildcards).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Masks {
    pub sent_transmittal: String,
    pub received_transmittal: String,
    pub register: String,
    pub document: String,
}

impl Default for Masks {
    fn default() -> Self {
        Self {
            sent_transmittal: "0055-P2-GA1-CPC-TRM*".to_string(),
            received_transmittal: "0055-P2-CPC-GA1-TRM*".to_string(),
            register: "0055-CPC-GA1-4.*.json".to_string(),
            document: "0055-CPC-GA1-4.*".to_string(),
        }
    }
}

impl Masks {
    /// Literal part of the register mask before the first wildcard.
    pub fn register_stem(&self) -> &str {
        literal_stem(&self.register)
    }

    /// Literal part of the document mask before the first wildcard.
    pub fn document_stem(&self) -> &str {
        literal_stem(&self.document)
    }
}

fn literal_stem(mask: &str) -> &str {
    match mask.find(['*', '?']) {
        Some(i) => &mask[..i],
        None => mask,
    }
}

// ---------------------------------------------------------------------------
// Print / store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    pub safety_margin_bytes: u64,
    /// Allowed deviation, in inches, when matching a page to a format.
    pub format_tolerance_in: f64,
    /// Format name -> accepted (width, height) sizes in inches.
    pub page_formats: BTreeMap<String, Vec<[f64; 2]>>,
}

impl Default for PrintSettings {
    fn default() -> Self {
        let mut page_formats = BTreeMap::new();
        page_formats.insert("A0".to_string(), vec![[33.1, 46.8]]);
        page_formats.insert("A1".to_string(), vec![[23.4, 33.1]]);
        page_formats.insert("A2".to_string(), vec![[16.5, 23.4]]);
        page_formats.insert("A3".to_string(), vec![[16.2, 22.3], [11.7, 16.5]]);
        page_formats.insert("A4".to_string(), vec![[11.2, 14.5], [8.3, 11.7], [8.5, 11.0]]);
        Self {
            safety_margin_bytes: DEFAULT_SAFETY_MARGIN_BYTES,
            format_tolerance_in: 0.2,
            page_formats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Total save attempts while the register file is locked.
    pub save_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            save_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}
