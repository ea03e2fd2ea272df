//! Print budget gate.
//!
//! Resolves every returned document to its artifact and tallies its size
//! and pages. Only accepted documents count toward the budget, and the copy
//! phase runs only when the target has room for all of them plus a reserve.
//! The report is produced whether or not copying is allowed, including when
//! the free space cannot be read; copying is all or nothing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use vdr_config::PrintSettings;
use vdr_register::{DocumentKey, KeyNormalizer};

use crate::error::ReconcileError;
use crate::manifest::strip_extension;
use crate::status::{Status, StatusMap};
use crate::types::{DocumentEntry, Transmittal};

pub const OTHER_FORMAT: &str = "Other";
const POINTS_PER_INCH: f64 = 72.0;

/// Filesystem side of printing.
pub trait ArtifactStore {
    fn size_of(&self, path: &Path) -> std::io::Result<u64>;
    fn available_space(&self, target: &Path) -> std::io::Result<u64>;
    /// Copy `source` into `target_dir`, keeping the file name.
    fn copy_into(&self, source: &Path, target_dir: &Path) -> std::io::Result<PathBuf>;
}

/// Page geometry of a PDF, in points.
pub trait PdfMetadata {
    fn page_sizes(&self, path: &Path) -> Result<Vec<(f64, f64)>, String>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrintEntry {
    pub key: DocumentKey,
    pub status: Status,
    pub transmittal: Option<String>,
    pub path: Option<PathBuf>,
    pub bytes: u64,
    /// Format name -> page count.
    pub pages: BTreeMap<String, u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    InsufficientStorage { shortfall: u64 },
    /// Free space of the target could not be read.
    SpaceUnknown { reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrintReport {
    pub batch_id: Uuid,
    /// Every scanned document, accepted or not. Sizes and pages are filled
    /// for every document whose artifact resolved.
    pub entries: Vec<PrintEntry>,
    /// Accepted documents whose artifact could not be resolved.
    pub missing: Vec<String>,
    pub status_counts: BTreeMap<String, usize>,
    /// Pages per format over all resolved documents.
    pub format_totals: BTreeMap<String, u32>,
    /// Bytes of the printable entries.
    pub required_bytes: u64,
    /// Zero when the free space is unknown.
    pub available_bytes: u64,
    pub margin_bytes: u64,
    pub decision: GateDecision,
}

impl PrintReport {
    pub fn usable_bytes(&self) -> u64 {
        self.available_bytes.saturating_sub(self.margin_bytes)
    }

    pub fn may_copy(&self) -> bool {
        self.decision == GateDecision::Proceed
    }

    /// Entries that would be copied.
    pub fn printable(&self) -> impl Iterator<Item = &PrintEntry> + '_ {
        self.entries
            .iter()
            .filter(|e| e.status.is_accepted() && e.path.is_some())
    }
}

/// Format name for a page of `width` x `height` inches, in either
/// orientation.
pub fn classify_page(width: f64, height: f64, settings: &PrintSettings) -> String {
    let tol = settings.format_tolerance_in;
    let close = |a: f64, b: f64| (a - b).abs() <= tol;
    settings
        .page_formats
        .iter()
        .find(|(_, sizes)| {
            sizes.iter().any(|[w, h]| {
                (close(width, *w) && close(height, *h)) || (close(width, *h) && close(height, *w))
            })
        })
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| OTHER_FORMAT.to_string())
}

pub struct PrintBudgetGate {
    settings: PrintSettings,
    normalizer: KeyNormalizer,
}

impl PrintBudgetGate {
    pub fn new(settings: PrintSettings, normalizer: KeyNormalizer) -> Self {
        Self {
            settings,
            normalizer,
        }
    }

    /// The artifact of `key` inside the transmittal named `reference`.
    ///
    /// A manifest row matches on its document number or its clarified
    /// document name; without a manifest the file name is compared.
    fn resolve<'t>(
        &self,
        key: &DocumentKey,
        reference: &str,
        transmittals: &'t [Transmittal],
    ) -> Option<&'t PathBuf> {
        let t = transmittals.iter().find(|t| t.name == reference)?;
        t.documents.iter().find_map(|(name, entry)| {
            let matches = match entry {
                DocumentEntry::Incoming(s) => {
                    self.normalizer.normalize(&s.doc_number) == *key
                        || self.normalizer.normalize(name) == *key
                }
                _ => self.normalizer.normalize(strip_extension(name)) == *key,
            };
            if matches {
                t.artifacts.get(name)
            } else {
                None
            }
        })
    }

    fn tally_pages(&self, path: &Path, pdf: Option<&dyn PdfMetadata>) -> BTreeMap<String, u32> {
        let mut pages = BTreeMap::new();
        let Some(pdf) = pdf else {
            return pages;
        };
        match pdf.page_sizes(path) {
            Ok(sizes) => {
                for (w, h) in sizes {
                    let name =
                        classify_page(w / POINTS_PER_INCH, h / POINTS_PER_INCH, &self.settings);
                    *pages.entry(name).or_insert(0) += 1;
                }
            }
            Err(reason) => warn!(path = %path.display(), %reason, "page sizes unavailable"),
        }
        pages
    }

    /// Build the size/status report and decide whether copying may run.
    pub fn evaluate(
        &self,
        statuses: &StatusMap,
        transmittals: &[Transmittal],
        artifacts: &dyn ArtifactStore,
        pdf: Option<&dyn PdfMetadata>,
        target: &Path,
    ) -> Result<PrintReport, ReconcileError> {
        let batch_id = Uuid::new_v4();
        let mut entries = Vec::with_capacity(statuses.len());
        let mut missing = Vec::new();
        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut format_totals: BTreeMap<String, u32> = BTreeMap::new();
        let mut required = 0u64;

        for (key, ds) in statuses {
            *status_counts.entry(ds.status.name().to_string()).or_default() += 1;
            let transmittal = ds.frontier.as_ref().map(|f| f.reference.clone());
            let mut entry = PrintEntry {
                key: key.clone(),
                status: ds.status.clone(),
                transmittal: transmittal.clone(),
                path: None,
                bytes: 0,
                pages: BTreeMap::new(),
            };

            if let Some(reference) = transmittal.as_deref() {
                let accepted = ds.status.is_accepted();
                match self.resolve(key, reference, transmittals) {
                    Some(path) => match artifacts.size_of(path) {
                        Ok(bytes) => {
                            entry.bytes = bytes;
                            entry.pages = self.tally_pages(path, pdf);
                            entry.path = Some(path.clone());
                            if accepted {
                                required += bytes;
                            }
                            for (format, n) in &entry.pages {
                                *format_totals.entry(format.clone()).or_insert(0) += n;
                            }
                        }
                        Err(e) if accepted => {
                            error!(%key, path = %path.display(), error = %e, "artifact unreadable, skipped");
                            missing.push(key.to_string());
                        }
                        Err(e) => {
                            warn!(%key, path = %path.display(), error = %e, "artifact unreadable");
                        }
                    },
                    None => {
                        let err = ReconcileError::ArtifactMissing {
                            document: key.to_string(),
                            transmittal: reference.to_string(),
                        };
                        if accepted {
                            error!(%key, error = %err, "document skipped");
                            missing.push(key.to_string());
                        } else {
                            warn!(%key, error = %err, "document not resolved");
                        }
                    }
                }
            }
            entries.push(entry);
        }

        let (available, decision) = match artifacts.available_space(target) {
            Ok(available) => {
                let usable = available.saturating_sub(self.settings.safety_margin_bytes);
                let decision = if required < usable {
                    GateDecision::Proceed
                } else {
                    GateDecision::InsufficientStorage {
                        shortfall: required - usable,
                    }
                };
                (available, decision)
            }
            Err(e) => {
                error!(target = %target.display(), error = %e, "free space unknown, copy refused");
                (
                    0,
                    GateDecision::SpaceUnknown {
                        reason: e.to_string(),
                    },
                )
            }
        };

        info!(
            batch = %batch_id,
            documents = entries.len(),
            required,
            available,
            margin = self.settings.safety_margin_bytes,
            ?decision,
            "print budget evaluated"
        );

        Ok(PrintReport {
            batch_id,
            entries,
            missing,
            status_counts,
            format_totals,
            required_bytes: required,
            available_bytes: available,
            margin_bytes: self.settings.safety_margin_bytes,
            decision,
        })
    }

    /// Copy every printable artifact, or nothing when the budget is short
    /// or unknown.
    pub fn copy_accepted(
        &self,
        report: &PrintReport,
        artifacts: &dyn ArtifactStore,
        target: &Path,
    ) -> Result<Vec<PathBuf>, ReconcileError> {
        match &report.decision {
            GateDecision::Proceed => {}
            GateDecision::InsufficientStorage { shortfall } => {
                error!(
                    required = report.required_bytes,
                    usable = report.usable_bytes(),
                    shortfall,
                    "copy aborted"
                );
                return Err(ReconcileError::InsufficientStorage {
                    required: report.required_bytes,
                    usable: report.usable_bytes(),
                    shortfall: *shortfall,
                });
            }
            GateDecision::SpaceUnknown { reason } => {
                error!(target = %target.display(), %reason, "copy aborted");
                return Err(ReconcileError::ArtifactIo {
                    path: target.display().to_string(),
                    reason: reason.clone(),
                });
            }
        }

        let mut copied = Vec::new();
        for entry in report.printable() {
            let Some(source) = entry.path.as_deref() else {
                continue;
            };
            let dest = artifacts
                .copy_into(source, target)
                .map_err(|e| ReconcileError::ArtifactIo {
                    path: source.display().to_string(),
                    reason: e.to_string(),
                })?;
            copied.push(dest);
        }
        info!(copied = copied.len(), target = %target.display(), "accepted documents copied");
        Ok(copied)
    }

    /// Evaluate then copy. The report comes back even when copying is
    /// refused.
    pub fn run(
        &self,
        statuses: &StatusMap,
        transmittals: &[Transmittal],
        artifacts: &dyn ArtifactStore,
        pdf: Option<&dyn PdfMetadata>,
        target: &Path,
    ) -> Result<(PrintReport, Result<Vec<PathBuf>, ReconcileError>), ReconcileError> {
        let report = self.evaluate(statuses, transmittals, artifacts, pdf, target)?;
        let copied = self.copy_accepted(&report, artifacts, target);
        Ok((report, copied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_formats_either_orientation_with_tolerance() {
        let s = PrintSettings::default();
        assert_eq!(classify_page(8.27, 11.69, &s), "A4");
        assert_eq!(classify_page(11.69, 8.27, &s), "A4");
        assert_eq!(classify_page(16.6, 23.3, &s), "A2");
        assert_eq!(classify_page(46.8, 33.1, &s), "A0");
        assert_eq!(classify_page(5.0, 5.0, &s), OTHER_FORMAT);
    }
}
