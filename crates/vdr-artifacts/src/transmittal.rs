//! Transmittal folders on disk.
//!
//! A transmittal is a folder named `<prefix>TRM-NNNNN<anything>` holding
//! the document PDFs, either directly or one per subfolder named after the
//! document.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use vdr_config::Masks;
use vdr_reconcile::{Direction, Transmittal};

use crate::error::ArtifactError;
use crate::mask::mask_to_regex;

static TRANSMITTAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?TRM-\d{5})").expect("static regex"));

/// Cut anything after the `TRM-NNNNN` number off a folder name.
pub fn clean_transmittal_name(raw: &str) -> String {
    TRANSMITTAL_NAME
        .captures(raw.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Phase encoded in a document file name: the leading digits of the second
/// `.`-separated segment, with phase `0` counted as `1`.
pub fn document_phase(name: &str) -> Option<String> {
    let segment = name.split('.').nth(1)?;
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    let phase = if digits.is_empty() {
        segment.to_string()
    } else {
        digits
    };
    match phase.as_str() {
        "" => None,
        "0" => Some("1".to_string()),
        _ => Some(phase),
    }
}

fn is_document_pdf(name: &str, stem: &str) -> bool {
    let lower = name.to_lowercase();
    name.starts_with(stem) && lower.ends_with(".pdf") && !lower.contains("crs")
}

fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ArtifactError::io(dir, e))? {
        out.push(entry.map_err(|e| ArtifactError::io(dir, e))?.path());
    }
    out.sort();
    Ok(out)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn pdfs_in(dir: &Path, stem: &str) -> Result<Vec<PathBuf>, ArtifactError> {
    Ok(list_dir(dir)?
        .into_iter()
        .filter(|p| p.is_file() && is_document_pdf(&file_name(p), stem))
        .collect())
}

/// Enumerate a transmittal folder.
pub fn scan_transmittal(
    dir: &Path,
    direction: Direction,
    masks: &Masks,
) -> Result<Transmittal, ArtifactError> {
    let name = clean_transmittal_name(&file_name(dir));
    let stem = masks.document_stem();

    let mut files = pdfs_in(dir, stem)?;
    if files.is_empty() {
        debug!(transmittal = %name, "no documents at top level, trying subfolders");
        let folder_mask = mask_to_regex(&masks.document)?;
        for sub in list_dir(dir)? {
            if !sub.is_dir() || !folder_mask.is_match(&file_name(&sub)) {
                continue;
            }
            match pdfs_in(&sub, stem)?.into_iter().next() {
                Some(pdf) => files.push(pdf),
                None => warn!(transmittal = %name, folder = %sub.display(), "subfolder has no document pdf"),
            }
        }
    }

    let phase = files
        .iter()
        .find_map(|p| document_phase(&file_name(p)))
        .unwrap_or_default();
    if phase.is_empty() {
        warn!(transmittal = %name, "phase could not be derived from document names");
    }

    let mut t = Transmittal::new(name, direction, phase);
    for path in files {
        let fname = file_name(&path);
        // is_document_pdf guarantees a 4-byte ".pdf" tail.
        let doc = fname[..fname.len() - 4].to_string();
        t = t.with_artifact(doc, path);
    }
    info!(
        transmittal = %t.name,
        %direction,
        phase = %t.phase,
        documents = t.documents.len(),
        "transmittal scanned"
    );
    Ok(t)
}

/// Transmittal folders directly under `root` whose names match `mask`.
pub fn discover_transmittals(root: &Path, mask: &str) -> Result<Vec<PathBuf>, ArtifactError> {
    let re = mask_to_regex(mask)?;
    Ok(list_dir(root)?
        .into_iter()
        .filter(|p| p.is_dir() && re.is_match(&file_name(p)))
        .collect())
}

/// First CSV file in a transmittal folder, taken as its manifest.
pub fn find_manifest(dir: &Path) -> Result<Option<PathBuf>, ArtifactError> {
    Ok(list_dir(dir)?.into_iter().find(|p| {
        p.is_file()
            && p.extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
    }))
}
