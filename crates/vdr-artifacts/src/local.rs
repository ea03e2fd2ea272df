//! Local filesystem implementations of the print collaborators.

use std::fs;
use std::path::{Path, PathBuf};

use lopdf::{Document, Object, ObjectId};
use tracing::debug;
use vdr_reconcile::{ArtifactStore, PdfMetadata};

/// Files on the local disk; free space via `statvfs`/`GetDiskFreeSpaceEx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalArtifacts;

/// Closest existing ancestor, so free space can be asked for a target that
/// will only be created by the copy.
fn existing_ancestor(path: &Path) -> &Path {
    let mut p = path;
    while !p.exists() {
        match p.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => p = parent,
            _ => return Path::new("."),
        }
    }
    p
}

impl ArtifactStore for LocalArtifacts {
    fn size_of(&self, path: &Path) -> std::io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn available_space(&self, target: &Path) -> std::io::Result<u64> {
        fs2::available_space(existing_ancestor(target))
    }

    fn copy_into(&self, source: &Path, target_dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(target_dir)?;
        let name = source.file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no file name in {}", source.display()),
            )
        })?;
        let dest = target_dir.join(name);
        let bytes = fs::copy(source, &dest)?;
        debug!(source = %source.display(), dest = %dest.display(), bytes, "artifact copied");
        Ok(dest)
    }
}

// ---------------------------------------------------------------------------
// Page sizes
// ---------------------------------------------------------------------------

/// Deepest `/Parent` chain followed for an inherited box.
const MAX_TREE_DEPTH: usize = 32;

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, String> {
    match obj {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| format!("object {id:?}: {e}")),
        other => Ok(other),
    }
}

fn number(doc: &Document, obj: &Object) -> Result<f64, String> {
    match resolve(doc, obj)? {
        Object::Integer(i) => Ok(*i as f64),
        Object::Real(r) => Ok(f64::from(*r)),
        other => Err(format!("media box entry is not a number: {other:?}")),
    }
}

fn box_size(doc: &Document, obj: &Object) -> Result<(f64, f64), String> {
    let values = resolve(doc, obj)?
        .as_array()
        .map_err(|e| format!("media box: {e}"))?;
    let [x0, y0, x1, y1] = values.as_slice() else {
        return Err(format!("media box has {} entries", values.len()));
    };
    let (x0, y0) = (number(doc, x0)?, number(doc, y0)?);
    let (x1, y1) = (number(doc, x1)?, number(doc, y1)?);
    Ok(((x1 - x0).abs(), (y1 - y0).abs()))
}

/// The page's own `/MediaBox`, else the nearest one up the page tree.
fn page_box(doc: &Document, page: ObjectId) -> Result<(f64, f64), String> {
    let mut node = page;
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc
            .get_dictionary(node)
            .map_err(|e| format!("page node {node:?}: {e}"))?;
        if let Ok(media_box) = dict.get(b"MediaBox") {
            return box_size(doc, media_box);
        }
        node = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .map_err(|_| format!("page {page:?} has no media box"))?;
    }
    Err(format!("page tree above {page:?} deeper than {MAX_TREE_DEPTH}"))
}

/// Page sizes in points, in page order, parsed with `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaBoxScanner;

impl MediaBoxScanner {
    pub fn scan(&self, bytes: &[u8]) -> Result<Vec<(f64, f64)>, String> {
        let doc = Document::load_mem(bytes).map_err(|e| format!("parse pdf: {e}"))?;
        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err("document has no pages".to_string());
        }
        pages.values().map(|&id| page_box(&doc, id)).collect()
    }
}

impl PdfMetadata for MediaBoxScanner {
    fn page_sizes(&self, path: &Path) -> Result<Vec<(f64, f64)>, String> {
        let bytes = fs::read(path).map_err(|e| format!("read {}: {e}", path.display()))?;
        let sizes = self.scan(&bytes)?;
        debug!(path = %path.display(), pages = sizes.len(), "page sizes read");
        Ok(sizes)
    }
}
