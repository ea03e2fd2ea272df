use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vdr_register::{DataWarning, DocumentKey, RevisionEvent, Scheme};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outgoing => f.write_str("outgoing"),
            Direction::Incoming => f.write_str("incoming"),
        }
    }
}

/// Register view of one outgoing document, built during posting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub key: DocumentKey,
    pub row: u32,
    pub doc_number: Option<String>,
    pub issue_purpose: Option<String>,
    pub class: Option<String>,
    pub name_local: Option<String>,
    pub name_foreign: Option<String>,
    pub current_revision: String,
    pub scheme: Scheme,
    pub discipline_code: Option<String>,
    pub type_code: Option<String>,
    /// Oldest first; never longer than the revision index + 1.
    pub history: Vec<RevisionEvent>,
}

/// One row of an incoming transmittal manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingSnapshot {
    pub doc_number: String,
    pub filename: String,
    pub revision: String,
    pub remark_code: Option<String>,
    pub phase: String,
    pub transmittal_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum DocumentEntry {
    #[default]
    Unresolved,
    Outgoing(DocumentRecord),
    Incoming(IncomingSnapshot),
}

/// A dated batch of documents exchanged with the other party.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmittal {
    pub name: String,
    pub direction: Direction,
    pub phase: String,
    pub date: Option<NaiveDate>,
    /// Document name -> entry. Enumeration order is the key order.
    pub documents: BTreeMap<String, DocumentEntry>,
    /// Document name -> physical file, when known.
    pub artifacts: BTreeMap<String, PathBuf>,
}

impl Transmittal {
    pub fn new(name: impl Into<String>, direction: Direction, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction,
            phase: phase.into(),
            date: None,
            documents: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn with_document(mut self, name: impl Into<String>) -> Self {
        self.documents.insert(name.into(), DocumentEntry::Unresolved);
        self
    }

    pub fn with_artifact(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let name = name.into();
        self.documents
            .entry(name.clone())
            .or_insert(DocumentEntry::Unresolved);
        self.artifacts.insert(name, path.into());
        self
    }

    pub fn document_names(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    pub fn incoming(&self) -> impl Iterator<Item = (&String, &IncomingSnapshot)> + '_ {
        self.documents.iter().filter_map(|(name, e)| match e {
            DocumentEntry::Incoming(s) => Some((name, s)),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub document: String,
    pub reason: String,
}

/// Per-document outcome of one engine batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub transmittal: String,
    pub direction: Direction,
    /// Documents whose register cells were written.
    pub written: Vec<String>,
    /// Documents already posted before this batch.
    pub unchanged: Vec<String>,
    pub skipped: Vec<Skipped>,
    pub warnings: Vec<DataWarning>,
    pub saved: bool,
}

impl BatchReport {
    pub fn new(transmittal: &Transmittal) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            transmittal: transmittal.name.clone(),
            direction: transmittal.direction,
            written: Vec::new(),
            unchanged: Vec::new(),
            skipped: Vec::new(),
            warnings: Vec::new(),
            saved: false,
        }
    }

    pub fn skip(&mut self, document: impl Into<String>, reason: impl fmt::Display) {
        self.skipped.push(Skipped {
            document: document.into(),
            reason: reason.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.warnings.is_empty()
    }
}
