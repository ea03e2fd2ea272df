//! Document status derived from the Use scheme's returned blocks.
//!
//! Walk the Use groups in order and stop at the first one without a
//! returned reference. The last group with a reference is the frontier; its
//! remark code decides the status. Pure over the register; evaluating twice
//! gives the same answer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vdr_register::{DocumentKey, GroupField, Register, RegisterError, Scheme};

use crate::error::ReconcileError;

/// The sole remark code meaning "accepted".
pub const ACCEPTED_REMARK: &str = "1";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum Status {
    Accepted,
    RemarkPending(String),
    RemarkMissing,
    NeverReturned,
}

impl Status {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Status::Accepted)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Accepted => "accepted",
            Status::RemarkPending(_) => "remark_pending",
            Status::RemarkMissing => "remark_missing",
            Status::NeverReturned => "never_returned",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::RemarkPending(code) => write!(f, "remark_pending({code})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Last Use group that came back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontier {
    pub label: String,
    /// Transmittal the document came back with.
    pub reference: String,
    pub date: Option<NaiveDate>,
    pub remark: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub key: DocumentKey,
    pub row: u32,
    pub status: Status,
    pub frontier: Option<Frontier>,
}

pub type StatusMap = BTreeMap<DocumentKey, DocumentStatus>;

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusComputer;

impl StatusComputer {
    /// Status of the document at `row`.
    pub fn status_at(
        &self,
        register: &Register,
        key: &DocumentKey,
        row: u32,
    ) -> Result<DocumentStatus, ReconcileError> {
        let groups = register.columns().groups(Scheme::Use);
        if groups.is_empty() {
            return Err(RegisterError::ColumnSchemeNotFound {
                scheme: Scheme::Use,
                label: None,
            }
            .into());
        }

        let mut frontier = None;
        for group in groups {
            let Some(reference) = register.read_text(row, group, GroupField::ReturnReference) else {
                break;
            };
            frontier = Some(Frontier {
                label: group.label.clone(),
                reference,
                date: register
                    .read_cell(row, group, GroupField::ReturnDate)
                    .and_then(|v| v.as_date()),
                remark: register.read_text(row, group, GroupField::RemarkCode),
            });
        }

        let status = match &frontier {
            None => Status::NeverReturned,
            Some(f) => match f.remark.as_deref() {
                Some(ACCEPTED_REMARK) => Status::Accepted,
                Some(code) => Status::RemarkPending(code.to_string()),
                None => Status::RemarkMissing,
            },
        };
        debug!(%key, row, %status, "status derived");

        Ok(DocumentStatus {
            key: key.clone(),
            row,
            status,
            frontier,
        })
    }

    /// Status of one document by raw name.
    pub fn status_of(&self, register: &Register, raw_key: &str) -> Result<DocumentStatus, ReconcileError> {
        let row = register.find_row(raw_key)?;
        let key = register.normalizer().normalize(raw_key);
        self.status_at(register, &key, row)
    }

    /// Status of every document row of the register.
    pub fn scan(&self, register: &Register) -> Result<StatusMap, ReconcileError> {
        let mut out = StatusMap::new();
        for (key, row) in register.documents() {
            let s = self.status_at(register, key, row)?;
            out.insert(key.clone(), s);
        }

        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for s in out.values() {
            *counts.entry(s.status.name()).or_default() += 1;
        }
        info!(documents = out.len(), ?counts, "status scan complete");
        Ok(out)
    }
}
