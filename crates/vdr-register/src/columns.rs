//! Column groups discovered from the register header row.
//!
//! Each revision label owns one group: an issued block (date, reference)
//! and a returned block (date, reference, remark code). Groups are found by
//! scanning the header row from a fixed column for the marker phrase plus a
//! scheme qualifier; the n-th match of a scheme belongs to that scheme's
//! n-th label.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vdr_config::RegisterLayout;

use crate::error::RegisterError;
use crate::scheme::{RevisionSchemes, Scheme};
use crate::sheet::Sheet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupField {
    IssueDate,
    IssueReference,
    ReturnDate,
    ReturnReference,
    RemarkCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    pub scheme: Scheme,
    pub index: usize,
    pub label: String,
    pub marker_column: u32,
    pub issue_date_column: u32,
    pub return_date_column: u32,
}

impl ColumnGroup {
    pub fn column(&self, field: GroupField) -> u32 {
        match field {
            GroupField::IssueDate => self.issue_date_column,
            GroupField::IssueReference => self.issue_date_column + 1,
            GroupField::ReturnDate => self.return_date_column,
            GroupField::ReturnReference => self.return_date_column + 1,
            GroupField::RemarkCode => self.return_date_column + 2,
        }
    }
}

pub struct ColumnLocator {
    header_row: u32,
    scan_from: u32,
    phrase: String,
    review_qualifier: Regex,
    use_qualifier: Regex,
    issue_offset: u32,
    returned_offset: u32,
    first_review_returned_offset: u32,
}

fn compile(pattern: &str) -> Result<Regex, RegisterError> {
    Regex::new(pattern).map_err(|e| RegisterError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl ColumnLocator {
    pub fn new(layout: &RegisterLayout) -> Result<Self, RegisterError> {
        Ok(Self {
            header_row: layout.header_row,
            scan_from: layout.marker_scan_from,
            phrase: layout.marker_phrase.to_lowercase(),
            review_qualifier: compile(&layout.review_qualifier)?,
            use_qualifier: compile(&layout.use_qualifier)?,
            issue_offset: layout.offsets.issue,
            returned_offset: layout.offsets.returned,
            first_review_returned_offset: layout.offsets.first_review_returned,
        })
    }

    fn qualifier(&self, scheme: Scheme) -> &Regex {
        match scheme {
            Scheme::Review => &self.review_qualifier,
            Scheme::Use => &self.use_qualifier,
        }
    }

    /// Groups of one scheme, in label order.
    ///
    /// Returns at most as many groups as the scheme has labels. A header
    /// with fewer groups than labels is accepted with a warning; asking for
    /// a label past the discovered prefix fails later in [`ColumnTable::group`].
    pub fn locate(
        &self,
        sheet: &Sheet,
        schemes: &RevisionSchemes,
        scheme: Scheme,
    ) -> Result<Vec<ColumnGroup>, RegisterError> {
        let labels = schemes.labels(scheme);
        let qualifier = self.qualifier(scheme);

        let mut groups = Vec::with_capacity(labels.len());
        for (col, cell) in sheet.row(self.header_row) {
            if col < self.scan_from || groups.len() == labels.len() {
                continue;
            }
            let Some(text) = cell.as_text() else {
                continue;
            };
            if !text.to_lowercase().contains(&self.phrase) || !qualifier.is_match(&text) {
                continue;
            }

            let index = groups.len();
            let issue_date_column = col + self.issue_offset;
            let returned = if scheme == Scheme::Review && index == 0 {
                self.first_review_returned_offset
            } else {
                self.returned_offset
            };
            groups.push(ColumnGroup {
                scheme,
                index,
                label: labels[index].clone(),
                marker_column: col,
                issue_date_column,
                return_date_column: issue_date_column + returned,
            });
        }

        if groups.is_empty() {
            return Err(RegisterError::ColumnSchemeNotFound {
                scheme,
                label: None,
            });
        }
        if groups.len() < labels.len() {
            warn!(
                %scheme,
                found = groups.len(),
                labels = labels.len(),
                "register header has fewer column groups than configured labels"
            );
        }
        debug!(%scheme, groups = groups.len(), "located column groups");
        Ok(groups)
    }
}

/// Column groups of both schemes for one register.
///
/// A scheme without any group is kept empty so that operations which never
/// touch it still work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTable {
    review: Vec<ColumnGroup>,
    use_groups: Vec<ColumnGroup>,
}

impl ColumnTable {
    pub fn discover(
        sheet: &Sheet,
        layout: &RegisterLayout,
        schemes: &RevisionSchemes,
    ) -> Result<Self, RegisterError> {
        let locator = ColumnLocator::new(layout)?;
        let mut table = ColumnTable::default();
        for scheme in Scheme::ALL {
            match locator.locate(sheet, schemes, scheme) {
                Ok(groups) => *table.slot(scheme) = groups,
                Err(RegisterError::ColumnSchemeNotFound { .. }) => {
                    warn!(%scheme, "register header has no column groups for scheme");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(table)
    }

    fn slot(&mut self, scheme: Scheme) -> &mut Vec<ColumnGroup> {
        match scheme {
            Scheme::Review => &mut self.review,
            Scheme::Use => &mut self.use_groups,
        }
    }

    pub fn groups(&self, scheme: Scheme) -> &[ColumnGroup] {
        match scheme {
            Scheme::Review => &self.review,
            Scheme::Use => &self.use_groups,
        }
    }

    pub fn group(&self, scheme: Scheme, index: usize) -> Result<&ColumnGroup, RegisterError> {
        let groups = self.groups(scheme);
        if groups.is_empty() {
            return Err(RegisterError::ColumnSchemeNotFound {
                scheme,
                label: None,
            });
        }
        groups
            .get(index)
            .ok_or_else(|| RegisterError::ColumnSchemeNotFound {
                scheme,
                label: Some(format!("#{}", index + 1)),
            })
    }
}
