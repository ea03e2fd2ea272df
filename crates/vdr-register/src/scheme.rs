//! Revision schemes.
//!
//! A revision label belongs to exactly one scheme: Review labels are a
//! letter followed by a digit (`A1`), Use labels are two digits (`03`).
//! Within a scheme the configured list order is the chronological order.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use vdr_config::RevisionLabels;

use crate::error::RegisterError;

static REVIEW_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]\d$").expect("static regex"));
static USE_SHAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d\d$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Issued for review.
    Review,
    /// Issued for use.
    Use,
}

impl Scheme {
    pub const ALL: [Scheme; 2] = [Scheme::Review, Scheme::Use];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Review => "review",
            Scheme::Use => "use",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label resolved against its scheme's ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classified {
    pub scheme: Scheme,
    pub label: String,
    /// Position within the scheme's list.
    pub index: usize,
    /// True when the raw text was not a label and was coerced to the first
    /// Review label.
    pub coerced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSchemes {
    review: Vec<String>,
    use_labels: Vec<String>,
    placeholder: String,
}

impl RevisionSchemes {
    pub fn new(labels: &RevisionLabels) -> Self {
        Self {
            review: labels.review.iter().map(|l| l.trim().to_uppercase()).collect(),
            use_labels: labels.use_labels.iter().map(|l| l.trim().to_string()).collect(),
            placeholder: labels.placeholder.clone(),
        }
    }

    pub fn labels(&self, scheme: Scheme) -> &[String] {
        match scheme {
            Scheme::Review => &self.review,
            Scheme::Use => &self.use_labels,
        }
    }

    pub fn index_of(&self, scheme: Scheme, label: &str) -> Option<usize> {
        self.labels(scheme).iter().position(|l| l == label)
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Resolve a raw revision value.
    ///
    /// The placeholder and any text of neither shape are coerced to the
    /// first Review label. A well-shaped label missing from the configured
    /// list is an error.
    pub fn classify(&self, raw: &str) -> Result<Classified, RegisterError> {
        let t = raw.trim();

        let shaped = if REVIEW_SHAPE.is_match(t) {
            Some((Scheme::Review, t.to_uppercase()))
        } else if USE_SHAPE.is_match(t) {
            Some((Scheme::Use, t.to_string()))
        } else {
            None
        };

        if let Some((scheme, label)) = shaped {
            return match self.index_of(scheme, &label) {
                Some(index) => Ok(Classified {
                    scheme,
                    label,
                    index,
                    coerced: false,
                }),
                None => Err(RegisterError::UnknownRevision {
                    raw: t.to_string(),
                    scheme,
                }),
            };
        }

        // Lists are validated non-empty at config load.
        let first = self.review.first().cloned().unwrap_or_default();
        if t == self.placeholder {
            warn!(raw = %t, label = %first, "revision placeholder, using first review label");
        } else {
            warn!(raw = %t, label = %first, "unrecognised revision, using first review label");
        }
        Ok(Classified {
            scheme: Scheme::Review,
            label: first,
            index: 0,
            coerced: true,
        })
    }
}
