//! Document keys.
//!
//! Externally reviewed documents arrive with file names that differ from the
//! register key: a trailing `_...` suffix and a `-XX-NNNN` segment that the
//! register writes as `.XX-NNNN`. Normalization only applies to names that
//! carry the external-review marker.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use vdr_config::KeySettings;

static DASHED_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\w{2}-\d{4})").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(raw: impl AsRef<str>) -> Self {
        DocumentKey(raw.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    marker: String,
    max_passes: u8,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new(&KeySettings::default())
    }
}

impl KeyNormalizer {
    pub fn new(settings: &KeySettings) -> Self {
        Self {
            marker: settings.external_review_marker.clone(),
            max_passes: settings.max_passes.max(1),
        }
    }

    /// Canonical register key for a raw name.
    ///
    /// Names without the marker pass through trimmed. Otherwise at most
    /// `max_passes` rewrite passes run, stopping early once a pass changes
    /// nothing or the marker is gone.
    pub fn normalize(&self, raw: &str) -> DocumentKey {
        let mut key = raw.trim().to_string();
        for _ in 0..self.max_passes {
            if !key.contains(&self.marker) {
                break;
            }
            let next = rewrite_once(&key);
            if next == key {
                break;
            }
            key = next;
        }
        DocumentKey(key)
    }

    /// Split an externally reviewed name at the marker.
    ///
    /// Returns the text before the marker, or `None` if the name has none.
    pub fn prefix_before_marker<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.find(&self.marker).map(|i| &name[..i])
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

fn rewrite_once(key: &str) -> String {
    let head = match key.find('_') {
        Some(i) => &key[..i],
        None => key,
    };
    DASHED_SEGMENT.replace_all(head, ".$1").trim().to_string()
}
