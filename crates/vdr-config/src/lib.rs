//! vdr-config
//!
//! Layered YAML configuration for the register reconciliation tools.
//!
//! - YAML documents are merged in order: earlier docs are base, later docs override.
//! - The merged document is canonicalized and hashed (SHA-256) so a batch can
//!   record exactly which configuration it ran with.
//! - [`VdrConfig`] is the typed view handed to register/engine constructors.
//!   Every field has a default reproducing the stock register layout.

mod settings;

pub use settings::*;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Known JSON-pointer prefixes used for this analysis (sorted, unique)
    pub known_prefixes: Vec<String>,
    /// Leaf pointers not covered by any known prefix (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Registry of JSON-pointer prefixes that [`VdrConfig`] reads.
///
/// Keep in sync with `settings.rs`. Map-valued sections whose keys are data
/// (page formats) are registered as a whole.
pub fn known_pointers() -> &'static [&'static str] {
    &[
        "/register/sheet",
        "/register/header_row",
        "/register/marker_scan_from",
        "/register/key_column",
        "/register/first_data_row",
        "/register/marker_phrase",
        "/register/review_qualifier",
        "/register/use_qualifier",
        "/register/document_prefix",
        "/register/columns/doc_number",
        "/register/columns/issue_purpose",
        "/register/columns/class",
        "/register/columns/name_local",
        "/register/columns/name_foreign",
        "/register/columns/revision",
        "/register/columns/discipline_code",
        "/register/columns/type_code",
        "/register/offsets/issue",
        "/register/offsets/returned",
        "/register/offsets/first_review_returned",
        "/revisions/review",
        "/revisions/use",
        "/revisions/placeholder",
        "/keys/external_review_marker",
        "/keys/max_passes",
        "/manifest/header_row",
        "/manifest/first_data_row",
        "/manifest/presence_column",
        "/manifest/date_row",
        "/manifest/date_column",
        "/manifest/labels/doc_number",
        "/manifest/labels/filename",
        "/manifest/labels/revision",
        "/manifest/labels/remark",
        "/masks/sent_transmittal",
        "/masks/received_transmittal",
        "/masks/register",
        "/masks/document",
        "/print/safety_margin_bytes",
        "/print/format_tolerance_in",
        "/print/page_formats",
        "/store/save_attempts",
        "/store/initial_backoff_ms",
        "/store/max_backoff_ms",
    ]
}

/// Produce an unused-key report for a merged config document.
/// If `policy == Fail`, returns an error when unused keys exist.
/// If `policy == Warn`, always returns Ok(report).
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let mut known: BTreeSet<String> = BTreeSet::new();
    for p in known_pointers() {
        known.insert(normalize_pointer(p));
    }
    let known_prefixes: Vec<String> = known.iter().cloned().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = Vec::new();
    'leaf: for lp in leaves {
        // An empty document has a single "/" leaf; nothing to report.
        if lp == "/" {
            continue;
        }
        for kp in &known_prefixes {
            if is_prefix_pointer(kp, &lp) {
                continue 'leaf;
            }
        }
        unused.push(lp);
    }

    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        known_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unknown config leaf key(s) detected. \
            Remove or rename them. First few: {}",
            report.unused_leaf_pointers.len(),
            preview_list(&report.unused_leaf_pointers, 12)
        );
    }

    Ok(report)
}

/// Normalize JSON pointer:
/// - must begin with "/"
/// - no trailing "/" unless it's just "/"
fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// Return true if `prefix` is a JSON-pointer prefix of `leaf`.
///
/// "/a/b" covers "/a/b/c" but NOT "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    if leaf.starts_with(prefix) {
        return leaf
            .get(prefix.len()..prefix.len() + 1)
            .map(|c| c == "/")
            .unwrap_or(false);
    }
    false
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn preview_list(items: &[String], n: usize) -> String {
    let take = items.iter().take(n).cloned().collect::<Vec<_>>();
    format!("{:?}", take)
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view of the merged document.
    pub fn settings(&self) -> Result<VdrConfig> {
        VdrConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        // An empty YAML document parses as null; treat it as an empty overlay.
        if v_json.is_null() {
            continue;
        }
        merged = deep_merge(merged, v_json);
    }

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).context("canonical json serialize failed")
}

/// Rebuild objects with keys in sorted order so key order in YAML input
/// does not change the hash.
fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                if let Some(inner) = map.get(&k) {
                    out.insert(k, sort_keys(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
