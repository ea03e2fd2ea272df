//! File name masks with `*` and `?` wildcards.

use regex::Regex;

use crate::error::ArtifactError;

pub fn mask_to_regex(mask: &str) -> Result<Regex, ArtifactError> {
    let mut pattern = String::with_capacity(mask.len() + 8);
    pattern.push('^');
    for ch in mask.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| ArtifactError::Mask {
        mask: mask.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_and_literal_dots() {
        let re = mask_to_regex("0055-CPC-GA1-4.*.json").unwrap();
        assert!(re.is_match("0055-CPC-GA1-4.2.json"));
        assert!(!re.is_match("0055-CPC-GA1-4x2.json"));
        assert!(!re.is_match("0055-CPC-GA1-4.2.json.bak"));

        let q = mask_to_regex("TRM-0000?").unwrap();
        assert!(q.is_match("TRM-00001"));
        assert!(!q.is_match("TRM-000012"));
    }
}
