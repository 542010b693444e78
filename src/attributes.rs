//! NFT-style `{trait_type, value}` attribute lists and name-based lookup.
//!
//! Trait names are neither unique nor normalized, so lookups are case-insensitive
//! and return the first match in list order.

use crate::coerce::coerce_str;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute value: the wire format allows either a string or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Number(_) => None,
        }
    }

    /// Numeric reading of the value (strings go through coercion).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) if n.is_finite() => Some(*n),
            AttributeValue::Number(_) => None,
            AttributeValue::Text(s) => coerce_str(s),
        }
    }

    pub fn to_display(&self) -> String {
        match self {
            AttributeValue::Text(s) => s.clone(),
            AttributeValue::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(alias = "traitType")]
    pub trait_type: String,
    pub value: AttributeValue,
}

impl Attribute {
    fn name_lower(&self) -> String {
        self.trait_type.trim().to_lowercase()
    }
}

/// Parse an `attributes` array, skipping entries that do not fit the shape.
pub fn parse_attributes(raw: &[Value]) -> Vec<Attribute> {
    raw.iter()
        .filter_map(|v| serde_json::from_value::<Attribute>(v.clone()).ok())
        .collect()
}

/// Case-insensitive lookup over an attribute list.
#[derive(Debug, Clone, Copy)]
pub struct AttributeResolver<'a> {
    attributes: &'a [Attribute],
}

impl<'a> AttributeResolver<'a> {
    pub fn new(attributes: &'a [Attribute]) -> Self {
        Self { attributes }
    }

    /// First attribute whose trait name equals `name`, ignoring case and padding.
    pub fn exact(&self, name: &str) -> Option<&'a Attribute> {
        let wanted = name.trim().to_lowercase();
        self.attributes.iter().find(|a| a.name_lower() == wanted)
    }

    /// First attribute matching any of `names` exactly, in the order of `names`.
    pub fn exact_any(&self, names: &[String]) -> Option<&'a Attribute> {
        names.iter().find_map(|n| self.exact(n))
    }

    /// Attributes whose trait name contains a synonym, ordered by synonym priority.
    ///
    /// Names containing any `excludes` term are dropped. A non-empty `requires` keeps
    /// only names that also contain one of its terms. `accept` filters candidates
    /// further (callers use it to skip size-carrying attributes).
    pub fn semantic<F>(
        &self,
        synonyms: &[String],
        excludes: &[String],
        requires: &[String],
        accept: F,
    ) -> Vec<&'a Attribute>
    where
        F: Fn(&Attribute) -> bool,
    {
        let excludes: Vec<String> = excludes.iter().map(|e| e.to_lowercase()).collect();
        let requires: Vec<String> = requires.iter().map(|r| r.to_lowercase()).collect();
        let mut matches: Vec<&'a Attribute> = Vec::new();

        for synonym in synonyms {
            let synonym = synonym.to_lowercase();
            for attr in self.attributes {
                let name = attr.name_lower();
                if !name.contains(&synonym) || excludes.iter().any(|e| name.contains(e)) {
                    continue;
                }
                if !requires.is_empty() && !requires.iter().any(|r| name.contains(r)) {
                    continue;
                }
                if !accept(attr) || matches.iter().any(|m| std::ptr::eq(*m, attr)) {
                    continue;
                }
                matches.push(attr);
            }
        }

        matches
    }
}

static BYTE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)\s*(b|bytes?|kb|mb|gb|tb)\s*$")
        .expect("Invalid byte label regex")
});

/// True when the attribute carries a file size rather than a count.
pub fn is_size_attribute(attr: &Attribute, size_label_names: &[String]) -> bool {
    let name = attr.name_lower();
    if size_label_names.iter().any(|n| n.to_lowercase() == name) {
        return true;
    }
    attr.value
        .as_text()
        .map(|s| BYTE_LABEL.is_match(s))
        .unwrap_or(false)
}

/// Parse "8 KB", "1.5 MB", "1,024 KB", "512 bytes" into a byte count.
pub fn parse_size_label_bytes(label: &str) -> Option<f64> {
    let caps = BYTE_LABEL.captures(label)?;
    let amount: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
    let multiplier = match caps.get(2)?.as_str().to_lowercase().as_str() {
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        "gb" => 1024.0 * 1024.0 * 1024.0,
        "tb" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some(amount * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(raw: Value) -> Vec<Attribute> {
        parse_attributes(raw.as_array().unwrap())
    }

    #[test]
    fn test_parse_both_spellings_and_skip_junk() {
        let list = attrs(json!([
            {"trait_type": "Rows", "value": 500},
            {"traitType": "Format", "value": "CSV"},
            {"trait_type": "Broken"},
            "not an attribute",
            {"trait_type": "Flag", "value": true}
        ]));
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].value, AttributeValue::Number(500.0));
        assert_eq!(list[1].trait_type, "Format");
    }

    #[test]
    fn test_exact_is_case_insensitive() {
        let list = attrs(json!([{"trait_type": "ROWS", "value": 500}]));
        let resolver = AttributeResolver::new(&list);
        let hit = resolver.exact("rows").unwrap();
        assert_eq!(hit.value.as_number(), Some(500.0));
        assert!(resolver.exact("columns").is_none());
    }

    #[test]
    fn test_semantic_respects_priority_and_excludes() {
        let list = attrs(json!([
            {"trait_type": "Total Anomalies", "value": 3},
            {"trait_type": "Record Count", "value": "2,000"},
            {"trait_type": "Column Count", "value": 9}
        ]));
        let resolver = AttributeResolver::new(&list);
        let synonyms = vec!["record".to_string(), "count".to_string(), "total".to_string()];
        let excludes = vec!["column".to_string(), "anomal".to_string()];
        let hits = resolver.semantic(&synonyms, &excludes, &[], |_| true);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].trait_type, "Record Count");
    }

    #[test]
    fn test_semantic_requires_a_qualifier() {
        let list = attrs(json!([
            {"trait_type": "Flow Rate", "value": 12},
            {"trait_type": "Low Severity Anomalies", "value": 4}
        ]));
        let resolver = AttributeResolver::new(&list);
        let synonyms = vec!["low".to_string()];
        let requires = vec!["anomal".to_string(), "outlier".to_string()];

        let hits = resolver.semantic(&synonyms, &[], &requires, |_| true);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].trait_type, "Low Severity Anomalies");
        assert_eq!(resolver.semantic(&synonyms, &[], &[], |_| true).len(), 2);
    }

    #[test]
    fn test_semantic_filter_callback() {
        let list = attrs(json!([
            {"trait_type": "File Size", "value": "8 KB"},
            {"trait_type": "Sample Size", "value": 120}
        ]));
        let resolver = AttributeResolver::new(&list);
        let names = vec!["file size".to_string(), "size".to_string()];
        let hits = resolver.semantic(&["size".to_string()], &[], &[], |a| !is_size_attribute(a, &names));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].trait_type, "Sample Size");
    }

    #[test]
    fn test_size_labels() {
        assert_eq!(parse_size_label_bytes("8 KB"), Some(8192.0));
        assert_eq!(parse_size_label_bytes("1.5 mb"), Some(1.5 * 1024.0 * 1024.0));
        assert_eq!(parse_size_label_bytes("512 bytes"), Some(512.0));
        assert_eq!(parse_size_label_bytes("about 8 KB"), None);
        assert_eq!(parse_size_label_bytes("8 records"), None);
    }

    #[test]
    fn test_size_labels_with_thousands_separators() {
        assert_eq!(parse_size_label_bytes("1,024 KB"), Some(1024.0 * 1024.0));
        assert_eq!(parse_size_label_bytes("12,345 bytes"), Some(12345.0));
        assert_eq!(parse_size_label_bytes("1,02 KB"), None);
    }
}
