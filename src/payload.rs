//! Raw payload classification.
//!
//! Upstream producers emit several JSON shapes. [`classify`] assigns a payload to
//! exactly one of them, once, and everything downstream matches on the result.

use crate::attributes::{parse_attributes, Attribute};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag-only view of a [`PayloadVariant`], used for logging and provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    StructuredResults,
    OriginalFilePlusAnalysis,
    AttributesOnly,
    Unknown,
}

/// A classified payload, borrowing the blocks that identified it.
#[derive(Debug, Clone, Copy)]
pub enum PayloadVariant<'a> {
    /// `results.metadata` is present.
    StructuredResults {
        results: &'a Map<String, Value>,
        metadata: &'a Value,
    },
    /// Separate `originalFile` and `analysis` blocks.
    OriginalFilePlusAnalysis {
        original_file: &'a Value,
        analysis: &'a Value,
    },
    /// Flat `attributes: [{trait_type, value}]` list.
    AttributesOnly { attributes: &'a [Value] },
    Unknown,
}

impl PayloadVariant<'_> {
    pub fn kind(&self) -> VariantKind {
        match self {
            PayloadVariant::StructuredResults { .. } => VariantKind::StructuredResults,
            PayloadVariant::OriginalFilePlusAnalysis { .. } => VariantKind::OriginalFilePlusAnalysis,
            PayloadVariant::AttributesOnly { .. } => VariantKind::AttributesOnly,
            PayloadVariant::Unknown => VariantKind::Unknown,
        }
    }
}

fn present(v: Option<&Value>) -> Option<&Value> {
    v.filter(|v| !v.is_null())
}

/// Classify a payload. First matching rule wins:
/// 1. `results.metadata` exists
/// 2. `originalFile` and `analysis` both exist
/// 3. `attributes` is an array
/// 4. otherwise `Unknown`
pub fn classify(payload: &Value) -> PayloadVariant<'_> {
    if let Some(results) = payload.get("results").and_then(Value::as_object) {
        if let Some(metadata) = present(results.get("metadata")) {
            return PayloadVariant::StructuredResults { results, metadata };
        }
    }

    if let (Some(original_file), Some(analysis)) = (
        present(payload.get("originalFile")),
        present(payload.get("analysis")),
    ) {
        return PayloadVariant::OriginalFilePlusAnalysis {
            original_file,
            analysis,
        };
    }

    if let Some(attributes) = payload.get("attributes").and_then(Value::as_array) {
        return PayloadVariant::AttributesOnly { attributes };
    }

    PayloadVariant::Unknown
}

/// Resolve a dotted path (`results.metadata.rows`) against a JSON tree.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |node, key| node.get(key))
        .filter(|v| !v.is_null())
}

/// First non-empty string found at any of `paths`.
pub fn lookup_text(root: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| {
        lookup(root, p)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// A classified payload plus the pieces every strategy needs.
#[derive(Debug)]
pub struct PayloadView<'a> {
    pub root: &'a Value,
    pub variant: PayloadVariant<'a>,
    pub attributes: Vec<Attribute>,
    pub name: Option<String>,
    pub description: Option<String>,
}

const NAME_PATHS: &[&str] = &[
    "results.metadata.name",
    "results.metadata.file_name",
    "metadata.file_name",
    "dataset_info.original_filename",
    "originalFile.name",
    "name",
];

const DESCRIPTION_PATHS: &[&str] = &[
    "results.metadata.description",
    "originalFile.description",
    "description",
];

impl<'a> PayloadView<'a> {
    pub fn new(root: &'a Value) -> Self {
        let variant = classify(root);

        // Attributes may ride along on any recognized shape.
        let attributes = match variant {
            PayloadVariant::Unknown => Vec::new(),
            PayloadVariant::AttributesOnly { attributes } => parse_attributes(attributes),
            _ => root
                .get("attributes")
                .and_then(Value::as_array)
                .map(|a| parse_attributes(a))
                .unwrap_or_default(),
        };

        let (name, description) = match variant {
            PayloadVariant::Unknown => (None, None),
            _ => (lookup_text(root, NAME_PATHS), lookup_text(root, DESCRIPTION_PATHS)),
        };

        Self {
            root,
            variant,
            attributes,
            name,
            description,
        }
    }

    pub fn kind(&self) -> VariantKind {
        self.variant.kind()
    }
}
