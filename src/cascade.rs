//! Per-field extraction cascade.
//!
//! Pure functions, no async. For each canonical field the strategies run in a
//! fixed order and the first one yielding an acceptable value wins:
//! direct path → attribute exact → attribute synonym → free-text regex → size estimate.

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::attributes::{is_size_attribute, parse_size_label_bytes, Attribute, AttributeResolver};
use crate::coerce::{coerce, coerce_str};
use crate::config::{ExtractionTables, FieldKey, FieldSpec, ValueUnit};
use crate::payload::{lookup, PayloadVariant, PayloadView};
use crate::size_estimate::SizeEstimator;

/// Which strategy produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DirectField,
    AttributeExact,
    AttributeSemantic,
    FreeText,
    SizeEstimate,
    /// Nothing matched; the value is the field default.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionOutcome {
    pub value: f64,
    pub strategy: Strategy,
}

impl ExtractionOutcome {
    pub fn default_value() -> Self {
        Self {
            value: 0.0,
            strategy: Strategy::Default,
        }
    }

    /// True when some strategy found the value in the payload.
    pub fn is_determinate(&self) -> bool {
        self.strategy != Strategy::Default
    }
}

/// Tables with their regexes compiled once.
pub struct CompiledTables {
    tables: ExtractionTables,
    patterns: HashMap<FieldKey, Regex>,
}

impl CompiledTables {
    /// Compile free-text patterns. Invalid regexes are skipped with a warning.
    pub fn compile(tables: ExtractionTables) -> Self {
        let mut patterns = HashMap::new();
        for spec in &tables.fields {
            let Some(pattern) = &spec.text_pattern else {
                continue;
            };
            match Regex::new(pattern) {
                Ok(regex) => {
                    patterns.insert(spec.field, regex);
                }
                Err(e) => {
                    warn!(
                        "Skipping invalid text pattern for {:?} ({}): {}",
                        spec.field, pattern, e
                    );
                }
            }
        }
        debug!("Compiled {} text patterns", patterns.len());
        Self { tables, patterns }
    }

    pub fn tables(&self) -> &ExtractionTables {
        &self.tables
    }

    pub fn spec(&self, key: FieldKey) -> Option<&FieldSpec> {
        self.tables.field(key)
    }

    pub fn pattern(&self, key: FieldKey) -> Option<&Regex> {
        self.patterns.get(&key)
    }
}

/// Cascade outputs for every field in the tables.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    outcomes: BTreeMap<FieldKey, ExtractionOutcome>,
}

impl ExtractedFields {
    pub fn insert(&mut self, key: FieldKey, outcome: ExtractionOutcome) {
        self.outcomes.insert(key, outcome);
    }

    pub fn get(&self, key: FieldKey) -> ExtractionOutcome {
        self.outcomes
            .get(&key)
            .copied()
            .unwrap_or_else(ExtractionOutcome::default_value)
    }

    pub fn value(&self, key: FieldKey) -> f64 {
        self.get(key).value
    }

    pub fn found(&self, key: FieldKey) -> bool {
        self.get(key).is_determinate()
    }

    pub fn any_found(&self, keys: &[FieldKey]) -> bool {
        keys.iter().any(|k| self.found(*k))
    }
}

pub struct FieldExtractionCascade<'t> {
    compiled: &'t CompiledTables,
}

impl<'t> FieldExtractionCascade<'t> {
    pub fn new(compiled: &'t CompiledTables) -> Self {
        Self { compiled }
    }

    /// Run the cascade for every field in the tables.
    pub fn extract_all(&self, view: &PayloadView<'_>) -> ExtractedFields {
        let mut fields = ExtractedFields::default();
        for spec in &self.compiled.tables().fields {
            fields.insert(spec.field, self.extract(view, spec.field));
        }
        fields
    }

    /// Extract one field. Never fails; falls back to 0 with [`Strategy::Default`].
    pub fn extract(&self, view: &PayloadView<'_>, key: FieldKey) -> ExtractionOutcome {
        let Some(spec) = self.compiled.spec(key) else {
            return ExtractionOutcome::default_value();
        };
        if matches!(view.variant, PayloadVariant::Unknown) {
            return ExtractionOutcome::default_value();
        }

        let resolver = AttributeResolver::new(&view.attributes);
        let found = self
            .direct(view, spec)
            .map(|v| (Strategy::DirectField, v))
            .or_else(|| self.attribute_exact(&resolver, spec).map(|v| (Strategy::AttributeExact, v)))
            .or_else(|| {
                self.attribute_semantic(&resolver, spec)
                    .map(|v| (Strategy::AttributeSemantic, v))
            })
            .or_else(|| self.free_text(view, spec).map(|v| (Strategy::FreeText, v)))
            .or_else(|| {
                self.size_estimate(view, &resolver, spec)
                    .map(|v| (Strategy::SizeEstimate, v))
            });

        match found {
            Some((strategy, value)) => {
                debug!("{:?} = {} via {:?}", key, value, strategy);
                ExtractionOutcome { value, strategy }
            }
            None => {
                debug!("{:?} not found, using default", key);
                ExtractionOutcome::default_value()
            }
        }
    }

    fn direct(&self, view: &PayloadView<'_>, spec: &FieldSpec) -> Option<f64> {
        let paths = match view.variant {
            PayloadVariant::StructuredResults { .. } => &spec.direct_paths.structured,
            PayloadVariant::OriginalFilePlusAnalysis { .. } => &spec.direct_paths.original_file,
            PayloadVariant::AttributesOnly { .. } => &spec.direct_paths.attributes_only,
            PayloadVariant::Unknown => return None,
        };

        paths
            .iter()
            .filter_map(|p| lookup(view.root, p))
            .filter_map(|v| read_value(spec, v))
            .find(|v| accepts(spec, *v))
    }

    fn attribute_exact(&self, resolver: &AttributeResolver<'_>, spec: &FieldSpec) -> Option<f64> {
        resolver
            .exact(&spec.canonical_name)
            .and_then(|a| read_attribute(spec, a))
            .filter(|v| accepts(spec, *v))
    }

    fn attribute_semantic(&self, resolver: &AttributeResolver<'_>, spec: &FieldSpec) -> Option<f64> {
        let size_names = &self.compiled.tables().size_label_names;
        resolver
            .semantic(&spec.synonyms, &spec.excludes, &spec.requires, |a| {
                spec.unit == ValueUnit::Bytes || !is_size_attribute(a, size_names)
            })
            .into_iter()
            .filter_map(|a| read_attribute(spec, a))
            .find(|v| accepts(spec, *v))
    }

    fn free_text(&self, view: &PayloadView<'_>, spec: &FieldSpec) -> Option<f64> {
        let regex = self.compiled.pattern(spec.field)?;

        let attribute_texts = view.attributes.iter().filter_map(|a| a.value.as_text());
        let sources = attribute_texts
            .chain(view.name.as_deref())
            .chain(view.description.as_deref());

        for text in sources {
            for caps in regex.captures_iter(text) {
                let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
                    continue;
                };
                if let Some(v) = coerce_str(m.as_str()).filter(|v| accepts(spec, *v)) {
                    return Some(v);
                }
            }
        }
        None
    }

    fn size_estimate(
        &self,
        view: &PayloadView<'_>,
        resolver: &AttributeResolver<'_>,
        spec: &FieldSpec,
    ) -> Option<f64> {
        if !spec.size_estimate {
            return None;
        }
        let tables = self.compiled.tables();
        let label = resolver.exact_any(&tables.size_label_names)?.value.to_display();
        let file_name = view.name.as_deref().unwrap_or("");

        let estimate = SizeEstimator::new(&tables.size_models).estimate(&label, file_name);
        let count = match spec.field {
            FieldKey::Rows => estimate.rows,
            FieldKey::Columns => estimate.columns,
            _ => return None,
        };

        Some(count as f64).filter(|v| accepts(spec, *v))
    }
}

fn accepts(spec: &FieldSpec, value: f64) -> bool {
    value.is_finite() && if spec.zero_is_valid { value >= 0.0 } else { value > 0.0 }
}

fn read_value(spec: &FieldSpec, value: &Value) -> Option<f64> {
    match (spec.unit, value) {
        (ValueUnit::Bytes, Value::String(s)) => parse_size_label_bytes(s).or_else(|| coerce_str(s)),
        _ => coerce(value),
    }
}

fn read_attribute(spec: &FieldSpec, attr: &Attribute) -> Option<f64> {
    match (spec.unit, attr.value.as_text()) {
        (ValueUnit::Bytes, Some(s)) => parse_size_label_bytes(s).or_else(|| coerce_str(s)),
        _ => attr.value.as_number(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tables;
    use serde_json::json;

    fn run(payload: &Value, key: FieldKey) -> ExtractionOutcome {
        let compiled = CompiledTables::compile(default_tables());
        let view = PayloadView::new(payload);
        FieldExtractionCascade::new(&compiled).extract(&view, key)
    }

    #[test]
    fn test_direct_lookup_beats_attributes() {
        let p = json!({
            "results": {"metadata": {"rows": 1234}},
            "attributes": [{"trait_type": "Rows", "value": 99}]
        });
        let out = run(&p, FieldKey::Rows);
        assert_eq!(out.value, 1234.0);
        assert_eq!(out.strategy, Strategy::DirectField);
    }

    #[test]
    fn test_exact_attribute_case_insensitive() {
        let p = json!({"attributes": [{"trait_type": "ROWS", "value": 500}]});
        let out = run(&p, FieldKey::Rows);
        assert_eq!(out.value, 500.0);
        assert_eq!(out.strategy, Strategy::AttributeExact);
    }

    #[test]
    fn test_exact_attribute_with_text_value() {
        let p = json!({"attributes": [
            {"trait_type": "Rows", "value": "1,200 records"},
            {"trait_type": "Columns", "value": 8}
        ]});
        assert_eq!(run(&p, FieldKey::Rows).value, 1200.0);
        assert_eq!(run(&p, FieldKey::Columns).value, 8.0);
    }

    #[test]
    fn test_synonym_match() {
        let p = json!({"attributes": [
            {"trait_type": "Number of Data Points", "value": "3,400"},
            {"trait_type": "Feature Dimension", "value": 14}
        ]});
        let rows = run(&p, FieldKey::Rows);
        assert_eq!(rows.value, 3400.0);
        assert_eq!(rows.strategy, Strategy::AttributeSemantic);
        assert_eq!(run(&p, FieldKey::Columns).value, 14.0);
    }

    #[test]
    fn test_row_and_column_stems() {
        let p = json!({"attributes": [
            {"trait_type": "Row Count", "value": 500},
            {"trait_type": "Column Count", "value": 9}
        ]});
        assert_eq!(run(&p, FieldKey::Rows).value, 500.0);
        assert_eq!(run(&p, FieldKey::Columns).value, 9.0);

        let p = json!({"attributes": [
            {"trait_type": "Number of Columns", "value": 9},
            {"trait_type": "Number of Rows", "value": 500}
        ]});
        let rows = run(&p, FieldKey::Rows);
        assert_eq!(rows.value, 500.0);
        assert_eq!(rows.strategy, Strategy::AttributeSemantic);
        assert_eq!(run(&p, FieldKey::Columns).value, 9.0);
    }

    #[test]
    fn test_unrelated_names_do_not_fill_metrics() {
        let p = json!({"attributes": [
            {"trait_type": "Rows", "value": 1000},
            {"trait_type": "Flow Rate", "value": 12},
            {"trait_type": "Highway Count", "value": 3},
            {"trait_type": "Minority Share", "value": 7},
            {"trait_type": "Invalid Values", "value": 30},
            {"trait_type": "Incomplete Rows", "value": 40}
        ]});
        for key in [
            FieldKey::AnomaliesTotal,
            FieldKey::AnomaliesHigh,
            FieldKey::AnomaliesMedium,
            FieldKey::AnomaliesLow,
            FieldKey::Validity,
            FieldKey::Completeness,
        ] {
            assert_eq!(run(&p, key).strategy, Strategy::Default, "{:?}", key);
        }
        assert_eq!(run(&p, FieldKey::Rows).value, 1000.0);
    }

    #[test]
    fn test_severity_synonyms_need_anomaly_wording() {
        let p = json!({"attributes": [
            {"trait_type": "Critical Anomalies", "value": 2},
            {"trait_type": "Minor Outliers", "value": 6}
        ]});
        assert_eq!(run(&p, FieldKey::AnomaliesHigh).value, 2.0);
        assert_eq!(run(&p, FieldKey::AnomaliesLow).value, 6.0);
    }

    #[test]
    fn test_file_size_is_not_a_row_count() {
        let p = json!({
            "name": "data.csv",
            "attributes": [{"trait_type": "File Size", "value": "8 KB"}]
        });
        let rows = run(&p, FieldKey::Rows);
        assert_eq!(rows.value, 800.0);
        assert_eq!(rows.strategy, Strategy::SizeEstimate);
        assert_eq!(run(&p, FieldKey::Columns).value, 12.0);
        assert_eq!(run(&p, FieldKey::FileSize).value, 8192.0);
    }

    #[test]
    fn test_grouped_file_size_label() {
        let p = json!({
            "name": "big.csv",
            "attributes": [{"trait_type": "File Size", "value": "1,024 KB"}]
        });
        assert_eq!(run(&p, FieldKey::Rows).value, 204800.0);
        assert_eq!(run(&p, FieldKey::Columns).value, 819.0);
        assert_eq!(run(&p, FieldKey::FileSize).value, 1048576.0);
    }

    #[test]
    fn test_free_text_from_description() {
        let p = json!({
            "name": "survey",
            "description": "Household survey with 2,350 records across 17 variables",
            "attributes": []
        });
        let rows = run(&p, FieldKey::Rows);
        assert_eq!(rows.value, 2350.0);
        assert_eq!(rows.strategy, Strategy::FreeText);
        assert_eq!(run(&p, FieldKey::Columns).value, 17.0);
    }

    #[test]
    fn test_zero_accepted_only_where_valid() {
        let p = json!({"results": {
            "metadata": {"rows": 0},
            "anomalies": {"total": 0}
        }});
        let rows = run(&p, FieldKey::Rows);
        assert_eq!(rows.strategy, Strategy::Default);

        let anomalies = run(&p, FieldKey::AnomaliesTotal);
        assert_eq!(anomalies.value, 0.0);
        assert_eq!(anomalies.strategy, Strategy::DirectField);
    }

    #[test]
    fn test_unknown_variant_defaults_everything() {
        let p = json!({"name": "data.csv", "rows": 50});
        let compiled = CompiledTables::compile(default_tables());
        let view = PayloadView::new(&p);
        let fields = FieldExtractionCascade::new(&compiled).extract_all(&view);
        assert!(!fields.found(FieldKey::Rows));
        assert!(!fields.any_found(&[FieldKey::QualityScore, FieldKey::AnomaliesTotal]));
    }

    #[test]
    fn test_original_file_shape() {
        let p = json!({
            "originalFile": {"name": "x.json", "size": 2048, "rows": 40, "columns": 6},
            "analysis": {"quality_score": {"total_score": 77.5}, "anomalies": {"count": 3, "critical": 1}}
        });
        assert_eq!(run(&p, FieldKey::Rows).value, 40.0);
        assert_eq!(run(&p, FieldKey::FileSize).value, 2048.0);
        assert_eq!(run(&p, FieldKey::QualityScore).value, 77.5);
        assert_eq!(run(&p, FieldKey::AnomaliesTotal).value, 3.0);
        assert_eq!(run(&p, FieldKey::AnomaliesHigh).value, 1.0);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let mut tables = default_tables();
        tables.fields[0].text_pattern = Some("(unclosed".to_string());
        let compiled = CompiledTables::compile(tables);
        assert!(compiled.pattern(FieldKey::Rows).is_none());
        assert!(compiled.pattern(FieldKey::Columns).is_some());
    }
}
