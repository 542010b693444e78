//! Merge cascade outputs into a structurally complete [`CanonicalDatasetReport`].
//!
//! A metric group counts as present when at least one of its fields was found by
//! some strategy. Absent groups get the [`DefaultProfile`] literals.

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::attributes::AttributeResolver;
use crate::cascade::ExtractedFields;
use crate::config::FieldKey;
use crate::payload::{lookup, lookup_text, PayloadView, VariantKind};
use crate::report::{
    format_bytes, AnomalyDetail, AnomalySummary, BiasDimension, BiasSummary, CanonicalDatasetReport,
    DefaultProfile, FileMetadata, Insight, Provenance, QualityMetrics, ReportSource, UNKNOWN_FORMAT,
    UNKNOWN_NAME, UNKNOWN_TIMESTAMP,
};

const QUALITY_FIELDS: &[FieldKey] = &[
    FieldKey::QualityScore,
    FieldKey::Completeness,
    FieldKey::Consistency,
    FieldKey::Accuracy,
    FieldKey::Validity,
];

const ANOMALY_FIELDS: &[FieldKey] = &[
    FieldKey::AnomaliesTotal,
    FieldKey::AnomaliesHigh,
    FieldKey::AnomaliesMedium,
    FieldKey::AnomaliesLow,
];

const BIAS_FIELDS: &[FieldKey] = &[
    FieldKey::BiasOverall,
    FieldKey::GeographicBias,
    FieldKey::DemographicBias,
];

const FORMAT_PATHS: &[&str] = &[
    "results.metadata.format",
    "results.metadata.file_type",
    "dataset_info.file_type",
    "originalFile.type",
    "originalFile.format",
    "format",
];

const UPLOADED_AT_PATHS: &[&str] = &[
    "results.metadata.uploaded_at",
    "results.metadata.upload_date",
    "metadata.uploaded_at",
    "dataset_info.upload_date",
    "originalFile.uploadedAt",
    "originalFile.uploaded_at",
    "uploaded_at",
    "uploadedAt",
];

const INSIGHT_PATHS: &[&str] = &[
    "results.insights",
    "analysis.insights",
    "insights",
    "properties.insights",
];

const ANOMALY_DETAIL_PATHS: &[&str] = &[
    "results.anomalies.examples",
    "results.anomalies.details",
    "analysis.anomalies.examples",
    "analysis.anomalies.details",
    "properties.anomalies.details",
];

/// Stateless; the same view and fields always assemble to the same report.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalAssembler;

impl CanonicalAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, view: &PayloadView<'_>, fields: &ExtractedFields) -> CanonicalDatasetReport {
        let variant = view.kind();
        let resolver = AttributeResolver::new(&view.attributes);

        let report = CanonicalDatasetReport {
            provenance: Provenance {
                source: ReportSource::Reconciled,
                variant,
                payload_digest: Some(payload_digest(view.root)),
            },
            file_metadata: file_metadata(view, &resolver, fields),
            quality: quality(fields),
            anomalies: anomalies(view, fields),
            bias: bias(view, fields),
            insights: insights(view),
        };

        debug!(
            "Assembled report for {:?} payload: {} rows x {} columns, quality {}",
            variant, report.file_metadata.rows, report.file_metadata.columns, report.quality.overall
        );
        report
    }
}

fn file_metadata(view: &PayloadView<'_>, resolver: &AttributeResolver<'_>, fields: &ExtractedFields) -> FileMetadata {
    if view.kind() == VariantKind::Unknown {
        return DefaultProfile::file_metadata();
    }

    let name = view.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let size_bytes = count(fields, FieldKey::FileSize);

    let format = lookup_text(view.root, FORMAT_PATHS)
        .or_else(|| attribute_text(resolver, &["format", "file type", "file format"]))
        .or_else(|| extension_of(&name))
        .map(|f| f.trim_start_matches('.').to_uppercase())
        .unwrap_or_else(|| UNKNOWN_FORMAT.to_string());

    let uploaded_at = lookup_text(view.root, UPLOADED_AT_PATHS)
        .or_else(|| attribute_text(resolver, &["upload date", "uploaded at", "uploaded"]))
        .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string());

    FileMetadata {
        name,
        size_bytes,
        size_display: format_bytes(size_bytes),
        rows: count(fields, FieldKey::Rows),
        columns: count(fields, FieldKey::Columns),
        format,
        uploaded_at,
    }
}

/// Hex SHA-256 of the payload's serialized form. Object keys serialize sorted, so
/// equal trees give equal digests.
pub fn payload_digest(root: &Value) -> String {
    let bytes = serde_json::to_vec(root).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

fn count(fields: &ExtractedFields, key: FieldKey) -> u64 {
    fields.value(key).max(0.0).round() as u64
}

fn percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Bias scores above 1 are percentages.
fn bias_score(value: f64) -> f64 {
    let value = if value > 1.0 { value / 100.0 } else { value };
    value.clamp(0.0, 1.0)
}

fn attribute_text(resolver: &AttributeResolver<'_>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| resolver.exact(n))
        .map(|a| a.value.to_display())
        .filter(|s| !s.trim().is_empty())
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_string())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn quality(fields: &ExtractedFields) -> QualityMetrics {
    if !fields.any_found(QUALITY_FIELDS) {
        return DefaultProfile::quality();
    }

    let defaults = DefaultProfile::quality();
    let pick = |key: FieldKey, default: f64| {
        if fields.found(key) {
            percent(fields.value(key))
        } else {
            default
        }
    };

    QualityMetrics {
        overall: pick(FieldKey::QualityScore, defaults.overall),
        completeness: pick(FieldKey::Completeness, defaults.completeness),
        consistency: pick(FieldKey::Consistency, defaults.consistency),
        accuracy: pick(FieldKey::Accuracy, defaults.accuracy),
        validity: pick(FieldKey::Validity, defaults.validity),
    }
}

fn anomalies(view: &PayloadView<'_>, fields: &ExtractedFields) -> AnomalySummary {
    if !fields.any_found(ANOMALY_FIELDS) {
        return DefaultProfile::anomalies();
    }

    let high = count(fields, FieldKey::AnomaliesHigh);
    let medium = count(fields, FieldKey::AnomaliesMedium);
    let low = count(fields, FieldKey::AnomaliesLow);
    let sum = high + medium + low;

    let total = if fields.found(FieldKey::AnomaliesTotal) {
        let total = count(fields, FieldKey::AnomaliesTotal);
        let any_severity = fields.any_found(&ANOMALY_FIELDS[1..]);
        if any_severity && total != sum {
            warn!(
                "Anomaly total {} does not match severity counts {}+{}+{}; keeping source total",
                total, high, medium, low
            );
        }
        total
    } else {
        sum
    };

    AnomalySummary {
        total,
        high,
        medium,
        low,
        details: anomaly_details(view),
    }
}

fn anomaly_details(view: &PayloadView<'_>) -> Vec<AnomalyDetail> {
    let Some(items) = ANOMALY_DETAIL_PATHS
        .iter()
        .find_map(|p| lookup(view.root, p).and_then(Value::as_array))
    else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(AnomalyDetail {
                severity: "unspecified".to_string(),
                description: s.trim().to_string(),
            }),
            Value::Object(_) => {
                let description = lookup_text(item, &["description", "message", "detail", "reason"])?;
                let severity = lookup_text(item, &["severity", "level"])
                    .unwrap_or_else(|| "unspecified".to_string())
                    .to_lowercase();
                Some(AnomalyDetail {
                    severity,
                    description,
                })
            }
            _ => None,
        })
        .collect()
}

fn bias(view: &PayloadView<'_>, fields: &ExtractedFields) -> BiasSummary {
    if !fields.any_found(BIAS_FIELDS) {
        return DefaultProfile::bias();
    }

    let defaults = DefaultProfile::bias();
    let geographic = bias_dimension(view, fields, FieldKey::GeographicBias, "geographic", defaults.geographic);
    let demographic = bias_dimension(view, fields, FieldKey::DemographicBias, "demographic", defaults.demographic);

    let overall = if fields.found(FieldKey::BiasOverall) {
        bias_score(fields.value(FieldKey::BiasOverall))
    } else {
        let mut found = Vec::new();
        if fields.found(FieldKey::GeographicBias) {
            found.push(geographic.score);
        }
        if fields.found(FieldKey::DemographicBias) {
            found.push(demographic.score);
        }
        found.iter().sum::<f64>() / found.len().max(1) as f64
    };

    BiasSummary {
        overall,
        geographic,
        demographic,
    }
}

fn bias_dimension(
    view: &PayloadView<'_>,
    fields: &ExtractedFields,
    key: FieldKey,
    label: &str,
    default: BiasDimension,
) -> BiasDimension {
    if !fields.found(key) {
        return default;
    }

    let score = bias_score(fields.value(key));
    let block = |field: &str| {
        [
            format!("results.bias.{}.{}", label, field),
            format!("analysis.bias.{}.{}", label, field),
        ]
    };
    let text = |field: &str| {
        let paths = block(field);
        lookup_text(view.root, &[paths[0].as_str(), paths[1].as_str()])
    };

    let description = text("description")
        .unwrap_or_else(|| format!("{} bias score of {:.2}.", capitalize(label), score));
    let mut dimension = BiasDimension::from_score(score, description);
    if let Some(status) = text("status") {
        dimension.status = status;
    }
    dimension
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn insights(view: &PayloadView<'_>) -> Vec<Insight> {
    if view.kind() == VariantKind::Unknown {
        return DefaultProfile::insights();
    }

    let parsed: Vec<Insight> = INSIGHT_PATHS
        .iter()
        .find_map(|p| lookup(view.root, p).and_then(Value::as_array))
        .map(|items| items.iter().filter_map(insight_from).collect())
        .unwrap_or_default();

    if parsed.is_empty() {
        DefaultProfile::insights()
    } else {
        parsed
    }
}

fn insight_from(item: &Value) -> Option<Insight> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(Insight::new(
            "info",
            "Analysis finding",
            s.trim(),
            "Review this finding before using the dataset.",
        )),
        Value::Object(_) => {
            let description = lookup_text(item, &["description", "message", "text"]);
            let title = lookup_text(item, &["title", "name"]);
            if description.is_none() && title.is_none() {
                return None;
            }
            let title = title.unwrap_or_else(|| "Analysis finding".to_string());
            Some(Insight {
                kind: lookup_text(item, &["type", "kind", "category"]).unwrap_or_else(|| "info".to_string()),
                description: description.unwrap_or_else(|| title.clone()),
                title,
                action: lookup_text(item, &["action", "recommendation"])
                    .unwrap_or_else(|| "No action required.".to_string()),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{CompiledTables, FieldExtractionCascade};
    use crate::config::default_tables;
    use serde_json::json;

    fn assemble(payload: &Value) -> CanonicalDatasetReport {
        let compiled = CompiledTables::compile(default_tables());
        let view = PayloadView::new(payload);
        let fields = FieldExtractionCascade::new(&compiled).extract_all(&view);
        CanonicalAssembler::new().assemble(&view, &fields)
    }

    #[test]
    fn test_empty_object_gets_full_default_report() {
        let report = assemble(&json!({}));
        let synthetic = CanonicalDatasetReport::synthetic_fallback();

        assert_eq!(report.provenance.source, ReportSource::Reconciled);
        assert_eq!(report.provenance.variant, VariantKind::Unknown);
        assert!(report.provenance.payload_digest.is_some());
        assert_eq!(report.file_metadata, synthetic.file_metadata);
        assert_eq!(report.quality, synthetic.quality);
        assert_eq!(report.anomalies, synthetic.anomalies);
        assert_eq!(report.bias, synthetic.bias);
        assert_eq!(report.insights, synthetic.insights);
    }

    #[test]
    fn test_structured_backend_payload() {
        let payload = json!({
            "metadata": {"analysis_id": "7"},
            "results": {
                "metadata": {
                    "file_name": "loans.csv",
                    "uploaded_at": "2024-03-01T10:00:00Z",
                    "dimensions": {"rows": 1500, "columns": 12}
                },
                "quality": {"overall_score": 92.5, "components": {"completeness": 97}},
                "anomalies": {"count": 4, "critical": 1, "moderate": 3, "examples": ["Row 17 has a negative balance"]},
                "bias": {"score": 35, "imbalanced_fields": ["region"]},
                "insights": ["Income is skewed to the right"]
            }
        });
        let report = assemble(&payload);

        assert_eq!(report.file_metadata.name, "loans.csv");
        assert_eq!(report.file_metadata.format, "CSV");
        assert_eq!(report.file_metadata.uploaded_at, "2024-03-01T10:00:00Z");
        assert_eq!((report.file_metadata.rows, report.file_metadata.columns), (1500, 12));

        assert_eq!(report.quality.overall, 92.5);
        assert_eq!(report.quality.completeness, 97.0);
        assert_eq!(report.quality.consistency, 80.0);

        assert_eq!(report.anomalies.total, 4);
        assert_eq!((report.anomalies.high, report.anomalies.medium, report.anomalies.low), (1, 3, 0));
        assert_eq!(report.anomalies.details.len(), 1);

        assert!((report.bias.overall - 0.35).abs() < 1e-9);
        assert_eq!(report.bias.geographic, DefaultProfile::bias().geographic);

        assert_eq!(report.insights.len(), 1);
        assert_eq!(report.insights[0].description, "Income is skewed to the right");
    }

    #[test]
    fn test_anomaly_total_mismatch_passes_through() {
        let payload = json!({"results": {
            "metadata": {},
            "anomalies": {"total": 10, "high": 1, "medium": 1, "low": 1}
        }});
        let report = assemble(&payload);
        assert_eq!(report.anomalies.total, 10);
        assert_eq!(report.anomalies.high + report.anomalies.medium + report.anomalies.low, 3);
    }

    #[test]
    fn test_anomaly_total_from_severities() {
        let payload = json!({"attributes": [
            {"trait_type": "High Anomalies", "value": 2},
            {"trait_type": "Low Anomalies", "value": 5}
        ]});
        let report = assemble(&payload);
        assert_eq!(report.anomalies.total, 7);
        assert_eq!(report.anomalies.medium, 0);
    }

    #[test]
    fn test_lookalike_names_keep_default_profile() {
        let payload = json!({"attributes": [
            {"trait_type": "Rows", "value": 1000},
            {"trait_type": "Flow Rate", "value": 12},
            {"trait_type": "Invalid Values", "value": 30},
            {"trait_type": "Incomplete Rows", "value": 40}
        ]});
        let report = assemble(&payload);
        let a = &report.anomalies;
        assert_eq!((a.total, a.high, a.medium, a.low), (5, 1, 2, 2));
        assert_eq!(report.quality.validity, 88.0);
        assert_eq!(report.quality.completeness, 90.0);
        assert_eq!(report.file_metadata.rows, 1000);
    }

    #[test]
    fn test_clamping() {
        let payload = json!({"results": {
            "metadata": {},
            "quality_score": {"total_score": 140},
            "bias": {"overall": 250, "geographic": {"score": 0.4, "description": "Mostly one region"}}
        }});
        let report = assemble(&payload);
        assert_eq!(report.quality.overall, 100.0);
        assert_eq!(report.bias.overall, 1.0);
        assert_eq!(report.bias.geographic.status, "High");
        assert_eq!(report.bias.geographic.description, "Mostly one region");
    }

    #[test]
    fn test_file_size_display() {
        let payload = json!({
            "name": "data.csv",
            "attributes": [{"trait_type": "File Size", "value": "1.5 KB"}]
        });
        let report = assemble(&payload);
        assert_eq!(report.file_metadata.size_bytes, 1536);
        assert_eq!(report.file_metadata.size_display, "1.5 KB");
        assert_eq!(report.file_metadata.format, "CSV");
    }

    #[test]
    fn test_object_insights() {
        let payload = json!({
            "originalFile": {"name": "x.json"},
            "analysis": {"insights": [
                {"type": "warning", "title": "Sparse column", "description": "notes is 60% empty", "recommendation": "Drop it"},
                42
            ]}
        });
        let report = assemble(&payload);
        assert_eq!(report.insights.len(), 1);
        assert_eq!(report.insights[0].kind, "warning");
        assert_eq!(report.insights[0].action, "Drop it");
    }

    #[test]
    fn test_digest_is_stable() {
        let a = json!({"b": 1, "a": [1, 2]});
        let b = json!({"a": [1, 2], "b": 1});
        assert_eq!(payload_digest(&a), payload_digest(&b));
        assert_eq!(payload_digest(&a).len(), 64);
    }
}
