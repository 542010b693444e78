//! Service configuration and the table-driven extraction heuristics.
//!
//! Service settings come from the environment (after `.env` is loaded). The
//! heuristic tables are built in (`default_tables`) and can be replaced by a JSON
//! file named in `EXTRACTION_TABLES`.

use crate::acquirer::FallbackPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Runtime settings for the HTTP front door and the external sources.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub analysis_api_url: String,
    pub gateway_url: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub on_exhausted: FallbackPolicy,
    pub bind_addr: String,
    pub tables_path: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let poll_interval_secs: u64 = env_parse("POLL_INTERVAL_SECS", 5)?;
        let max_attempts: u32 = env_parse("POLL_MAX_ATTEMPTS", 12)?;
        let on_exhausted: FallbackPolicy = env_parse("ON_EXHAUSTED", FallbackPolicy::Synthesize)?;

        Ok(Self {
            analysis_api_url: env_or("ANALYSIS_API_URL", "http://localhost:8000/api"),
            gateway_url: env_or("GATEWAY_URL", "https://gateway.lighthouse.storage/ipfs"),
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_attempts,
            on_exhausted,
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            tables_path: std::env::var("EXTRACTION_TABLES").ok().map(PathBuf::from),
        })
    }

    /// Extraction tables from `EXTRACTION_TABLES`, or the built-in ones.
    pub fn tables(&self) -> Result<ExtractionTables> {
        match &self.tables_path {
            Some(path) => ExtractionTables::load(path),
            None => Ok(default_tables()),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {}={:?}: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

// ============================================================================
// Extraction tables
// ============================================================================

/// Canonical numeric fields recovered by the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Rows,
    Columns,
    FileSize,
    QualityScore,
    Completeness,
    Consistency,
    Accuracy,
    Validity,
    AnomaliesTotal,
    AnomaliesHigh,
    AnomaliesMedium,
    AnomaliesLow,
    BiasOverall,
    GeographicBias,
    DemographicBias,
}

/// How attribute values for a field are read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueUnit {
    #[default]
    Plain,
    /// Human-readable byte sizes ("8 KB", "1.5 MB").
    Bytes,
}

/// Dotted lookup paths, relative to the payload root, per classified variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectPaths {
    #[serde(default)]
    pub structured: Vec<String>,
    #[serde(default)]
    pub original_file: Vec<String>,
    #[serde(default)]
    pub attributes_only: Vec<String>,
}

/// Everything the cascade needs to know about one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: FieldKey,
    /// Attribute trait name matched exactly (case-insensitive).
    pub canonical_name: String,
    /// Substrings matched against trait names (case-insensitive), in priority order.
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Trait names containing any of these never match a synonym.
    #[serde(default)]
    pub excludes: Vec<String>,
    /// When non-empty, a synonym match also needs one of these in the trait name.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Regex with one capture group holding the number.
    #[serde(default)]
    pub text_pattern: Option<String>,
    #[serde(default)]
    pub direct_paths: DirectPaths,
    /// Accept 0 as a real value instead of falling through.
    #[serde(default)]
    pub zero_is_valid: bool,
    /// Fall back to size-based estimation (rows/columns only).
    #[serde(default)]
    pub size_estimate: bool,
    #[serde(default)]
    pub unit: ValueUnit,
}

/// One size bucket of an estimation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeBucket {
    /// Upper bound in KB; `None` means unbounded.
    #[serde(default)]
    pub upper_kb: Option<f64>,
    #[serde(default)]
    pub upper_inclusive: bool,
    pub rows_per_kb: f64,
    pub columns_per_kb: f64,
}

/// Piecewise-linear rows/columns model for a family of file types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeModel {
    pub label: String,
    /// Lowercase extensions without the dot. Empty means "any".
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Lowercase substrings of the file name that also select this model.
    #[serde(default)]
    pub name_keywords: Vec<String>,
    pub buckets: Vec<SizeBucket>,
}

/// The full set of heuristic tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionTables {
    pub fields: Vec<FieldSpec>,
    /// Trait names (case-insensitive) that carry a human-readable file size.
    pub size_label_names: Vec<String>,
    /// Checked in order; the last entry should be a catch-all.
    pub size_models: Vec<SizeModel>,
}

impl ExtractionTables {
    /// Load tables from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read extraction tables: {:?}", path))?;
        let tables: ExtractionTables = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse extraction tables: {:?}", path))?;

        if tables.fields.is_empty() {
            anyhow::bail!("Extraction tables in {:?} define no fields", path);
        }

        info!(
            "Loaded extraction tables from {:?} ({} fields, {} size models)",
            path,
            tables.fields.len(),
            tables.size_models.len()
        );
        Ok(tables)
    }

    pub fn field(&self, key: FieldKey) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.field == key)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const COUNT_PREFIX: &str = r"(?i)\b(\d{1,3}(?:,\d{3})+|\d+)\s*";

/// Built-in tables.
pub fn default_tables() -> ExtractionTables {
    let percent = |field: FieldKey, name: &str, synonym: &str, structured: &[&str], original: &[&str]| FieldSpec {
        field,
        canonical_name: name.to_string(),
        synonyms: strings(&[synonym]),
        excludes: strings(&["bias", "anomal", "incomplete", "inconsisten", "inaccura", "invalid"]),
        requires: Vec::new(),
        text_pattern: Some(format!(r"(?i)(\d+(?:\.\d+)?)\s*%\s*{}", synonym)),
        direct_paths: DirectPaths {
            structured: strings(structured),
            original_file: strings(original),
            attributes_only: vec![format!("properties.{}", name.to_lowercase())],
        },
        zero_is_valid: false,
        size_estimate: false,
        unit: ValueUnit::Plain,
    };

    let severity = |field: FieldKey, name: &str, synonyms: &[&str], keys: &[&str]| FieldSpec {
        field,
        canonical_name: name.to_string(),
        synonyms: strings(synonyms),
        excludes: strings(&["bias", "quality", "score"]),
        requires: strings(&["anomal", "outlier"]),
        text_pattern: None,
        direct_paths: DirectPaths {
            structured: keys.iter().map(|k| format!("results.anomalies.{}", k)).collect(),
            original_file: keys.iter().map(|k| format!("analysis.anomalies.{}", k)).collect(),
            attributes_only: keys.iter().map(|k| format!("properties.anomalies.{}", k)).collect(),
        },
        zero_is_valid: true,
        size_estimate: false,
        unit: ValueUnit::Plain,
    };

    let bias_dimension = |field: FieldKey, name: &str, key: &str, synonyms: &[&str]| FieldSpec {
        field,
        canonical_name: name.to_string(),
        synonyms: strings(synonyms),
        excludes: Vec::new(),
        requires: Vec::new(),
        text_pattern: None,
        direct_paths: DirectPaths {
            structured: vec![
                format!("results.bias.{}.score", key),
                format!("results.bias.{}", key),
                format!("results.bias.{}_bias", key),
            ],
            original_file: vec![
                format!("analysis.bias.{}.score", key),
                format!("analysis.bias.{}", key),
                format!("analysis.bias.{}_bias", key),
            ],
            attributes_only: vec![format!("properties.bias.{}", key)],
        },
        zero_is_valid: true,
        size_estimate: false,
        unit: ValueUnit::Plain,
    };

    let fields = vec![
        FieldSpec {
            field: FieldKey::Rows,
            canonical_name: "Rows".to_string(),
            synonyms: strings(&["row", "record", "data point", "size", "count", "total"]),
            excludes: strings(&[
                "column", "feature", "anomal", "quality", "score", "bias", "incomplete", "invalid", "missing",
                "duplicate",
            ]),
            requires: Vec::new(),
            text_pattern: Some(format!(r"{}(?:rows?|records?|data\s*points?)\b", COUNT_PREFIX)),
            direct_paths: DirectPaths {
                structured: strings(&[
                    "results.metadata.rows",
                    "results.metadata.dimensions.rows",
                    "results.metadata.total_rows",
                    "results.basic_metrics.total_rows",
                    "metadata.rows",
                    "metadata.dimensions.rows",
                    "dataset_info.rows",
                ]),
                original_file: strings(&[
                    "originalFile.rows",
                    "analysis.metadata.rows",
                    "analysis.dataset_info.rows",
                    "analysis.basic_metrics.total_rows",
                    "analysis.rows",
                ]),
                attributes_only: strings(&["properties.rows", "rows"]),
            },
            zero_is_valid: false,
            size_estimate: true,
            unit: ValueUnit::Plain,
        },
        FieldSpec {
            field: FieldKey::Columns,
            canonical_name: "Columns".to_string(),
            synonyms: strings(&["column", "feature", "variable", "field", "attribute", "dimension"]),
            excludes: strings(&["row", "record"]),
            requires: Vec::new(),
            text_pattern: Some(format!(
                r"{}(?:columns?|features?|variables?|fields?)\b",
                COUNT_PREFIX
            )),
            direct_paths: DirectPaths {
                structured: strings(&[
                    "results.metadata.columns",
                    "results.metadata.dimensions.columns",
                    "results.metadata.total_columns",
                    "results.basic_metrics.total_columns",
                    "metadata.columns",
                    "metadata.dimensions.columns",
                    "dataset_info.columns",
                ]),
                original_file: strings(&[
                    "originalFile.columns",
                    "analysis.metadata.columns",
                    "analysis.dataset_info.columns",
                    "analysis.basic_metrics.total_columns",
                    "analysis.columns",
                ]),
                attributes_only: strings(&["properties.columns", "columns"]),
            },
            zero_is_valid: false,
            size_estimate: true,
            unit: ValueUnit::Plain,
        },
        FieldSpec {
            field: FieldKey::FileSize,
            canonical_name: "File Size".to_string(),
            synonyms: strings(&["size"]),
            excludes: Vec::new(),
            requires: Vec::new(),
            text_pattern: None,
            direct_paths: DirectPaths {
                structured: strings(&[
                    "results.metadata.size",
                    "results.metadata.size_bytes",
                    "results.metadata.file_size",
                    "dataset_info.size_bytes",
                ]),
                original_file: strings(&["originalFile.size", "analysis.dataset_info.size_bytes"]),
                attributes_only: strings(&["properties.size", "size"]),
            },
            zero_is_valid: false,
            size_estimate: false,
            unit: ValueUnit::Bytes,
        },
        FieldSpec {
            field: FieldKey::QualityScore,
            canonical_name: "Quality Score".to_string(),
            synonyms: strings(&["quality", "overall score"]),
            excludes: strings(&["completeness", "consistency", "accuracy", "validity", "bias", "anomal"]),
            requires: Vec::new(),
            text_pattern: Some(r"(?i)quality(?:\s*score)?\s*[:=]?\s*(\d+(?:\.\d+)?)".to_string()),
            direct_paths: DirectPaths {
                structured: strings(&[
                    "results.quality_metrics.overall",
                    "results.quality_metrics.overall_score",
                    "results.quality_score.total_score",
                    "results.quality_score",
                    "results.quality.overall_score",
                    "results.quality.overall",
                ]),
                original_file: strings(&[
                    "analysis.quality_metrics.overall",
                    "analysis.quality_score.total_score",
                    "analysis.quality_score",
                    "analysis.quality.overall_score",
                ]),
                attributes_only: strings(&["properties.quality_score"]),
            },
            zero_is_valid: false,
            size_estimate: false,
            unit: ValueUnit::Plain,
        },
        percent(
            FieldKey::Completeness,
            "Completeness",
            "complete",
            &[
                "results.quality_metrics.completeness",
                "results.quality_score.component_scores.completeness",
                "results.quality.components.completeness",
                "results.completeness",
            ],
            &[
                "analysis.quality_metrics.completeness",
                "analysis.quality_score.component_scores.completeness",
                "analysis.completeness",
            ],
        ),
        percent(
            FieldKey::Consistency,
            "Consistency",
            "consisten",
            &[
                "results.quality_metrics.consistency",
                "results.quality_score.component_scores.consistency",
                "results.quality.components.consistency",
                "results.consistency",
            ],
            &[
                "analysis.quality_metrics.consistency",
                "analysis.quality_score.component_scores.consistency",
                "analysis.consistency",
            ],
        ),
        percent(
            FieldKey::Accuracy,
            "Accuracy",
            "accura",
            &["results.quality_metrics.accuracy", "results.quality.components.accuracy", "results.accuracy"],
            &["analysis.quality_metrics.accuracy", "analysis.accuracy"],
        ),
        percent(
            FieldKey::Validity,
            "Validity",
            "valid",
            &[
                "results.quality_metrics.validity",
                "results.quality.components.validity",
                "results.validity_score",
                "results.validity",
            ],
            &["analysis.quality_metrics.validity", "analysis.validity_score", "analysis.validity"],
        ),
        FieldSpec {
            field: FieldKey::AnomaliesTotal,
            canonical_name: "Anomalies".to_string(),
            synonyms: strings(&["anomal", "outlier"]),
            excludes: strings(&["high", "medium", "low", "critical", "moderate", "minor", "score"]),
            requires: Vec::new(),
            text_pattern: Some(format!(r"{}(?:anomal(?:y|ies)|outliers?)\b", COUNT_PREFIX)),
            direct_paths: DirectPaths {
                structured: strings(&[
                    "results.anomalies.total",
                    "results.anomalies.count",
                    "results.anomalies.total_anomalies",
                    "results.anomaly_detection.total_anomalies",
                    "results.anomaly_count",
                ]),
                original_file: strings(&[
                    "analysis.anomalies.total",
                    "analysis.anomalies.count",
                    "analysis.anomaly_count",
                ]),
                attributes_only: strings(&["properties.anomalies.total", "properties.anomaly_count"]),
            },
            zero_is_valid: true,
            size_estimate: false,
            unit: ValueUnit::Plain,
        },
        severity(FieldKey::AnomaliesHigh, "High Anomalies", &["high", "critical"], &["high", "critical"]),
        severity(FieldKey::AnomaliesMedium, "Medium Anomalies", &["medium", "moderate"], &["medium", "moderate"]),
        severity(FieldKey::AnomaliesLow, "Low Anomalies", &["low", "minor"], &["low", "minor"]),
        FieldSpec {
            field: FieldKey::BiasOverall,
            canonical_name: "Bias Score".to_string(),
            synonyms: strings(&["bias"]),
            excludes: strings(&["geograph", "demograph"]),
            requires: Vec::new(),
            text_pattern: None,
            direct_paths: DirectPaths {
                structured: strings(&[
                    "results.bias.overall",
                    "results.bias.overall_score",
                    "results.bias.score",
                    "results.bias_analysis.overall_bias_score",
                    "results.bias_score",
                ]),
                original_file: strings(&[
                    "analysis.bias.overall",
                    "analysis.bias.score",
                    "analysis.bias_score",
                ]),
                attributes_only: strings(&["properties.bias.overall", "properties.bias_score"]),
            },
            zero_is_valid: true,
            size_estimate: false,
            unit: ValueUnit::Plain,
        },
        bias_dimension(FieldKey::GeographicBias, "Geographic Bias", "geographic", &["geograph", "region"]),
        bias_dimension(FieldKey::DemographicBias, "Demographic Bias", "demographic", &["demograph", "gender"]),
    ];

    let bucket = |upper_kb: Option<f64>, upper_inclusive: bool, rows_per_kb: f64, columns_per_kb: f64| SizeBucket {
        upper_kb,
        upper_inclusive,
        rows_per_kb,
        columns_per_kb,
    };

    let size_models = vec![
        SizeModel {
            label: "csv".to_string(),
            extensions: strings(&["csv"]),
            name_keywords: Vec::new(),
            buckets: vec![
                bucket(Some(1.0), false, 30.0, 5.0),
                bucket(Some(10.0), true, 100.0, 1.5),
                bucket(None, false, 200.0, 0.8),
            ],
        },
        SizeModel {
            label: "spreadsheet".to_string(),
            extensions: strings(&["xlsx", "xls"]),
            name_keywords: strings(&["spreadsheet"]),
            buckets: vec![bucket(Some(5.0), false, 15.0, 3.0), bucket(None, false, 25.0, 2.0)],
        },
        SizeModel {
            label: "json".to_string(),
            extensions: strings(&["json"]),
            name_keywords: Vec::new(),
            buckets: vec![bucket(Some(1.0), false, 20.0, 4.0), bucket(None, false, 150.0, 1.2)],
        },
        SizeModel {
            label: "other".to_string(),
            extensions: Vec::new(),
            name_keywords: Vec::new(),
            buckets: vec![bucket(None, false, 50.0, 2.0)],
        },
    ];

    ExtractionTables {
        fields,
        size_label_names: strings(&["file size", "size"]),
        size_models,
    }
}
