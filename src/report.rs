//! Canonical dataset report: the single output type every consumer reads.
//!
//! Every field is always present. Groups the source did not supply are filled
//! from [`DefaultProfile`], the same literals used for the synthetic fallback.

use crate::payload::VariantKind;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_NAME: &str = "Untitled dataset";
pub const UNKNOWN_FORMAT: &str = "UNKNOWN";
pub const UNKNOWN_TIMESTAMP: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalDatasetReport {
    pub provenance: Provenance,
    pub file_metadata: FileMetadata,
    pub quality: QualityMetrics,
    pub anomalies: AnomalySummary,
    pub bias: BiasSummary,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    Reconciled,
    SyntheticFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source: ReportSource,
    pub variant: VariantKind,
    /// Hex SHA-256 of the serialized source payload. Omitted for synthetic reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size_bytes: u64,
    /// `size_bytes` in the largest unit ≥ 1, e.g. "1.5 KB".
    pub size_display: String,
    pub rows: u64,
    pub columns: u64,
    pub format: String,
    pub uploaded_at: String,
}

/// Percentages in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub overall: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub accuracy: f64,
    pub validity: f64,
}

/// `total` is passed through from the source and may differ from `high + medium + low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalySummary {
    pub total: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub details: Vec<AnomalyDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyDetail {
    pub severity: String,
    pub description: String,
}

/// Scores in [0, 1]; higher means more bias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasSummary {
    pub overall: f64,
    pub geographic: BiasDimension,
    pub demographic: BiasDimension,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasDimension {
    pub score: f64,
    pub status: String,
    pub description: String,
}

impl BiasDimension {
    /// Build a dimension whose status is derived from the score.
    pub fn from_score(score: f64, description: impl Into<String>) -> Self {
        Self {
            score,
            status: bias_status(score).to_string(),
            description: description.into(),
        }
    }

    /// Score redisplayed as a fairness percentage, for presentation layers.
    pub fn fairness_percent(&self) -> u8 {
        ((1.0 - self.score.clamp(0.0, 1.0)) * 100.0).round() as u8
    }
}

/// Status label for a bias score.
pub fn bias_status(score: f64) -> &'static str {
    if score < 0.15 {
        "Low"
    } else if score < 0.30 {
        "Moderate"
    } else {
        "High"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: String,
    pub action: String,
}

impl Insight {
    pub fn new(kind: &str, title: &str, description: &str, action: &str) -> Self {
        Self {
            kind: kind.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            action: action.to_string(),
        }
    }
}

/// Literal values substituted for missing groups and used by the synthetic report.
pub struct DefaultProfile;

impl DefaultProfile {
    pub fn quality() -> QualityMetrics {
        QualityMetrics {
            overall: 85.0,
            completeness: 90.0,
            consistency: 80.0,
            accuracy: 85.0,
            validity: 88.0,
        }
    }

    pub fn anomalies() -> AnomalySummary {
        AnomalySummary {
            total: 5,
            high: 1,
            medium: 2,
            low: 2,
            details: Vec::new(),
        }
    }

    pub fn bias() -> BiasSummary {
        BiasSummary {
            overall: 0.15,
            geographic: BiasDimension::from_score(
                0.1,
                "Records are spread evenly across the regions present.",
            ),
            demographic: BiasDimension::from_score(
                0.2,
                "Some demographic groups are under-represented.",
            ),
        }
    }

    pub fn insights() -> Vec<Insight> {
        vec![
            Insight::new(
                "quality",
                "Good overall data quality",
                "Most records are complete and consistently formatted.",
                "Review the remaining incomplete records before publishing.",
            ),
            Insight::new(
                "anomaly",
                "A few anomalies detected",
                "A small number of values fall outside the expected ranges.",
                "Inspect the high-severity anomalies first.",
            ),
            Insight::new(
                "bias",
                "Low bias levels",
                "Bias indicators are within acceptable limits.",
                "Consider rebalancing under-represented groups for sensitive use cases.",
            ),
        ]
    }

    pub fn file_metadata() -> FileMetadata {
        FileMetadata {
            name: UNKNOWN_NAME.to_string(),
            size_bytes: 0,
            size_display: format_bytes(0),
            rows: 0,
            columns: 0,
            format: UNKNOWN_FORMAT.to_string(),
            uploaded_at: UNKNOWN_TIMESTAMP.to_string(),
        }
    }
}

impl CanonicalDatasetReport {
    /// Fixed report returned when acquisition runs out of attempts.
    pub fn synthetic_fallback() -> Self {
        Self {
            provenance: Provenance {
                source: ReportSource::SyntheticFallback,
                variant: VariantKind::Unknown,
                payload_digest: None,
            },
            file_metadata: DefaultProfile::file_metadata(),
            quality: DefaultProfile::quality(),
            anomalies: DefaultProfile::anomalies(),
            bias: DefaultProfile::bias(),
            insights: DefaultProfile::insights(),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.provenance.source == ReportSource::SyntheticFallback
    }
}

/// Format a byte count in the largest unit ≥ 1 with at most one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let mut rounded = (value * 10.0).round() / 10.0;
    if rounded >= 1024.0 && unit < UNITS.len() - 1 {
        rounded = (rounded / 1024.0 * 10.0).round() / 10.0;
        unit += 1;
    }

    if rounded.fract() == 0.0 {
        format!("{} {}", rounded as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", rounded, UNITS[unit])
    }
}
