//! Rough rows/columns estimate from a declared file size and extension.
//!
//! Last resort of the cascade, so a report never says "0 rows / 0 columns" when a
//! size is known. Coefficients live in [`crate::config::SizeModel`].

use crate::config::{SizeBucket, SizeModel};
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeEstimate {
    pub rows: u64,
    pub columns: u64,
}

static KB_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?)\s*KB\b").expect("Invalid KB label regex")
});

/// Kilobytes in a `<number> KB` label. Other units are not recognized.
pub fn parse_kb(label: &str) -> Option<f64> {
    KB_LABEL
        .captures(label)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|kb| kb.is_finite() && *kb >= 0.0)
}

fn extension(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.trim().to_lowercase(),
        None => String::new(),
    }
}

pub struct SizeEstimator<'a> {
    models: &'a [SizeModel],
}

impl<'a> SizeEstimator<'a> {
    pub fn new(models: &'a [SizeModel]) -> Self {
        Self { models }
    }

    /// Estimate from a size label and a file name; `{0, 0}` when the label has no KB value.
    pub fn estimate(&self, size_label: &str, file_name: &str) -> SizeEstimate {
        match parse_kb(size_label) {
            Some(kb) => self.estimate_kb(kb, file_name),
            None => SizeEstimate::default(),
        }
    }

    pub fn estimate_kb(&self, kb: f64, file_name: &str) -> SizeEstimate {
        let Some(model) = self.select_model(file_name) else {
            return SizeEstimate::default();
        };
        let Some(bucket) = model.buckets.iter().find(|b| fits(b, kb)) else {
            return SizeEstimate::default();
        };

        SizeEstimate {
            rows: (kb * bucket.rows_per_kb).round() as u64,
            columns: (kb * bucket.columns_per_kb).round() as u64,
        }
    }

    fn select_model(&self, file_name: &str) -> Option<&'a SizeModel> {
        let ext = extension(file_name);
        let lowered = file_name.to_lowercase();

        self.models
            .iter()
            .find(|m| {
                m.extensions.iter().any(|e| *e == ext)
                    || m.name_keywords.iter().any(|k| lowered.contains(k.as_str()))
            })
            .or_else(|| {
                self.models
                    .iter()
                    .find(|m| m.extensions.is_empty() && m.name_keywords.is_empty())
            })
    }
}

fn fits(bucket: &SizeBucket, kb: f64) -> bool {
    match bucket.upper_kb {
        None => true,
        Some(upper) if bucket.upper_inclusive => kb <= upper,
        Some(upper) => kb < upper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_tables;

    fn estimate(label: &str, name: &str) -> SizeEstimate {
        let tables = default_tables();
        SizeEstimator::new(&tables.size_models).estimate(label, name)
    }

    #[test]
    fn test_csv_mid_bucket() {
        assert_eq!(estimate("5 KB", "data.csv"), SizeEstimate { rows: 500, columns: 8 });
        assert_eq!(estimate("8 KB", "data.csv"), SizeEstimate { rows: 800, columns: 12 });
        assert_eq!(estimate("10 KB", "data.csv"), SizeEstimate { rows: 1000, columns: 15 });
    }

    #[test]
    fn test_csv_small_and_large() {
        assert_eq!(estimate("0.5 KB", "a.CSV"), SizeEstimate { rows: 15, columns: 3 });
        assert_eq!(estimate("20 KB", "a.csv"), SizeEstimate { rows: 4000, columns: 16 });
    }

    #[test]
    fn test_spreadsheet_and_json() {
        assert_eq!(estimate("4 KB", "book.xlsx"), SizeEstimate { rows: 60, columns: 12 });
        assert_eq!(estimate("5 KB", "book.xlsx"), SizeEstimate { rows: 125, columns: 10 });
        assert_eq!(estimate("5 KB", "my spreadsheet export"), SizeEstimate { rows: 125, columns: 10 });
        assert_eq!(estimate("0.5 KB", "x.json"), SizeEstimate { rows: 10, columns: 2 });
        assert_eq!(estimate("2 KB", "x.json"), SizeEstimate { rows: 300, columns: 2 });
    }

    #[test]
    fn test_other_extension() {
        assert_eq!(estimate("3 KB", "notes.parquet"), SizeEstimate { rows: 150, columns: 6 });
        assert_eq!(estimate("3 KB", "no_extension"), SizeEstimate { rows: 150, columns: 6 });
    }

    #[test]
    fn test_thousands_grouped_kb() {
        assert_eq!(parse_kb("1,024 KB"), Some(1024.0));
        assert_eq!(parse_kb("2,048.5 kb"), Some(2048.5));
        assert_eq!(estimate("1,024 KB", "big.csv"), SizeEstimate { rows: 204800, columns: 819 });
    }

    #[test]
    fn test_unrecognized_label() {
        assert_eq!(estimate("3 MB", "data.csv"), SizeEstimate::default());
        assert_eq!(estimate("big", "data.csv"), SizeEstimate::default());
        assert_eq!(estimate("", "data.csv"), SizeEstimate::default());
    }
}
