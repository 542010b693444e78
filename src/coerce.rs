//! Loose numeric coercion for metric values that arrive as numbers or as text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static GROUPED_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:,\d{3})+\b").expect("Invalid grouped integer regex"));

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("Invalid digit run regex"));

/// Coerce a JSON value into a number.
///
/// Finite numbers pass through unchanged. Strings are searched first for a
/// thousands-grouped integer (`1,234`), then for the first digit run. Anything
/// else yields `None` and the caller's default applies.
pub fn coerce(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => coerce_str(s),
        _ => None,
    }
}

/// String half of [`coerce`].
pub fn coerce_str(raw: &str) -> Option<f64> {
    if let Some(m) = GROUPED_INTEGER.find(raw) {
        let digits: String = m.as_str().chars().filter(|c| *c != ',').collect();
        if let Ok(v) = digits.parse::<f64>() {
            return Some(v);
        }
    }
    DIGIT_RUN
        .find(raw)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// [`coerce`] with an explicit fallback.
pub fn coerce_or(raw: &Value, default: f64) -> f64 {
    coerce(raw).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grouped_thousands() {
        assert_eq!(coerce(&json!("1,234")), Some(1234.0));
        assert_eq!(coerce(&json!("1,200 records")), Some(1200.0));
        assert_eq!(coerce(&json!("about 2,500,000 rows")), Some(2_500_000.0));
    }

    #[test]
    fn test_numbers_pass_through() {
        assert_eq!(coerce(&json!(42)), Some(42.0));
        assert_eq!(coerce(&json!(0.15)), Some(0.15));
        assert_eq!(coerce(&json!(-3)), Some(-3.0));
    }

    #[test]
    fn test_first_digit_run() {
        assert_eq!(coerce(&json!("quality: 87%")), Some(87.0));
        assert_eq!(coerce(&json!("12345")), Some(12345.0));
        assert_eq!(coerce(&json!("score 92.5 / 100")), Some(92.5));
    }

    #[test]
    fn test_unparseable_uses_default() {
        assert_eq!(coerce(&json!("n/a")), None);
        assert_eq!(coerce_or(&json!("n/a"), 0.0), 0.0);
        assert_eq!(coerce_or(&json!(null), 0.0), 0.0);
        assert_eq!(coerce_or(&json!(true), 7.0), 7.0);
        assert_eq!(coerce_or(&json!({"rows": 3}), 0.0), 0.0);
    }
}
