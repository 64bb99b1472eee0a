//! Bucket label parsing and display formatting
//!
//! Raw bucket labels arrive as one or two string tokens. A single token is a
//! category (or a single discrete value); two tokens are the numeric bounds
//! of an interval.
//!
//! | Label              | Parsed                       | Display            |
//! |--------------------|------------------------------|--------------------|
//! | `["neg"]`          | `[Category("neg")]`          | `"neg\n\n"`        |
//! | `["3"]`            | `[Int(3)]`                   | `"3\n\n"`          |
//! | `["0.333"]`        | `[Float(0.333)]`             | `"0.33\n\n"`       |
//! | `["0", "5.5"]`     | `[Int(0), Float(5.5)]`       | `"0.00\n|\n5.50"`  |

use crate::types::BucketBound;
use std::cmp::Ordering;
use thiserror::Error;

/// Decimal places kept for metric values and confidence bounds.
pub const VALUE_DECIMAL_PLACES: i32 = 3;

/// Bucket label that cannot be turned into a display name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("cannot handle bucket intervals with {0} elements")]
    UnsupportedArity(usize),
    #[error("interval bound '{0}' is not numeric")]
    NonNumericBound(String),
}

/// Parse one label token: integer first, then float, else a category.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_bound(token: &str) -> BucketBound {
    let trimmed = token.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return BucketBound::Int(n);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => {
            // "3.0" is still an integer label
            if v.fract() == 0.0 && v.abs() < 9.0e15 {
                BucketBound::Int(v as i64)
            } else {
                BucketBound::Float(v)
            }
        }
        _ => BucketBound::Category(token.to_string()),
    }
}

/// Parse a raw bucket label into its bounds.
///
/// Two-element labels must be numeric on both ends: a non-numeric token there
/// is reported instead of being coerced to a number.
pub fn parse_interval(tokens: &[String]) -> Result<Vec<BucketBound>, FormatError> {
    match tokens {
        [single] => Ok(vec![parse_bound(single)]),
        [low, high] => {
            let bounds = vec![parse_bound(low), parse_bound(high)];
            if let Some(BucketBound::Category(bad)) = bounds.iter().find(|b| !b.is_numeric()) {
                return Err(FormatError::NonNumericBound(bad.clone()));
            }
            Ok(bounds)
        }
        other => Err(FormatError::UnsupportedArity(other.len())),
    }
}

/// Display name of a bucket.
///
/// Single-bound names are padded with a blank line so they render with the
/// same height as two-bound names.
pub fn format_bucket_name(interval: &[BucketBound]) -> Result<String, FormatError> {
    match interval {
        [BucketBound::Float(value)] => Ok(format!("{value:.2}\n\n")),
        [single] => Ok(format!("{single}\n\n")),
        [low, high] => {
            let low_value = numeric(low)?;
            let high_value = numeric(high)?;
            Ok(format!("{low_value:.2}\n|\n{high_value:.2}"))
        }
        other => Err(FormatError::UnsupportedArity(other.len())),
    }
}

fn numeric(bound: &BucketBound) -> Result<f64, FormatError> {
    bound
        .as_f64()
        .ok_or_else(|| FormatError::NonNumericBound(bound.to_string()))
}

/// All bounds as numbers, or `None` if any bound is categorical.
pub fn numeric_bounds(interval: &[BucketBound]) -> Option<Vec<f64>> {
    interval.iter().map(BucketBound::as_f64).collect()
}

/// Bucket ordering: by first numeric bound when both have one, else by the
/// raw label text. Numeric buckets come before categorical ones.
pub fn compare_buckets(
    a: &[BucketBound],
    a_label: &[String],
    b: &[BucketBound],
    b_label: &[String],
) -> Ordering {
    let a_first = a.first().and_then(BucketBound::as_f64);
    let b_first = b.first().and_then(BucketBound::as_f64);
    match (a_first, b_first) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a_label.first().cmp(&b_label.first()),
    }
}

/// Round to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
