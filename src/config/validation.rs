//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use super::defaults::{MAX_PAGE_SIZE, MAX_RECOMPUTE_TIMEOUT_SECS};
use super::ClientConfig;
use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `ClientConfig`.
///
/// Any new field added to `ClientConfig` must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [backend]
        "backend",
        "backend.base_url",
        "backend.api_token",
        "backend.http_timeout_secs",
        // [analysis]
        "analysis",
        "analysis.recompute_timeout_secs",
        "analysis.page_size",
        "analysis.pairwise_performance_gap",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties go to the alphabetically first key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|&(dist, _)| dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed `ClientConfig`.
///
/// Returns (errors, warnings). Errors are values the client cannot run
/// with; warnings are suspicious but not fatal.
pub fn validate_ranges(config: &ClientConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let backend = &config.backend;
    let analysis = &config.analysis;

    if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
        errors.push(format!(
            "backend.base_url = '{}' must start with http:// or https://",
            backend.base_url
        ));
    }

    if backend.http_timeout_secs == 0 {
        errors.push("backend.http_timeout_secs must be > 0".to_string());
    }

    if analysis.recompute_timeout_secs == 0
        || analysis.recompute_timeout_secs > MAX_RECOMPUTE_TIMEOUT_SECS
    {
        errors.push(format!(
            "analysis.recompute_timeout_secs = {} is outside range (1-{MAX_RECOMPUTE_TIMEOUT_SECS})",
            analysis.recompute_timeout_secs
        ));
    }

    if analysis.page_size == 0 || analysis.page_size > MAX_PAGE_SIZE {
        errors.push(format!(
            "analysis.page_size = {} is outside range (1-{MAX_PAGE_SIZE})",
            analysis.page_size
        ));
    }

    // The HTTP client would abort before the recompute timer fires
    if backend.http_timeout_secs > 0
        && backend.http_timeout_secs < analysis.recompute_timeout_secs
    {
        warnings.push(ValidationWarning {
            field: "backend.http_timeout_secs".to_string(),
            message: format!(
                "backend.http_timeout_secs = {} is shorter than analysis.recompute_timeout_secs = {}",
                backend.http_timeout_secs, analysis.recompute_timeout_secs
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
