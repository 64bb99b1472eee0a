//! Wire types exchanged with the evaluation backend
//!
//! Everything in this module mirrors the backend's JSON contract. Values are
//! immutable once received; reshaping happens in `crate::analysis`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Sample / case identifier.
///
/// The backend reports sample IDs as JSON numbers for most tasks and as
/// strings for span-level tasks. Both forms are kept in their textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Integer value of the ID, if the whole text parses as one.
    pub fn as_integer(&self) -> Option<i64> {
        self.0.trim().parse::<i64>().ok()
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CaseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for CaseId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for CaseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Signed(i64),
            Unsigned(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Signed(n) => Self(n.to_string()),
            RawId::Unsigned(n) => Self(n.to_string()),
            RawId::Text(s) => Self(s),
        })
    }
}

/// Identity of one evaluated system taking part in an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemModel {
    pub system_id: String,
    pub system_name: String,
}

impl SystemModel {
    pub fn new(system_id: impl Into<String>, system_name: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            system_name: system_name.into(),
        }
    }
}

// ============================================================================
// Analysis results
// ============================================================================

/// One metric's value for a bucket, with optional confidence bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub metric_name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score_high: Option<f64>,
}

/// Performance of every metric inside a single bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketPerformance {
    /// Raw bucket label: one token for a category, two for a numeric interval
    #[serde(deserialize_with = "label_tokens")]
    pub bucket_name: Vec<String>,
    pub n_samples: u64,
    pub performances: Vec<Performance>,
    #[serde(default)]
    pub bucket_samples: Vec<CaseId>,
}

/// Bucketed performance of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketAnalysis {
    /// Feature name, e.g. `text_length`
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Bucketing method reported by the backend (`discrete`, `continuous`, ...)
    #[serde(default)]
    pub method: Option<String>,
    pub bucket_performances: Vec<BucketPerformance>,
}

/// Co-occurrence of one category pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboOccurrence {
    pub features: (String, String),
    pub sample_count: u64,
    #[serde(default)]
    pub sample_ids: Vec<CaseId>,
}

/// Joint distribution of two categorical features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboCountAnalysis {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub features: (String, String),
    pub combo_occurrences: Vec<ComboOccurrence>,
}

/// A single analysis result, discriminated by the backend's `cls_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cls_name")]
pub enum AnalysisResult {
    #[serde(rename = "BucketAnalysisResult")]
    Bucket(BucketAnalysis),
    #[serde(rename = "ComboCountAnalysisResult")]
    ComboCount(ComboCountAnalysis),
}

impl AnalysisResult {
    /// Feature (or feature-combination) name of the analysis
    pub fn name(&self) -> &str {
        match self {
            Self::Bucket(bucket) => &bucket.name,
            Self::ComboCount(combo) => &combo.name,
        }
    }
}

/// Every analysis the backend produced for one system.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SingleAnalysis {
    #[serde(default)]
    pub analysis_results: Vec<AnalysisResult>,
}

// ============================================================================
// Requests / responses
// ============================================================================

/// Custom bucketing for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBucketInfo {
    /// Number of intervals in `setting`
    pub number: usize,
    /// Consecutive `[low, high]` pairs
    pub setting: Vec<(f64, f64)>,
}

/// Body of `POST /systems/analyses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemsAnalysesRequest {
    /// Comma-joined system IDs
    pub system_ids: String,
    pub pairwise_performance_gap: bool,
    pub feature_to_bucket_info: BTreeMap<String, FeatureBucketInfo>,
}

/// Response of `POST /systems/analyses`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemAnalysesResponse {
    pub single_analyses: BTreeMap<String, SingleAnalysis>,
    #[serde(default)]
    pub system_insights: Vec<BTreeMap<String, String>>,
}

/// Response of `GET /systems/{id}/outputs`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemOutputsResponse {
    pub system_outputs: Vec<serde_json::Map<String, serde_json::Value>>,
    pub total: u64,
}

/// Response of `GET /metric-descriptions`: metric name to tooltip text.
pub type MetricDescriptions = BTreeMap<String, String>;

/// Bucket labels arrive as strings, but older backends emit bare numbers.
fn label_tokens<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    use serde::de::Error;

    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|token| match token {
            serde_json::Value::String(s) => Ok(s),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            other => Err(D::Error::custom(format!(
                "unsupported bucket label token: {other}"
            ))),
        })
        .collect()
}
