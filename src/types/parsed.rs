//! Canonical, cross-system view of fine-grained results
//!
//! Produced by `analysis::normalizer` from the wire types in
//! `types::analysis`. Indexed as `results[metric][feature][system_index]`.

use super::analysis::CaseId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Slider granularity used when a feature spans at most one unit.
pub const FINE_SLIDER_STEP: f64 = 0.01;

/// One bound of a bucket label after parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BucketBound {
    Int(i64),
    Float(f64),
    /// Non-numeric label of a discrete feature
    Category(String),
}

impl BucketBound {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Category(_) => None,
        }
    }

    pub const fn is_numeric(&self) -> bool {
        !matches!(self, Self::Category(_))
    }
}

impl fmt::Display for BucketBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Category(s) => f.write_str(s),
        }
    }
}

/// Co-occurrence count of one category pair in a combo analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboCount {
    pub bucket_pair: (String, String),
    pub count: u64,
    pub sample_ids: Vec<CaseId>,
}

/// Bucketed results of one metric/feature/system combination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFeatureResult {
    pub feature_name: String,
    pub feature_description: String,
    /// Empty for combo results, which do not depend on a metric
    pub metric_name: String,
    /// Bucketing method reported by the backend, if any
    pub bucket_method: Option<String>,
    /// `bucket_names[i]` is the display name of bucket `i`
    pub bucket_names: Vec<String>,
    pub bucket_intervals: Vec<Vec<BucketBound>>,
    /// Smallest numeric bound seen, `None` for purely categorical features
    pub bucket_min: Option<f64>,
    pub bucket_max: Option<f64>,
    /// Right edge of every numeric bucket, in bucket order
    pub bucket_right_bounds: Vec<f64>,
    /// Metric value per bucket, rounded to 3 decimal places
    pub values: Vec<f64>,
    pub numbers_of_samples: Vec<u64>,
    /// `(low, high)` per bucket; only buckets that report both ends contribute
    pub confidence_scores: Vec<(f64, f64)>,
    /// `buckets_of_samples[i]` lists the cases of bucket `i`
    pub buckets_of_samples: Vec<Vec<CaseId>>,
    /// Set when any label is categorical: boundary sliders are not offered
    pub discrete: bool,
    pub combo_counts: Vec<ComboCount>,
}

impl ParsedFeatureResult {
    pub fn new(metric_name: &str, feature_name: &str, feature_description: &str) -> Self {
        Self {
            feature_name: feature_name.to_string(),
            feature_description: feature_description.to_string(),
            metric_name: metric_name.to_string(),
            bucket_method: None,
            bucket_names: Vec::new(),
            bucket_intervals: Vec::new(),
            bucket_min: None,
            bucket_max: None,
            bucket_right_bounds: Vec::new(),
            values: Vec::new(),
            numbers_of_samples: Vec::new(),
            confidence_scores: Vec::new(),
            buckets_of_samples: Vec::new(),
            discrete: false,
            combo_counts: Vec::new(),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_names.len()
    }

    /// Combo results are the only ones without a metric
    pub fn is_combo(&self) -> bool {
        self.metric_name.is_empty()
    }

    /// Whether the user may redefine this feature's numeric bucket bounds.
    pub fn supports_custom_buckets(&self) -> bool {
        !self.discrete
            && !self.is_combo()
            && self.bucket_min.is_some()
            && self.bucket_max.is_some()
    }

    /// Slider step: `0.01` when the feature spans at most one unit, else `1`.
    pub fn step(&self) -> Option<f64> {
        match (self.bucket_min, self.bucket_max) {
            (Some(min), Some(max)) => Some(slider_step(min, max)),
            _ => None,
        }
    }
}

/// Slider step derived from a feature's numeric range.
pub fn slider_step(min: f64, max: f64) -> f64 {
    if max - min <= 1.0 {
        FINE_SLIDER_STEP
    } else {
        1.0
    }
}

/// Feature name to one parsed result per system, aligned by system index.
pub type FeatureResults = BTreeMap<String, Vec<ParsedFeatureResult>>;

/// Fine-grained results for every metric, feature and system.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ParsedResults {
    metrics: BTreeMap<String, FeatureResults>,
}

impl ParsedResults {
    pub(crate) const fn from_metrics(metrics: BTreeMap<String, FeatureResults>) -> Self {
        Self { metrics }
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn metric(&self, metric: &str) -> Option<&FeatureResults> {
        self.metrics.get(metric)
    }

    /// Per-system results of one metric/feature pair
    pub fn get(&self, metric: &str, feature: &str) -> Option<&[ParsedFeatureResult]> {
        self.metrics
            .get(metric)
            .and_then(|features| features.get(feature))
            .map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FeatureResults)> {
        self.metrics.iter().map(|(name, features)| (name.as_str(), features))
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }
}
