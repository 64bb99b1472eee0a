//! Result Normalizer - per-system raw results to one cross-system view
//!
//! ## Passes
//!
//! 1. **Parse**: every `BucketAnalysisResult` of every system is sorted into
//!    bucket order and split per metric into a `ParsedFeatureResult`.
//! 2. **Combo attach**: `ComboCountAnalysisResult`s are normalized once and
//!    attached under every metric (see `analysis::combo`).
//! 3. **Validate**: a pure pass over per-system slots checks that every
//!    (metric, feature) pair exists for every system with the same bucket
//!    count. Any gap fails the whole normalization.

use super::combo::{attach_combos, normalize_combo};
use super::formatting::{
    compare_buckets, format_bucket_name, numeric_bounds, parse_interval, round_to, FormatError,
    VALUE_DECIMAL_PLACES,
};
use crate::types::{
    AnalysisResult, BucketAnalysis, BucketBound, BucketPerformance, FeatureResults,
    ParsedFeatureResult, ParsedResults, SingleAnalysis, SystemModel,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Bucketing method the backend uses for categorical features.
pub const DISCRETE_METHOD: &str = "discrete";

/// Per-system slots for one feature, indexed by system position.
pub type SystemSlots = Vec<Option<ParsedFeatureResult>>;

/// Metric -> feature -> per-system slots, before validation.
pub type SlotMap = BTreeMap<String, BTreeMap<String, SystemSlots>>;

/// Raw results that cannot be merged into one cross-system view.
///
/// These indicate incompatible systems (e.g. different datasets) or a broken
/// backend contract; they are never recovered from automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    #[error("received analyses for {results} systems, expected {systems}")]
    SystemCountMismatch { systems: usize, results: usize },

    #[error("no analyses were returned for system {0}")]
    MissingSystem(String),

    #[error("found metric={metric}, feature={feature} for some but not all systems (missing for {system_id})")]
    MissingForSystem {
        metric: String,
        feature: String,
        system_id: String,
    },

    #[error("metric={metric}, feature={feature} has {found} buckets for {system_id}, expected {expected}")]
    BucketCountMismatch {
        metric: String,
        feature: String,
        system_id: String,
        expected: usize,
        found: usize,
    },

    #[error("feature={feature} was reported more than once for {system_id}")]
    DuplicateFeature { feature: String, system_id: String },

    #[error("combo feature={0} has the same name as a bucket feature")]
    ComboNameCollision(String),

    #[error("malformed bucket label in feature={feature}: {source}")]
    MalformedBucketLabel {
        feature: String,
        #[source]
        source: FormatError,
    },
}

/// Normalize every system's raw results into `results[metric][feature][system]`.
///
/// `raw` must hold one `SingleAnalysis` per entry of `systems`, in the same
/// order.
pub fn normalize(
    systems: &[SystemModel],
    raw: &[SingleAnalysis],
) -> Result<ParsedResults, NormalizationError> {
    if systems.len() != raw.len() {
        return Err(NormalizationError::SystemCountMismatch {
            systems: systems.len(),
            results: raw.len(),
        });
    }

    let mut slots = SlotMap::new();
    let mut combos: BTreeMap<String, SystemSlots> = BTreeMap::new();

    for (system_index, (system, analysis)) in systems.iter().zip(raw).enumerate() {
        let duplicate = |feature: &str| NormalizationError::DuplicateFeature {
            feature: feature.to_string(),
            system_id: system.system_id.clone(),
        };

        for result in &analysis.analysis_results {
            match result {
                AnalysisResult::Bucket(bucket) => {
                    for (metric, parsed) in parse_bucket_analysis(bucket)? {
                        let per_system = slots
                            .entry(metric)
                            .or_default()
                            .entry(bucket.name.clone())
                            .or_insert_with(|| vec![None; systems.len()]);
                        let slot = &mut per_system[system_index];
                        if slot.is_some() {
                            return Err(duplicate(&bucket.name));
                        }
                        *slot = Some(parsed);
                    }
                }
                AnalysisResult::ComboCount(combo) => {
                    let per_system = combos
                        .entry(combo.name.clone())
                        .or_insert_with(|| vec![None; systems.len()]);
                    let slot = &mut per_system[system_index];
                    if slot.is_some() {
                        return Err(duplicate(&combo.name));
                    }
                    *slot = Some(normalize_combo(combo));
                }
            }
        }
    }

    attach_combos(&mut slots, &combos)?;
    let results = validate_alignment(systems, slots)?;

    debug!(
        systems = systems.len(),
        metrics = results.len(),
        combos = combos.len(),
        "Normalized fine-grained results"
    );
    Ok(results)
}

/// Check that every (metric, feature) pair is present for every system with
/// equal bucket counts, and unwrap the slots into aligned vectors.
pub fn validate_alignment(
    systems: &[SystemModel],
    slots: SlotMap,
) -> Result<ParsedResults, NormalizationError> {
    let mut metrics = BTreeMap::new();

    for (metric, features) in slots {
        let mut aligned = FeatureResults::new();
        for (feature, per_system) in features {
            let mut expected: Option<usize> = None;
            let mut results = Vec::with_capacity(per_system.len());

            for (system, slot) in systems.iter().zip(per_system) {
                let Some(parsed) = slot else {
                    return Err(NormalizationError::MissingForSystem {
                        metric,
                        feature,
                        system_id: system.system_id.clone(),
                    });
                };
                let found = parsed.bucket_count();
                match expected {
                    None => expected = Some(found),
                    Some(expected) if expected != found => {
                        return Err(NormalizationError::BucketCountMismatch {
                            metric,
                            feature,
                            system_id: system.system_id.clone(),
                            expected,
                            found,
                        });
                    }
                    Some(_) => {}
                }
                results.push(parsed);
            }
            aligned.insert(feature, results);
        }
        metrics.insert(metric, aligned);
    }

    Ok(ParsedResults::from_metrics(metrics))
}

/// Split one feature's bucketed performances into one result per metric.
pub fn parse_bucket_analysis(
    bucket: &BucketAnalysis,
) -> Result<BTreeMap<String, ParsedFeatureResult>, NormalizationError> {
    let malformed = |source| NormalizationError::MalformedBucketLabel {
        feature: bucket.name.clone(),
        source,
    };

    let mut entries: Vec<(Vec<BucketBound>, &BucketPerformance)> = bucket
        .bucket_performances
        .iter()
        .map(|bp| parse_interval(&bp.bucket_name).map(|interval| (interval, bp)))
        .collect::<Result<_, _>>()
        .map_err(malformed)?;

    // Stable: equal keys keep the backend's order
    entries.sort_by(|(a, a_perf), (b, b_perf)| {
        compare_buckets(a, &a_perf.bucket_name, b, &b_perf.bucket_name)
    });

    let discrete = bucket.method.as_deref() == Some(DISCRETE_METHOD)
        || entries
            .iter()
            .any(|(interval, _)| interval.iter().any(|bound| !bound.is_numeric()));
    let description = bucket.description.as_deref().unwrap_or(&bucket.name);

    let mut parsed: BTreeMap<String, ParsedFeatureResult> = BTreeMap::new();
    for (interval, performance) in &entries {
        let bucket_name = format_bucket_name(interval).map_err(malformed)?;
        let bounds = numeric_bounds(interval);

        for metric in &performance.performances {
            let result = parsed.entry(metric.metric_name.clone()).or_insert_with(|| {
                let mut fresh =
                    ParsedFeatureResult::new(&metric.metric_name, &bucket.name, description);
                fresh.bucket_method.clone_from(&bucket.method);
                fresh.discrete = discrete;
                fresh
            });

            result.bucket_names.push(bucket_name.clone());
            result.bucket_intervals.push(interval.clone());
            result
                .values
                .push(round_to(metric.value, VALUE_DECIMAL_PLACES));
            result.numbers_of_samples.push(performance.n_samples);
            if let (Some(low), Some(high)) =
                (metric.confidence_score_low, metric.confidence_score_high)
            {
                result.confidence_scores.push((
                    round_to(low, VALUE_DECIMAL_PLACES),
                    round_to(high, VALUE_DECIMAL_PLACES),
                ));
            }
            result
                .buckets_of_samples
                .push(performance.bucket_samples.clone());

            if let Some(bounds) = &bounds {
                extend_range(result, bounds);
            }
        }
    }

    Ok(parsed)
}

/// Fold a bucket's numeric bounds into the running min / max / right edges.
fn extend_range(result: &mut ParsedFeatureResult, bounds: &[f64]) {
    for &bound in bounds {
        result.bucket_min = Some(result.bucket_min.map_or(bound, |min| min.min(bound)));
        result.bucket_max = Some(result.bucket_max.map_or(bound, |max| max.max(bound)));
    }
    if let Some(&right) = bounds.last() {
        result.bucket_right_bounds.push(right);
    }
}
