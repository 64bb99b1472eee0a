//! Bucket Interval Store - user-editable bucket boundaries per feature
//!
//! Each numeric feature keeps `{min, max, right_bounds, dirty}`. The buckets
//! it describes are `(min, b0), (b0, b1), ..., (b_n, max)`; `right_bounds`
//! never contains the final bound, which is always `max`.
//!
//! Only dirty features are sent to the backend for re-bucketing. Clean
//! features are left out so the backend keeps its default bucketing.

use crate::types::{slider_step, FeatureBucketInfo, ParsedFeatureResult, ParsedResults};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

/// Rejected bucket-boundary edit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntervalError {
    #[error("no bucket interval is tracked for feature '{0}'")]
    UnknownFeature(String),

    #[error("feature '{0}' has no numeric bucket bounds")]
    NotNumeric(String),

    #[error("bound index {index} out of range for feature '{feature}' ({len} bounds)")]
    IndexOutOfRange {
        feature: String,
        index: usize,
        len: usize,
    },

    #[error("bound {value} for feature '{feature}' is not a finite number")]
    NonFinite { feature: String, value: f64 },
}

/// Editable bucket boundaries of one numeric feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketInterval {
    pub min: f64,
    pub max: f64,
    /// Interior right edges, excluding the final bound (`max`)
    pub right_bounds: Vec<f64>,
    /// Edited since the last successful recompute
    pub dirty: bool,
}

impl BucketInterval {
    pub fn step(&self) -> f64 {
        slider_step(self.min, self.max)
    }

    /// `[min, ...right_bounds, max]` sorted ascending, as consecutive pairs.
    pub fn request_intervals(&self) -> Vec<(f64, f64)> {
        let mut values = Vec::with_capacity(self.right_bounds.len() + 2);
        values.push(self.min);
        values.extend_from_slice(&self.right_bounds);
        values.push(self.max);
        values.sort_by(f64::total_cmp);
        values_to_intervals(&values)
    }

    /// Slider handle positions: `[min, ...right_bounds, max]`.
    pub fn slider_values(&self) -> Vec<f64> {
        let mut values = vec![self.min];
        values.extend_from_slice(&self.right_bounds);
        values.push(self.max);
        values
    }
}

/// Consecutive pairs `(values[i], values[i + 1])`.
pub fn values_to_intervals(values: &[f64]) -> Vec<(f64, f64)> {
    values.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Bucket boundaries for every numeric feature of the open analysis.
#[derive(Debug, Clone, Default)]
pub struct BucketIntervalStore {
    intervals: BTreeMap<String, BucketInterval>,
}

impl BucketIntervalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a feature from the first system's parsed result.
    ///
    /// Bucket bounds are system-invariant, so the first system is enough.
    pub fn init_from_first_result(
        &mut self,
        feature: &str,
        parsed: &ParsedFeatureResult,
    ) -> Result<&BucketInterval, IntervalError> {
        let interval = Self::interval_from_result(feature, parsed)?;
        self.intervals.insert(feature.to_string(), interval);
        self.get(feature)
            .ok_or_else(|| IntervalError::UnknownFeature(feature.to_string()))
    }

    fn interval_from_result(
        feature: &str,
        parsed: &ParsedFeatureResult,
    ) -> Result<BucketInterval, IntervalError> {
        if !parsed.supports_custom_buckets() {
            return Err(IntervalError::NotNumeric(feature.to_string()));
        }
        let (Some(min), Some(max)) = (parsed.bucket_min, parsed.bucket_max) else {
            return Err(IntervalError::NotNumeric(feature.to_string()));
        };
        let bounds = &parsed.bucket_right_bounds;
        let interior = &bounds[..bounds.len().saturating_sub(1)];
        Ok(BucketInterval {
            min,
            max,
            right_bounds: interior.to_vec(),
            dirty: false,
        })
    }

    /// Rebuild the store after a successful recompute.
    ///
    /// Features that went out in the request are re-seeded from the fresh
    /// results and become clean. Features edited while the request was in
    /// flight keep their edits and stay dirty.
    pub fn reseed(&mut self, results: &ParsedResults, requested: &BTreeSet<String>) {
        let mut fresh = BTreeMap::new();

        for (_, features) in results.iter() {
            for (feature, per_system) in features {
                if fresh.contains_key(feature) {
                    continue;
                }
                let Some(first) = per_system.first() else {
                    continue;
                };
                let Ok(mut interval) = Self::interval_from_result(feature, first) else {
                    continue;
                };
                if let Some(pending) = self.intervals.get(feature) {
                    if pending.dirty && !requested.contains(feature) {
                        interval = pending.clone();
                    }
                }
                fresh.insert(feature.clone(), interval);
            }
        }

        debug!(
            features = fresh.len(),
            requested = requested.len(),
            "Bucket intervals reseeded"
        );
        self.intervals = fresh;
    }

    /// Replace a feature's interior bounds and mark it dirty.
    ///
    /// Each bound is clamped to `[min, max]`, matching the numeric input's
    /// limits. Order is kept as given; callers supply an ascending sequence.
    pub fn update(
        &mut self,
        feature: &str,
        new_right_bounds: Vec<f64>,
    ) -> Result<&BucketInterval, IntervalError> {
        if let Some(&value) = new_right_bounds.iter().find(|v| !v.is_finite()) {
            return Err(IntervalError::NonFinite {
                feature: feature.to_string(),
                value,
            });
        }
        let interval = self.get_mut(feature)?;
        let (min, max) = (interval.min, interval.max);
        interval.right_bounds = new_right_bounds
            .into_iter()
            .map(|value| value.max(min).min(max))
            .collect();
        interval.dirty = true;
        Ok(&*interval)
    }

    /// Apply slider handle positions `[min, ...bounds, max]`.
    ///
    /// The first and last handles are pinned to `min` and `max` and dropped.
    pub fn update_from_slider(
        &mut self,
        feature: &str,
        handles: &[f64],
    ) -> Result<&BucketInterval, IntervalError> {
        let interior = if handles.len() >= 2 {
            handles[1..handles.len() - 1].to_vec()
        } else {
            Vec::new()
        };
        self.update(feature, interior)
    }

    /// Set one interior bound (numeric input box next to the slider).
    pub fn set_bound(
        &mut self,
        feature: &str,
        index: usize,
        value: f64,
    ) -> Result<&BucketInterval, IntervalError> {
        let mut bounds = self.require(feature)?.right_bounds.clone();
        let len = bounds.len();
        let slot = bounds.get_mut(index).ok_or_else(|| IntervalError::IndexOutOfRange {
            feature: feature.to_string(),
            index,
            len,
        })?;
        *slot = value;
        self.update(feature, bounds)
    }

    /// Append a new bound at `max`, splitting off an empty last bucket.
    pub fn add_bound(&mut self, feature: &str) -> Result<&BucketInterval, IntervalError> {
        let interval = self.require(feature)?;
        let mut bounds = interval.right_bounds.clone();
        bounds.push(interval.max);
        self.update(feature, bounds)
    }

    /// Drop the last interior bound, merging the two last buckets.
    pub fn remove_bound(&mut self, feature: &str) -> Result<&BucketInterval, IntervalError> {
        let mut bounds = self.require(feature)?.right_bounds.clone();
        bounds.pop();
        self.update(feature, bounds)
    }

    /// Intervals sent to the backend for one feature.
    pub fn to_request_intervals(&self, feature: &str) -> Result<Vec<(f64, f64)>, IntervalError> {
        Ok(self.require(feature)?.request_intervals())
    }

    /// Bucket overrides for every dirty feature, keyed by feature name.
    pub fn dirty_bucket_info(&self) -> BTreeMap<String, FeatureBucketInfo> {
        self.intervals
            .iter()
            .filter(|(_, interval)| interval.dirty)
            .map(|(feature, interval)| {
                let setting = interval.request_intervals();
                (
                    feature.clone(),
                    FeatureBucketInfo {
                        number: setting.len(),
                        setting,
                    },
                )
            })
            .collect()
    }

    pub fn any_dirty(&self) -> bool {
        self.intervals.values().any(|interval| interval.dirty)
    }

    pub fn dirty_features(&self) -> BTreeSet<String> {
        self.intervals
            .iter()
            .filter(|(_, interval)| interval.dirty)
            .map(|(feature, _)| feature.clone())
            .collect()
    }

    /// Mark the given features clean.
    pub fn clear_dirty(&mut self, features: &BTreeSet<String>) {
        for feature in features {
            if let Some(interval) = self.intervals.get_mut(feature) {
                interval.dirty = false;
            }
        }
    }

    pub fn get(&self, feature: &str) -> Option<&BucketInterval> {
        self.intervals.get(feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BucketInterval)> {
        self.intervals.iter().map(|(name, interval)| (name.as_str(), interval))
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    fn require(&self, feature: &str) -> Result<&BucketInterval, IntervalError> {
        self.intervals
            .get(feature)
            .ok_or_else(|| IntervalError::UnknownFeature(feature.to_string()))
    }

    fn get_mut(&mut self, feature: &str) -> Result<&mut BucketInterval, IntervalError> {
        self.intervals
            .get_mut(feature)
            .ok_or_else(|| IntervalError::UnknownFeature(feature.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_result() -> ParsedFeatureResult {
        let mut parsed = ParsedFeatureResult::new("Accuracy", "length", "sentence length");
        parsed.bucket_names = vec!["0.00\n|\n5.00".into(), "5.00\n|\n10.00".into()];
        parsed.bucket_min = Some(0.0);
        parsed.bucket_max = Some(10.0);
        parsed.bucket_right_bounds = vec![5.0, 10.0];
        parsed
    }

    fn seeded() -> BucketIntervalStore {
        let mut store = BucketIntervalStore::new();
        store.init_from_first_result("length", &length_result()).unwrap();
        store
    }

    #[test]
    fn seeding_drops_the_final_bound() {
        let store = seeded();
        let interval = store.get("length").unwrap();
        assert_eq!(interval.right_bounds, vec![5.0]);
        assert!(!interval.dirty);
        assert!((interval.step() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn categorical_features_are_not_seeded() {
        let mut parsed = length_result();
        parsed.discrete = true;
        let mut store = BucketIntervalStore::new();
        assert_eq!(
            store.init_from_first_result("label", &parsed),
            Err(IntervalError::NotNumeric("label".to_string()))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn update_marks_dirty_and_builds_request() {
        let mut store = seeded();
        store.update("length", vec![3.0]).unwrap();

        assert!(store.get("length").unwrap().dirty);
        assert_eq!(
            store.to_request_intervals("length").unwrap(),
            vec![(0.0, 3.0), (3.0, 10.0)]
        );

        let info = store.dirty_bucket_info();
        assert_eq!(info["length"].number, 2);
        assert_eq!(info["length"].setting, vec![(0.0, 3.0), (3.0, 10.0)]);
    }

    #[test]
    fn request_intervals_cover_min_to_max() {
        let bound_sets: [&[f64]; 4] = [&[], &[5.0], &[7.5, 2.0, 4.0], &[1.0, 2.0, 3.0, 9.0]];
        for bounds in bound_sets {
            let interval = BucketInterval {
                min: 0.0,
                max: 10.0,
                right_bounds: bounds.to_vec(),
                dirty: true,
            };
            let pairs = interval.request_intervals();
            assert_eq!(pairs.len(), bounds.len() + 1);
            assert_eq!(pairs.first().map(|p| p.0), Some(0.0));
            assert_eq!(pairs.last().map(|p| p.1), Some(10.0));
            for window in pairs.windows(2) {
                assert_eq!(window[0].1, window[1].0);
                assert!(window[0].0 <= window[0].1);
            }
        }
    }

    #[test]
    fn clean_features_are_not_requested() {
        let store = seeded();
        assert!(store.dirty_bucket_info().is_empty());
        assert!(!store.any_dirty());
    }

    #[test]
    fn slider_helpers_edit_bounds() {
        let mut store = seeded();
        store.add_bound("length").unwrap();
        assert_eq!(store.get("length").unwrap().right_bounds, vec![5.0, 10.0]);

        store.set_bound("length", 1, 8.0).unwrap();
        assert_eq!(store.get("length").unwrap().right_bounds, vec![5.0, 8.0]);

        store.remove_bound("length").unwrap();
        assert_eq!(store.get("length").unwrap().right_bounds, vec![5.0]);

        store.update_from_slider("length", &[0.0, 2.0, 6.0, 10.0]).unwrap();
        assert_eq!(store.get("length").unwrap().right_bounds, vec![2.0, 6.0]);

        assert!(matches!(
            store.set_bound("length", 5, 1.0),
            Err(IntervalError::IndexOutOfRange { index: 5, len: 2, .. })
        ));
    }

    #[test]
    fn edited_bounds_are_clamped_to_range() {
        let mut store = seeded();
        store.set_bound("length", 0, 15.0).unwrap();
        assert_eq!(store.get("length").unwrap().right_bounds, vec![10.0]);
        assert_eq!(
            store.to_request_intervals("length").unwrap(),
            vec![(0.0, 10.0), (10.0, 10.0)]
        );

        store.update("length", vec![-2.0, 4.0]).unwrap();
        assert_eq!(store.get("length").unwrap().right_bounds, vec![0.0, 4.0]);
        let pairs = store.to_request_intervals("length").unwrap();
        assert_eq!(pairs.first().map(|p| p.0), Some(0.0));
        assert_eq!(pairs.last().map(|p| p.1), Some(10.0));
    }

    #[test]
    fn non_finite_bounds_are_rejected() {
        let mut store = seeded();
        assert!(matches!(
            store.update("length", vec![f64::NAN]),
            Err(IntervalError::NonFinite { .. })
        ));
        assert!(!store.get("length").unwrap().dirty);
    }

    #[test]
    fn unknown_feature_is_an_error() {
        let mut store = seeded();
        assert_eq!(
            store.update("depth", vec![1.0]),
            Err(IntervalError::UnknownFeature("depth".to_string()))
        );
    }

    #[test]
    fn clear_dirty_only_touches_given_features() {
        let mut store = seeded();
        store.update("length", vec![3.0]).unwrap();
        store.clear_dirty(&BTreeSet::new());
        assert!(store.any_dirty());
        store.clear_dirty(&BTreeSet::from(["length".to_string()]));
        assert!(!store.any_dirty());
    }
}
