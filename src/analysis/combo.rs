//! Combo Count Normalizer - two-feature co-occurrence results
//!
//! Combo results do not depend on a metric, so each is normalized once with
//! an empty metric name and then attached under every metric's feature map.
//! Callers can then walk `results[metric]` without special-casing combos.

use super::formatting::{round_to, VALUE_DECIMAL_PLACES};
use super::normalizer::{NormalizationError, SlotMap, SystemSlots};
use crate::types::{ComboCount, ComboCountAnalysis, ParsedFeatureResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Normalize one combo analysis into a metric-independent parsed result.
pub fn normalize_combo(raw: &ComboCountAnalysis) -> ParsedFeatureResult {
    let description = raw.description.as_deref().unwrap_or(&raw.name);
    let mut parsed = ParsedFeatureResult::new("", &raw.name, description);
    parsed.discrete = true;
    parsed.combo_counts = raw
        .combo_occurrences
        .iter()
        .map(|occurrence| ComboCount {
            bucket_pair: occurrence.features.clone(),
            count: occurrence.sample_count,
            sample_ids: occurrence.sample_ids.clone(),
        })
        .collect();
    parsed
}

/// Attach every combo feature under every metric already present in `slots`.
///
/// A combo named like an existing bucket feature is rejected.
pub fn attach_combos(
    slots: &mut SlotMap,
    combos: &BTreeMap<String, SystemSlots>,
) -> Result<(), NormalizationError> {
    if combos.is_empty() {
        return Ok(());
    }
    for features in slots.values_mut() {
        for (name, per_system) in combos {
            if features.contains_key(name) {
                return Err(NormalizationError::ComboNameCollision(name.clone()));
            }
            features.insert(name.clone(), per_system.clone());
        }
    }
    Ok(())
}

/// One cell of a combo heat map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboCell {
    /// Index into `ComboMatrix::categories` of the first feature's value
    pub row: usize,
    /// Index into `ComboMatrix::categories` of the second feature's value
    pub column: usize,
    pub count: u64,
    /// Share of the row's samples, rounded to 3 decimal places
    pub ratio: f64,
}

/// Heat-map view of a combo result.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ComboMatrix {
    /// Category labels in order of first appearance
    pub categories: Vec<String>,
    /// One cell per combo count, in the same order as `combo_counts`
    pub cells: Vec<ComboCell>,
}

impl ComboMatrix {
    /// Build the heat-map view; rows are normalized so each row's ratios sum to 1.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_result(parsed: &ParsedFeatureResult) -> Self {
        fn index_of(label: &str, categories: &mut Vec<String>) -> usize {
            categories.iter().position(|c| c == label).unwrap_or_else(|| {
                categories.push(label.to_string());
                categories.len() - 1
            })
        }

        let mut categories: Vec<String> = Vec::new();

        let raw_cells: Vec<(usize, usize, u64)> = parsed
            .combo_counts
            .iter()
            .map(|combo| {
                let row = index_of(&combo.bucket_pair.0, &mut categories);
                let column = index_of(&combo.bucket_pair.1, &mut categories);
                (row, column, combo.count)
            })
            .collect();

        let mut row_totals: BTreeMap<usize, u64> = BTreeMap::new();
        for &(row, _, count) in &raw_cells {
            *row_totals.entry(row).or_default() += count;
        }

        let cells = raw_cells
            .into_iter()
            .map(|(row, column, count)| {
                let total = row_totals.get(&row).copied().unwrap_or(0);
                let ratio = if total == 0 {
                    0.0
                } else {
                    round_to(count as f64 / total as f64, VALUE_DECIMAL_PLACES)
                };
                ComboCell {
                    row,
                    column,
                    count,
                    ratio,
                }
            })
            .collect();

        Self { categories, cells }
    }
}
