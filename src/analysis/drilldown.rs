//! Drill-Down Resolver - clicked bar or combo cell to paginated case records
//!
//! A click resolves to one case-ID list per compared system. Only the current
//! page of the selected system's list is fetched from the backend. Changing
//! the feature, bucket or system starts again at page 0.
//!
//! Every fetch carries a `FetchKey`; a completion whose key no longer matches
//! the current selection is dropped. Fetch failures never leave this module:
//! they become a notice above an empty table.

use crate::backend::{join_case_ids, AnalysisBackend, BackendError};
use crate::config::AnalysisConfig;
use crate::types::{CaseId, ParsedFeatureResult, ParsedResults, SystemModel, SystemOutputsResponse};
use futures::future::join_all;
use serde::Serialize;
use std::ops::Range;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use crate::config::defaults::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrillDownError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown feature '{feature}' for metric '{metric}'")]
    UnknownFeature { metric: String, feature: String },

    #[error("bucket {index} out of range for feature '{feature}' ({count} buckets)")]
    BucketOutOfRange {
        feature: String,
        index: usize,
        count: usize,
    },

    #[error("combo entry {index} out of range for feature '{feature}' ({count} entries)")]
    ComboEntryOutOfRange {
        feature: String,
        index: usize,
        count: usize,
    },

    #[error("system {index} out of range ({count} systems)")]
    SystemOutOfRange { index: usize, count: usize },

    #[error("page {page} out of range ({pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },

    #[error("no bar or combo entry is selected")]
    NoSelection,
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Sort case IDs numerically when every ID is an integer, else as text.
pub fn sort_case_ids(ids: &mut [CaseId]) {
    if ids.iter().all(|id| id.as_integer().is_some()) {
        ids.sort_by_key(CaseId::as_integer);
    } else {
        ids.sort();
    }
}

/// Half-open index range of `page` in a list of `total` items.
pub fn page_range(total: usize, page: usize, page_size: usize) -> Range<usize> {
    let offset = page.saturating_mul(page_size).min(total);
    let end = offset.saturating_add(page_size).min(total);
    offset..end
}

/// Number of pages needed for `total` items.
pub const fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        total.div_ceil(page_size)
    }
}

/// Sorted case IDs of one bucket for every system.
pub fn resolve_cases(
    per_system: &[ParsedFeatureResult],
    bucket_index: usize,
) -> Result<Vec<Vec<CaseId>>, DrillDownError> {
    per_system
        .iter()
        .map(|parsed| {
            let mut ids = parsed
                .buckets_of_samples
                .get(bucket_index)
                .ok_or_else(|| DrillDownError::BucketOutOfRange {
                    feature: parsed.feature_name.clone(),
                    index: bucket_index,
                    count: parsed.buckets_of_samples.len(),
                })?
                .clone();
            sort_case_ids(&mut ids);
            Ok(ids)
        })
        .collect()
}

// ============================================================================
// Selection and table state
// ============================================================================

/// The clicked bar (or combo cell) and the case lists behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveDrillDown {
    pub title: String,
    pub metric: String,
    pub feature: String,
    pub bucket_index: usize,
    /// Index into `system_ids` / `per_system_case_lists` of the table's system
    pub system_index: usize,
    pub system_ids: Vec<String>,
    pub per_system_case_lists: Vec<Vec<CaseId>>,
}

impl ActiveDrillDown {
    /// Case IDs of the selected system.
    pub fn cases(&self) -> &[CaseId] {
        self.per_system_case_lists
            .get(self.system_index)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn system_id(&self) -> Option<&str> {
        self.system_ids.get(self.system_index).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// Message shown above the case table after a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl From<&BackendError> for Notice {
    fn from(e: &BackendError) -> Self {
        Self {
            level: if e.is_warning() {
                NoticeLevel::Warning
            } else {
                NoticeLevel::Error
            },
            message: e.to_string(),
        }
    }
}

/// Rows of the current page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaseTable {
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Case count of the selected system, across all pages
    pub total: usize,
    pub notice: Option<Notice>,
}

/// Identity of one page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub system_id: String,
    pub id_string: String,
    pub page: usize,
}

/// A page fetch to issue against the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseFetch {
    pub key: FetchKey,
    pub output_ids: Vec<CaseId>,
}

// ============================================================================
// Resolver
// ============================================================================

#[derive(Debug, Clone)]
pub struct DrillDownResolver {
    page_size: usize,
    active: Option<ActiveDrillDown>,
    page: usize,
    table: CaseTable,
}

impl Default for DrillDownResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl DrillDownResolver {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            active: None,
            page: 0,
            table: CaseTable::default(),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.page_size)
    }

    /// Select bar `bucket_index` of `feature` under `metric`.
    ///
    /// Case lists are resolved for every system; the table shows
    /// `system_index`'s list starting at page 0.
    pub fn resolve(
        &mut self,
        results: &ParsedResults,
        systems: &[SystemModel],
        metric: &str,
        feature: &str,
        bucket_index: usize,
        system_index: usize,
    ) -> Result<&ActiveDrillDown, DrillDownError> {
        let per_system = lookup(results, metric, feature)?;
        check_system(system_index, per_system.len())?;

        let per_system_case_lists = resolve_cases(per_system, bucket_index)?;
        let description = per_system
            .first()
            .map_or(feature, |parsed| parsed.feature_description.as_str());

        info!(metric, feature, bucket = bucket_index, system = system_index, "Drill-down resolved");

        Ok(self.activate(ActiveDrillDown {
            title: format!(
                "Examples from bar # {} in {metric} by {description}",
                bucket_index + 1
            ),
            metric: metric.to_string(),
            feature: feature.to_string(),
            bucket_index,
            system_index,
            system_ids: systems.iter().map(|s| s.system_id.clone()).collect(),
            per_system_case_lists,
        }))
    }

    /// Select entry `entry_index` of a combo feature for one system.
    pub fn resolve_combo(
        &mut self,
        results: &ParsedResults,
        systems: &[SystemModel],
        metric: &str,
        feature: &str,
        entry_index: usize,
        system_index: usize,
    ) -> Result<&ActiveDrillDown, DrillDownError> {
        let per_system = lookup(results, metric, feature)?;
        check_system(system_index, per_system.len())?;
        let system = systems.get(system_index).ok_or(DrillDownError::SystemOutOfRange {
            index: system_index,
            count: systems.len(),
        })?;

        let parsed = &per_system[system_index];
        let entry = parsed.combo_counts.get(entry_index).ok_or_else(|| {
            DrillDownError::ComboEntryOutOfRange {
                feature: feature.to_string(),
                index: entry_index,
                count: parsed.combo_counts.len(),
            }
        })?;
        let mut ids = entry.sample_ids.clone();
        sort_case_ids(&mut ids);

        info!(feature, entry = entry_index, system = %system.system_id, "Combo drill-down resolved");

        Ok(self.activate(ActiveDrillDown {
            title: format!(
                "Examples of ({}, {}) in {}",
                entry.bucket_pair.0, entry.bucket_pair.1, parsed.feature_description
            ),
            metric: metric.to_string(),
            feature: feature.to_string(),
            bucket_index: entry_index,
            system_index: 0,
            system_ids: vec![system.system_id.clone()],
            per_system_case_lists: vec![ids],
        }))
    }

    fn activate(&mut self, active: ActiveDrillDown) -> &ActiveDrillDown {
        self.page = 0;
        self.table = CaseTable {
            total: active.cases().len(),
            ..CaseTable::default()
        };
        self.active.insert(active)
    }

    /// Show another system's cases for the same bar.
    pub fn select_system(&mut self, system_index: usize) -> Result<(), DrillDownError> {
        let active = self.active.as_mut().ok_or(DrillDownError::NoSelection)?;
        check_system(system_index, active.per_system_case_lists.len())?;
        if active.system_index != system_index {
            active.system_index = system_index;
            self.page = 0;
            self.table = CaseTable {
                total: active.cases().len(),
                ..CaseTable::default()
            };
        }
        Ok(())
    }

    pub fn set_page(&mut self, page: usize) -> Result<(), DrillDownError> {
        let pages = self.page_count();
        if page != 0 && page >= pages {
            return Err(DrillDownError::PageOutOfRange { page, pages });
        }
        if page != self.page {
            self.page = page;
            self.table.rows.clear();
            self.table.notice = None;
        }
        Ok(())
    }

    pub const fn page(&self) -> usize {
        self.page
    }

    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.active
            .as_ref()
            .map_or(0, |active| page_count(active.cases().len(), self.page_size))
    }

    pub const fn active(&self) -> Option<&ActiveDrillDown> {
        self.active.as_ref()
    }

    pub const fn table(&self) -> &CaseTable {
        &self.table
    }

    /// Case IDs on the current page of the selected system.
    pub fn current_slice(&self) -> &[CaseId] {
        let Some(active) = &self.active else {
            return &[];
        };
        let cases = active.cases();
        &cases[page_range(cases.len(), self.page, self.page_size)]
    }

    /// Key of the fetch the table is currently waiting for.
    pub fn current_key(&self) -> Option<FetchKey> {
        let system_id = self.active.as_ref()?.system_id()?.to_string();
        Some(FetchKey {
            system_id,
            id_string: join_case_ids(self.current_slice()),
            page: self.page,
        })
    }

    /// The fetch for the current page, or `None` if there is nothing to show.
    pub fn next_fetch(&self) -> Option<CaseFetch> {
        let output_ids = self.current_slice().to_vec();
        if output_ids.is_empty() {
            return None;
        }
        Some(CaseFetch {
            key: self.current_key()?,
            output_ids,
        })
    }

    /// Apply a fetch result. Returns `false` if it was stale and dropped.
    pub fn complete_fetch(
        &mut self,
        key: &FetchKey,
        result: Result<SystemOutputsResponse, BackendError>,
    ) -> bool {
        if self.current_key().as_ref() != Some(key) {
            debug!(system_id = %key.system_id, page = key.page, "Dropping stale case fetch");
            return false;
        }
        match result {
            Ok(response) => {
                debug!(system_id = %key.system_id, page = key.page, rows = response.system_outputs.len(), "Case page loaded");
                self.table.rows = response.system_outputs;
                self.table.notice = None;
            }
            Err(e) => {
                warn!(system_id = %key.system_id, page = key.page, error = %e, "Case fetch failed");
                self.table.rows.clear();
                self.table.notice = Some(Notice::from(&e));
            }
        }
        true
    }

    /// Fetch and apply the current page.
    pub async fn load_page<B>(&mut self, backend: &B) -> &CaseTable
    where
        B: AnalysisBackend + ?Sized,
    {
        if let Some(fetch) = self.next_fetch() {
            let result = backend
                .system_outputs(&fetch.key.system_id, &fetch.output_ids)
                .await;
            self.complete_fetch(&fetch.key, result);
        }
        &self.table
    }

    /// Current page of every system's list, fetched concurrently.
    ///
    /// Systems with no cases on this page are skipped.
    pub async fn fetch_page_for_all_systems<B>(
        &self,
        backend: &B,
    ) -> Vec<(String, Result<SystemOutputsResponse, BackendError>)>
    where
        B: AnalysisBackend + ?Sized,
    {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        let fetches = active
            .system_ids
            .iter()
            .zip(&active.per_system_case_lists)
            .filter_map(|(system_id, cases)| {
                let slice = &cases[page_range(cases.len(), self.page, self.page_size)];
                (!slice.is_empty()).then(|| async move {
                    (
                        system_id.clone(),
                        backend.system_outputs(system_id, slice).await,
                    )
                })
            });
        join_all(fetches).await
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.page = 0;
        self.table = CaseTable::default();
    }
}

fn lookup<'a>(
    results: &'a ParsedResults,
    metric: &str,
    feature: &str,
) -> Result<&'a [ParsedFeatureResult], DrillDownError> {
    let features = results
        .metric(metric)
        .ok_or_else(|| DrillDownError::UnknownMetric(metric.to_string()))?;
    features
        .get(feature)
        .map(Vec::as_slice)
        .ok_or_else(|| DrillDownError::UnknownFeature {
            metric: metric.to_string(),
            feature: feature.to_string(),
        })
}

const fn check_system(index: usize, count: usize) -> Result<(), DrillDownError> {
    if index < count {
        Ok(())
    } else {
        Err(DrillDownError::SystemOutOfRange { index, count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalizer::normalize;
    use crate::types::{MetricDescriptions, SingleAnalysis, SystemAnalysesResponse, SystemsAnalysesRequest};
    use async_trait::async_trait;
    use serde_json::json;

    fn ids(raw: &[&str]) -> Vec<CaseId> {
        raw.iter().map(|s| CaseId::from(*s)).collect()
    }

    fn systems() -> Vec<SystemModel> {
        vec![SystemModel::new("s1", "bert"), SystemModel::new("s2", "lstm")]
    }

    fn analysis(samples: &[Vec<u64>]) -> SingleAnalysis {
        serde_json::from_value(json!({
            "analysis_results": [
                {
                    "cls_name": "BucketAnalysisResult",
                    "name": "length",
                    "description": "sentence length",
                    "bucket_performances": [
                        {
                            "bucket_name": ["0", "5"],
                            "n_samples": samples[0].len(),
                            "performances": [{"metric_name": "F1", "value": 0.8}],
                            "bucket_samples": samples[0],
                        },
                        {
                            "bucket_name": ["5", "10"],
                            "n_samples": samples[1].len(),
                            "performances": [{"metric_name": "F1", "value": 0.6}],
                            "bucket_samples": samples[1],
                        }
                    ]
                },
                {
                    "cls_name": "ComboCountAnalysisResult",
                    "name": "label_pair",
                    "description": "gold vs predicted",
                    "features": ["gold", "pred"],
                    "combo_occurrences": [
                        {"features": ["pos", "neg"], "sample_count": 2, "sample_ids": ["b", "a"]}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    fn results() -> ParsedResults {
        let big: Vec<u64> = (0..25).rev().collect();
        normalize(
            &systems(),
            &[
                analysis(&[vec![10, 9, 2], big.clone()]),
                analysis(&[vec![4], vec![7, 3]]),
            ],
        )
        .unwrap()
    }

    struct EchoBackend {
        fail_with: Option<i64>,
    }

    #[async_trait]
    impl AnalysisBackend for EchoBackend {
        async fn analyze(
            &self,
            _request: &SystemsAnalysesRequest,
        ) -> Result<SystemAnalysesResponse, BackendError> {
            Ok(SystemAnalysesResponse::default())
        }

        async fn system_outputs(
            &self,
            system_id: &str,
            output_ids: &[CaseId],
        ) -> Result<SystemOutputsResponse, BackendError> {
            if let Some(code) = self.fail_with {
                return Err(BackendError::Api {
                    status: 403,
                    error_code: Some(code),
                    detail: "denied".to_string(),
                });
            }
            let system_outputs = output_ids
                .iter()
                .map(|id| {
                    let mut row = serde_json::Map::new();
                    row.insert("system".to_string(), json!(system_id));
                    row.insert("id".to_string(), json!(id.as_str()));
                    row
                })
                .collect::<Vec<_>>();
            Ok(SystemOutputsResponse {
                total: system_outputs.len() as u64,
                system_outputs,
            })
        }

        async fn metric_descriptions(&self) -> Result<MetricDescriptions, BackendError> {
            Ok(MetricDescriptions::new())
        }
    }

    #[test]
    fn integer_ids_sort_numerically() {
        let mut list = ids(&["10", "9", "100", "2"]);
        sort_case_ids(&mut list);
        assert_eq!(list, ids(&["2", "9", "10", "100"]));
    }

    #[test]
    fn mixed_ids_sort_as_text() {
        let mut list = ids(&["10", "9", "a1"]);
        sort_case_ids(&mut list);
        assert_eq!(list, ids(&["10", "9", "a1"]));
    }

    #[test]
    fn page_range_clamps_to_total() {
        assert_eq!(page_range(25, 2, 10), 20..25);
        assert_eq!(page_range(25, 0, 10), 0..10);
        assert_eq!(page_range(25, 5, 10), 25..25);
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(0, 10), 0);
    }

    #[test]
    fn resolve_sorts_every_system_and_titles_the_bar() {
        let mut resolver = DrillDownResolver::default();
        let active = resolver
            .resolve(&results(), &systems(), "F1", "length", 0, 0)
            .unwrap();
        assert_eq!(active.title, "Examples from bar # 1 in F1 by sentence length");
        assert_eq!(active.per_system_case_lists[0], ids(&["2", "9", "10"]));
        assert_eq!(active.per_system_case_lists[1], ids(&["4"]));
        assert_eq!(active.system_id(), Some("s1"));
    }

    #[test]
    fn resolve_rejects_bad_indices() {
        let mut resolver = DrillDownResolver::default();
        let parsed = results();
        assert!(matches!(
            resolver.resolve(&parsed, &systems(), "F1", "length", 2, 0),
            Err(DrillDownError::BucketOutOfRange { index: 2, count: 2, .. })
        ));
        assert!(matches!(
            resolver.resolve(&parsed, &systems(), "F1", "length", 0, 2),
            Err(DrillDownError::SystemOutOfRange { index: 2, count: 2 })
        ));
        assert_eq!(
            resolver.resolve(&parsed, &systems(), "BLEU", "length", 0, 0),
            Err(DrillDownError::UnknownMetric("BLEU".to_string()))
        );
        assert!(resolver.active().is_none());
    }

    #[test]
    fn changing_selection_resets_page() {
        let mut resolver = DrillDownResolver::default();
        let parsed = results();
        resolver.resolve(&parsed, &systems(), "F1", "length", 1, 0).unwrap();
        assert_eq!(resolver.page_count(), 3);

        resolver.set_page(2).unwrap();
        assert_eq!(resolver.current_slice().len(), 5);
        assert_eq!(resolver.current_slice()[0], CaseId::from(20));

        resolver.select_system(1).unwrap();
        assert_eq!(resolver.page(), 0);
        assert_eq!(resolver.table().total, 2);

        resolver.set_page(0).unwrap();
        resolver.resolve(&parsed, &systems(), "F1", "length", 0, 1).unwrap();
        assert_eq!(resolver.page(), 0);
        assert_eq!(
            resolver.set_page(1),
            Err(DrillDownError::PageOutOfRange { page: 1, pages: 1 })
        );
    }

    #[test]
    fn combo_entry_resolves_one_system() {
        let mut resolver = DrillDownResolver::default();
        let active = resolver
            .resolve_combo(&results(), &systems(), "F1", "label_pair", 0, 1)
            .unwrap();
        assert_eq!(active.system_ids, vec!["s2".to_string()]);
        assert_eq!(active.per_system_case_lists, vec![ids(&["a", "b"])]);
        assert_eq!(active.title, "Examples of (pos, neg) in gold vs predicted");
    }

    #[tokio::test]
    async fn load_page_fetches_only_the_slice() {
        let backend = EchoBackend { fail_with: None };
        let mut resolver = DrillDownResolver::default();
        resolver.resolve(&results(), &systems(), "F1", "length", 1, 0).unwrap();
        resolver.set_page(1).unwrap();

        let table = resolver.load_page(&backend).await;
        assert_eq!(table.rows.len(), 10);
        assert_eq!(table.rows[0]["id"], json!("10"));
        assert_eq!(table.total, 25);
        assert!(table.notice.is_none());
    }

    #[tokio::test]
    async fn stale_fetch_is_dropped() {
        let backend = EchoBackend { fail_with: None };
        let mut resolver = DrillDownResolver::default();
        resolver.resolve(&results(), &systems(), "F1", "length", 1, 0).unwrap();

        let fetch = resolver.next_fetch().unwrap();
        resolver.set_page(1).unwrap();
        let result = backend.system_outputs("s1", &fetch.output_ids).await;

        assert!(!resolver.complete_fetch(&fetch.key, result));
        assert!(resolver.table().rows.is_empty());
    }

    #[tokio::test]
    async fn permission_error_becomes_warning_notice() {
        let backend = EchoBackend { fail_with: Some(40301) };
        let mut resolver = DrillDownResolver::default();
        resolver.resolve(&results(), &systems(), "F1", "length", 0, 0).unwrap();

        let table = resolver.load_page(&backend).await;
        assert!(table.rows.is_empty());
        let notice = table.notice.as_ref().unwrap();
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert_eq!(notice.message, "[403: 40301] denied");

        let backend = EchoBackend { fail_with: Some(50000) };
        let table = resolver.load_page(&backend).await;
        assert_eq!(table.notice.as_ref().unwrap().level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn all_systems_page_fetch_skips_empty_lists() {
        let backend = EchoBackend { fail_with: None };
        let mut resolver = DrillDownResolver::default();
        resolver.resolve(&results(), &systems(), "F1", "length", 1, 0).unwrap();
        resolver.set_page(1).unwrap();

        let pages = resolver.fetch_page_for_all_systems(&backend).await;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, "s1");
        assert_eq!(pages[0].1.as_ref().unwrap().system_outputs.len(), 10);
    }
}
