//! Analysis Orchestrator - fetch/recompute lifecycle of one analysis session
//!
//! ## States
//!
//! ```text
//! Idle ──open──▶ Loading ──▶ Success ──update──▶ Loading ──▶ ...
//!                   │                               │
//!                   └──────────▶ Error ◀────────────┘
//! ```
//!
//! - A round trip starts when the session is visible with outstanding work:
//!   the first open, or "update analysis" while some feature is dirty.
//! - The round trip races a hard timeout and the session's cancellation token.
//! - Nothing is committed on failure. Earlier results stay on screen with an
//!   error banner; a failed first load shows the fallback view instead.
//! - At most one request is in flight per session. Triggers while Loading are
//!   no-ops.
//!
//! The lifecycle is split into `begin` / `complete` so callers that drive
//! their own event loop can keep editing bucket bounds while a request is in
//! flight. `refresh` runs both halves around the backend call.

use super::intervals::BucketIntervalStore;
use super::normalizer::{normalize, NormalizationError};
use crate::backend::{AnalysisBackend, BackendError};
use crate::config::defaults::RECOMPUTE_TIMEOUT_SECS;
use crate::config::AnalysisConfig;
use crate::types::{
    ParsedResults, SingleAnalysis, SystemAnalysesResponse, SystemModel, SystemsAnalysesRequest,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shown instead of the report when results cannot be normalized.
pub const FALLBACK_MESSAGE: &str = "Fine-grained analysis is not available for the selected systems. \
     Please make sure they were evaluated on the same dataset, or report a bug.";

// ============================================================================
// Session State
// ============================================================================

/// Why a recompute failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Analysis takes too long to complete. Please try again later or report a bug.")]
    Timeout,

    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error("{0}")]
    Backend(String),
}

impl SessionError {
    /// Fatal errors cannot be fixed by retrying the same systems.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Normalization(_))
    }
}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Backend(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Loading,
    Success,
    Error(SessionError),
}

/// What the analysis view should render.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayMode<'a> {
    /// Nothing selected
    Blank,
    /// First load in progress, nothing to show yet
    Loading,
    Report {
        results: &'a ParsedResults,
        /// Error from the latest recompute, shown above stale results
        banner: Option<String>,
        /// A recompute is in flight
        refreshing: bool,
    },
    Fallback {
        message: String,
    },
}

/// Closes a session from outside the task that owns it.
#[derive(Debug, Clone)]
pub struct CloseHandle(CancellationToken);

impl CloseHandle {
    /// Abort any in-flight recompute; the session resets on its next step.
    pub fn close(&self) {
        self.0.cancel();
    }
}

/// One open analysis: compared systems, results and editable bucket bounds.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    systems: Vec<SystemModel>,
    state: SessionState,
    should_update: bool,
    results: Option<ParsedResults>,
    insights: Vec<BTreeMap<String, String>>,
    intervals: BucketIntervalStore,
    generation: u64,
    cancel: CancellationToken,
}

impl AnalysisSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the systems to compare. Selecting a different set starts over.
    pub fn open(&mut self, systems: Vec<SystemModel>) {
        if systems == self.systems && !self.systems.is_empty() {
            return;
        }
        self.reset();
        info!(
            systems = %join_system_ids(&systems),
            count = systems.len(),
            "Analysis session opened"
        );
        self.systems = systems;
    }

    /// Back to Idle with no systems, results or edits.
    ///
    /// Any in-flight recompute is cancelled and its completion discarded.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;
        self.systems.clear();
        self.state = SessionState::Idle;
        self.should_update = true;
        self.results = None;
        self.insights.clear();
        self.intervals.clear();
        debug!(generation = self.generation, "Analysis session reset");
    }

    /// Close the session. Refused while a recompute is in flight.
    pub fn close(&mut self) -> bool {
        if !self.is_closable() {
            return false;
        }
        info!("Analysis session closed");
        self.reset();
        true
    }

    /// Handle that aborts the current request generation.
    ///
    /// Each `open` of a new system set and each `reset` installs a fresh
    /// token, so a handle taken earlier no longer reaches the session. Take
    /// the handle after `open`.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle(self.cancel.clone())
    }

    pub fn systems(&self) -> &[SystemModel] {
        &self.systems
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    pub const fn is_loading(&self) -> bool {
        matches!(self.state, SessionState::Loading)
    }

    pub const fn results(&self) -> Option<&ParsedResults> {
        self.results.as_ref()
    }

    /// Free-form insights the backend returned with the latest results.
    pub fn insights(&self) -> &[BTreeMap<String, String>] {
        &self.insights
    }

    pub const fn intervals(&self) -> &BucketIntervalStore {
        &self.intervals
    }

    /// Bucket bounds are editable in every state, including Loading.
    pub fn intervals_mut(&mut self) -> &mut BucketIntervalStore {
        &mut self.intervals
    }

    pub fn is_visible(&self) -> bool {
        !self.systems.is_empty()
    }

    /// A round trip should start on the next orchestrator step.
    pub fn needs_refresh(&self) -> bool {
        self.is_visible() && self.should_update && !self.is_loading()
    }

    /// "Update analysis" is enabled.
    pub fn can_request_update(&self) -> bool {
        !self.is_loading() && self.intervals.any_dirty()
    }

    /// Press "update analysis". Returns whether a recompute was scheduled.
    pub fn request_update(&mut self) -> bool {
        if !self.can_request_update() {
            debug!(state = ?self.state, "Update request ignored");
            return false;
        }
        self.should_update = true;
        true
    }

    /// Schedule the same request again after a recoverable failure.
    pub fn retry(&mut self) -> bool {
        match &self.state {
            SessionState::Error(e) if !e.is_fatal() => {
                self.should_update = true;
                true
            }
            _ => false,
        }
    }

    pub fn title(&self) -> String {
        match self.systems.as_slice() {
            [only] => format!("Single Analysis of {}", only.system_name),
            [first, second] => format!(
                "Pairwise Analysis of {} and {}",
                first.system_name, second.system_name
            ),
            _ => "Analysis".to_string(),
        }
    }

    pub fn display(&self) -> DisplayMode<'_> {
        if !self.is_visible() {
            return DisplayMode::Blank;
        }
        if let SessionState::Error(e) = &self.state {
            if e.is_fatal() || self.results.is_none() {
                return DisplayMode::Fallback {
                    message: fallback_message(e),
                };
            }
        }
        match &self.results {
            Some(results) => DisplayMode::Report {
                results,
                banner: match &self.state {
                    SessionState::Error(e) => Some(e.to_string()),
                    _ => None,
                },
                refreshing: self.is_loading(),
            },
            None if self.is_loading() => DisplayMode::Loading,
            None => DisplayMode::Blank,
        }
    }

    pub const fn is_closable(&self) -> bool {
        !self.is_loading()
    }
}

fn fallback_message(error: &SessionError) -> String {
    if error.is_fatal() {
        FALLBACK_MESSAGE.to_string()
    } else {
        error.to_string()
    }
}

fn join_system_ids(systems: &[SystemModel]) -> String {
    systems
        .iter()
        .map(|s| s.system_id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Orchestrator
// ============================================================================

/// An issued recompute request, handed back to `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeTicket {
    pub generation: u64,
    pub request: SystemsAnalysesRequest,
    /// Features whose custom bucketing went out with the request
    pub included: BTreeSet<String>,
}

/// Result of one orchestrator step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing to do (no outstanding work, or already Loading)
    Skipped,
    Success,
    Failed(SessionError),
    /// Session was closed or reset while the request was in flight
    Cancelled,
    /// Completion belonged to an older request and was discarded
    Stale,
}

/// Drives sessions through the recompute lifecycle against a backend.
pub struct AnalysisOrchestrator<B> {
    backend: B,
    timeout: Duration,
    pairwise_performance_gap: bool,
}

impl<B: AnalysisBackend> AnalysisOrchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            timeout: Duration::from_secs(RECOMPUTE_TIMEOUT_SECS),
            pairwise_performance_gap: false,
        }
    }

    pub fn from_config(backend: B, config: &AnalysisConfig) -> Self {
        Self {
            backend,
            timeout: config.recompute_timeout(),
            pairwise_performance_gap: config.pairwise_performance_gap,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enter Loading and build the request, if the session has outstanding work.
    ///
    /// Only dirty features are sent; with nothing dirty the override map is
    /// empty and the backend uses its default bucketing.
    pub fn begin(&self, session: &mut AnalysisSession) -> Option<RecomputeTicket> {
        if session.cancel.is_cancelled() {
            session.reset();
            return None;
        }
        if !session.needs_refresh() {
            return None;
        }

        let feature_to_bucket_info = session.intervals.dirty_bucket_info();
        let included: BTreeSet<String> = feature_to_bucket_info.keys().cloned().collect();
        let request = SystemsAnalysesRequest {
            system_ids: join_system_ids(&session.systems),
            pairwise_performance_gap: self.pairwise_performance_gap,
            feature_to_bucket_info,
        };

        session.state = SessionState::Loading;
        session.should_update = false;

        info!(
            systems = %request.system_ids,
            overrides = included.len(),
            generation = session.generation,
            "Analysis recompute requested"
        );

        Some(RecomputeTicket {
            generation: session.generation,
            request,
            included,
        })
    }

    /// Commit (or reject) the backend's answer to `ticket`.
    pub fn complete(
        &self,
        session: &mut AnalysisSession,
        ticket: RecomputeTicket,
        result: Result<SystemAnalysesResponse, SessionError>,
    ) -> RefreshOutcome {
        if ticket.generation != session.generation || !session.is_loading() {
            debug!(
                ticket = ticket.generation,
                current = session.generation,
                "Discarding stale analysis completion"
            );
            return RefreshOutcome::Stale;
        }

        match result.and_then(|response| Self::parse_response(&session.systems, response)) {
            Ok((parsed, insights)) => {
                let settled = settled_features(&session.intervals, &ticket);
                session.intervals.reseed(&parsed, &settled);
                info!(
                    metrics = parsed.len(),
                    features = session.intervals.len(),
                    still_dirty = session.intervals.dirty_features().len(),
                    "Analysis recompute succeeded"
                );
                session.results = Some(parsed);
                session.insights = insights;
                session.state = SessionState::Success;
                RefreshOutcome::Success
            }
            Err(e) => {
                warn!(error = %e, fatal = e.is_fatal(), "Analysis recompute failed");
                session.state = SessionState::Error(e.clone());
                RefreshOutcome::Failed(e)
            }
        }
    }

    /// Run one full step: begin, call the backend under the timeout, complete.
    pub async fn refresh(&self, session: &mut AnalysisSession) -> RefreshOutcome {
        let Some(ticket) = self.begin(session) else {
            return RefreshOutcome::Skipped;
        };

        let cancel = session.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(self.timeout, self.backend.analyze(&ticket.request)) => {
                Some(match res {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(SessionError::from(e)),
                    Err(_) => Err(SessionError::Timeout),
                })
            }
        };

        match result {
            Some(result) => self.complete(session, ticket, result),
            None => {
                info!(generation = ticket.generation, "Analysis recompute cancelled");
                session.reset();
                RefreshOutcome::Cancelled
            }
        }
    }

    /// Pick each system's analyses out of the response and normalize them.
    fn parse_response(
        systems: &[SystemModel],
        response: SystemAnalysesResponse,
    ) -> Result<(ParsedResults, Vec<BTreeMap<String, String>>), SessionError> {
        let SystemAnalysesResponse {
            mut single_analyses,
            system_insights,
        } = response;

        let raw = systems
            .iter()
            .map(|system| {
                single_analyses
                    .remove(&system.system_id)
                    .ok_or_else(|| NormalizationError::MissingSystem(system.system_id.clone()))
            })
            .collect::<Result<Vec<SingleAnalysis>, _>>()?;

        Ok((normalize(systems, &raw)?, system_insights))
    }
}

/// Requested features whose bounds were not edited again while in flight.
fn settled_features(intervals: &BucketIntervalStore, ticket: &RecomputeTicket) -> BTreeSet<String> {
    ticket
        .included
        .iter()
        .filter(|feature| {
            let sent = ticket
                .request
                .feature_to_bucket_info
                .get(feature.as_str())
                .map(|info| &info.setting);
            let current = intervals.get(feature).map(|i| i.request_intervals());
            sent == current.as_ref()
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricDescriptions, SystemOutputsResponse};
    use crate::types::CaseId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn length_response(system_ids: &[&str], bounds: &[f64]) -> SystemAnalysesResponse {
        let buckets: Vec<_> = bounds
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                json!({
                    "bucket_name": [pair[0].to_string(), pair[1].to_string()],
                    "n_samples": 1,
                    "performances": [{"metric_name": "Accuracy", "value": 0.5}],
                    "bucket_samples": [i],
                })
            })
            .collect();
        let analysis = json!({
            "analysis_results": [{
                "cls_name": "BucketAnalysisResult",
                "name": "length",
                "description": "sentence length",
                "method": "continuous",
                "bucket_performances": buckets,
            }]
        });
        let single: serde_json::Map<_, _> = system_ids
            .iter()
            .map(|id| ((*id).to_string(), analysis.clone()))
            .collect();
        serde_json::from_value(json!({"single_analyses": single})).unwrap()
    }

    struct StaticBackend {
        response: SystemAnalysesResponse,
        requests: Mutex<Vec<SystemsAnalysesRequest>>,
    }

    #[async_trait]
    impl AnalysisBackend for StaticBackend {
        async fn analyze(
            &self,
            request: &SystemsAnalysesRequest,
        ) -> Result<SystemAnalysesResponse, BackendError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.response.clone())
        }

        async fn system_outputs(
            &self,
            _system_id: &str,
            _output_ids: &[CaseId],
        ) -> Result<SystemOutputsResponse, BackendError> {
            Ok(SystemOutputsResponse::default())
        }

        async fn metric_descriptions(&self) -> Result<MetricDescriptions, BackendError> {
            Ok(MetricDescriptions::new())
        }
    }

    fn orchestrator(bounds: &[f64]) -> AnalysisOrchestrator<StaticBackend> {
        AnalysisOrchestrator::new(StaticBackend {
            response: length_response(&["s1"], bounds),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn open_single() -> AnalysisSession {
        let mut session = AnalysisSession::new();
        session.open(vec![SystemModel::new("s1", "bert")]);
        session
    }

    #[test]
    fn refresh_without_systems_is_skipped() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = AnalysisSession::new();
        assert_eq!(
            tokio_test::block_on(orch.refresh(&mut session)),
            RefreshOutcome::Skipped
        );
        assert_eq!(session.display(), DisplayMode::Blank);
        assert!(orch.backend().requests.lock().unwrap().is_empty());
    }

    #[test]
    fn titles_follow_system_count() {
        let mut session = AnalysisSession::new();
        assert_eq!(session.title(), "Analysis");
        session.open(vec![SystemModel::new("s1", "bert")]);
        assert_eq!(session.title(), "Single Analysis of bert");
        session.open(vec![SystemModel::new("s1", "bert"), SystemModel::new("s2", "lstm")]);
        assert_eq!(session.title(), "Pairwise Analysis of bert and lstm");
    }

    #[test]
    fn begin_is_a_noop_while_loading() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = open_single();

        let ticket = orch.begin(&mut session).unwrap();
        assert!(ticket.request.feature_to_bucket_info.is_empty());
        assert_eq!(ticket.request.system_ids, "s1");
        assert!(session.is_loading());
        assert!(!session.is_closable());
        assert_eq!(session.display(), DisplayMode::Loading);

        assert!(orch.begin(&mut session).is_none());
        assert!(!session.request_update());
    }

    #[test]
    fn stale_completion_is_discarded() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = open_single();
        let ticket = orch.begin(&mut session).unwrap();

        session.reset();
        session.open(vec![SystemModel::new("s1", "bert")]);

        let response = orch.backend().response.clone();
        assert_eq!(
            orch.complete(&mut session, ticket, Ok(response)),
            RefreshOutcome::Stale
        );
        assert!(session.results().is_none());
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn edits_during_loading_survive_success() {
        let orch = orchestrator(&[0.0, 5.0, 10.0]);
        let mut session = open_single();
        let first = orch.begin(&mut session).unwrap();
        let response = orch.backend().response.clone();
        assert_eq!(
            orch.complete(&mut session, first, Ok(response.clone())),
            RefreshOutcome::Success
        );

        session.intervals_mut().update("length", vec![3.0]).unwrap();
        assert!(session.request_update());
        let second = orch.begin(&mut session).unwrap();
        assert!(second.included.contains("length"));

        // edited again while the request is in flight
        session.intervals_mut().update("length", vec![7.0]).unwrap();

        assert_eq!(
            orch.complete(&mut session, second, Ok(response)),
            RefreshOutcome::Success
        );
        let interval = session.intervals().get("length").unwrap();
        assert!(interval.dirty);
        assert_eq!(interval.right_bounds, vec![7.0]);
        assert!(session.can_request_update());
    }

    #[test]
    fn failed_first_load_shows_fallback_and_can_retry() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = open_single();
        let ticket = orch.begin(&mut session).unwrap();

        let outcome = orch.complete(&mut session, ticket, Err(SessionError::Timeout));
        assert_eq!(outcome, RefreshOutcome::Failed(SessionError::Timeout));
        assert!(matches!(session.display(), DisplayMode::Fallback { message } if message.contains("too long")));
        assert!(session.retry());
        assert!(session.needs_refresh());
    }

    #[test]
    fn missing_system_in_response_is_fatal() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = AnalysisSession::new();
        session.open(vec![SystemModel::new("s1", "bert"), SystemModel::new("s2", "lstm")]);
        let ticket = orch.begin(&mut session).unwrap();
        let response = orch.backend().response.clone();

        let outcome = orch.complete(&mut session, ticket, Ok(response));
        assert_eq!(
            outcome,
            RefreshOutcome::Failed(SessionError::Normalization(
                NormalizationError::MissingSystem("s2".to_string())
            ))
        );
        assert_eq!(
            session.display(),
            DisplayMode::Fallback {
                message: FALLBACK_MESSAGE.to_string()
            }
        );
        assert!(!session.retry());
    }

    #[test]
    fn close_handle_resets_on_next_step() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = open_single();
        session.close_handle().close();

        assert!(orch.begin(&mut session).is_none());
        assert!(!session.is_visible());
        assert_eq!(session.display(), DisplayMode::Blank);
    }

    #[test]
    fn close_handle_from_before_reopen_is_inert() {
        let orch = orchestrator(&[0.0, 10.0]);
        let mut session = AnalysisSession::new();
        let stale = session.close_handle();
        session.open(vec![SystemModel::new("s1", "bert")]);

        stale.close();
        let ticket = orch.begin(&mut session);
        assert!(ticket.is_some());
        assert!(session.is_loading());
    }

    #[tokio::test]
    async fn refresh_commits_results_and_insights() {
        let orch = orchestrator(&[0.0, 5.0, 10.0]);
        let mut session = open_single();

        assert_eq!(orch.refresh(&mut session).await, RefreshOutcome::Success);
        assert_eq!(session.state(), &SessionState::Success);
        assert!(session.results().unwrap().get("Accuracy", "length").is_some());
        assert_eq!(session.intervals().get("length").unwrap().right_bounds, vec![5.0]);
        assert!(!session.can_request_update());

        // Nothing outstanding
        assert_eq!(orch.refresh(&mut session).await, RefreshOutcome::Skipped);
        assert_eq!(orch.backend().requests.lock().unwrap().len(), 1);
    }
}
