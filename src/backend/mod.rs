//! Evaluation backend - request/response contract
//!
//! The backend's bucketing and statistics are opaque; only these calls
//! matter here:
//!
//! - `POST /systems/analyses`: (re)compute fine-grained analyses
//! - `GET /systems/{id}/outputs?output_ids=..`: case records for a drill-down page
//! - `GET /metric-descriptions`: tooltip text per metric
//!
//! `AnalysisBackend` is the seam the orchestrator and drill-down resolver
//! talk to; `HttpBackend` is the production implementation.

pub mod client;
pub mod error;

pub use client::HttpBackend;
pub use error::BackendError;

use crate::types::{
    CaseId, MetricDescriptions, SystemAnalysesResponse, SystemOutputsResponse,
    SystemsAnalysesRequest,
};
use async_trait::async_trait;

/// Calls the analysis engine needs from the evaluation backend.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Recompute fine-grained analyses for the requested systems.
    async fn analyze(
        &self,
        request: &SystemsAnalysesRequest,
    ) -> Result<SystemAnalysesResponse, BackendError>;

    /// Fetch the output records of the given cases.
    async fn system_outputs(
        &self,
        system_id: &str,
        output_ids: &[CaseId],
    ) -> Result<SystemOutputsResponse, BackendError>;

    /// Metric name to human-readable description.
    async fn metric_descriptions(&self) -> Result<MetricDescriptions, BackendError>;
}

#[async_trait]
impl<B: AnalysisBackend + ?Sized> AnalysisBackend for std::sync::Arc<B> {
    async fn analyze(
        &self,
        request: &SystemsAnalysesRequest,
    ) -> Result<SystemAnalysesResponse, BackendError> {
        (**self).analyze(request).await
    }

    async fn system_outputs(
        &self,
        system_id: &str,
        output_ids: &[CaseId],
    ) -> Result<SystemOutputsResponse, BackendError> {
        (**self).system_outputs(system_id, output_ids).await
    }

    async fn metric_descriptions(&self) -> Result<MetricDescriptions, BackendError> {
        (**self).metric_descriptions().await
    }
}

/// Comma-joined ID list used in query strings.
pub fn join_case_ids(ids: &[CaseId]) -> String {
    ids.iter()
        .map(CaseId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
