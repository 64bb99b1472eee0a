//! HTTP client for the evaluation backend
//!
//! Handles the analysis recompute call, case-output lookups and metric
//! descriptions.

use super::error::BackendError;
use super::{join_case_ids, AnalysisBackend};
use crate::config::BackendConfig;
use crate::types::{
    CaseId, MetricDescriptions, SystemAnalysesResponse, SystemOutputsResponse,
    SystemsAnalysesRequest,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// HTTP client for backend communication
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpBackend {
    /// Create a new backend client
    pub fn new(
        base_url: &str,
        api_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.map(ToString::to_string),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        Self::new(
            &config.base_url,
            config.api_token.as_deref(),
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Get base URL for logging
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.header("Authorization", format!("Bearer {token}")),
            None => req,
        }
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
        if !resp.status().is_success() {
            return Err(BackendError::from_response(resp).await);
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn analyze(
        &self,
        request: &SystemsAnalysesRequest,
    ) -> Result<SystemAnalysesResponse, BackendError> {
        debug!(
            systems = %request.system_ids,
            overrides = request.feature_to_bucket_info.len(),
            "POST /systems/analyses"
        );
        let resp = self
            .authorize(self.http.post(format!("{}/systems/analyses", self.base_url)))
            .json(request)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn system_outputs(
        &self,
        system_id: &str,
        output_ids: &[CaseId],
    ) -> Result<SystemOutputsResponse, BackendError> {
        debug!(system_id, ids = output_ids.len(), "GET /systems/{{id}}/outputs");
        let resp = self
            .authorize(
                self.http
                    .get(format!("{}/systems/{}/outputs", self.base_url, system_id)),
            )
            .query(&[("output_ids", join_case_ids(output_ids))])
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn metric_descriptions(&self) -> Result<MetricDescriptions, BackendError> {
        let resp = self
            .authorize(self.http.get(format!("{}/metric-descriptions", self.base_url)))
            .send()
            .await?;
        Self::decode(resp).await
    }
}
