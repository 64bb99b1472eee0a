//! Backend error type and error-body parsing

use serde::Deserialize;

/// Backend error code for "permission denied, show as a warning".
pub const PERMISSION_WARNING_CODE: i64 = 40301;

/// Evaluation backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status with the backend's `{error_code, detail}` body
    #[error("[{}{}] {}", .status, code_suffix(*.error_code), .detail)]
    Api {
        status: u16,
        error_code: Option<i64>,
        detail: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error body returned by the backend on non-success statuses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    detail: Option<String>,
}

fn code_suffix(code: Option<i64>) -> String {
    match code {
        Some(code) if code != -1 => format!(": {code}"),
        _ => String::new(),
    }
}

impl BackendError {
    /// Build an `Api` error from a status and raw body.
    ///
    /// Falls back to the raw body text when it is not the usual JSON shape.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => Self::Api {
                status,
                error_code: parsed.error_code,
                detail: parsed.detail.unwrap_or_default(),
            },
            Err(_) => Self::Api {
                status,
                error_code: None,
                detail: String::from_utf8_lossy(body).trim().to_string(),
            },
        }
    }

    /// Drain a failed response into an `Api` error.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        match resp.bytes().await {
            Ok(body) => Self::from_body(status, &body),
            Err(e) => Self::Http(e),
        }
    }

    pub const fn error_code(&self) -> Option<i64> {
        match self {
            Self::Api { error_code, .. } => *error_code,
            _ => None,
        }
    }

    /// Whether the error should be shown as a warning rather than an error.
    pub const fn is_warning(&self) -> bool {
        matches!(self.error_code(), Some(PERMISSION_WARNING_CODE))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_timeout())
    }
}
