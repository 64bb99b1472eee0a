//! Client configuration structs, loading and validation

use super::defaults::{
    BACKEND_HTTP_TIMEOUT_SECS, CONFIG_ENV_VAR, DEFAULT_BACKEND_URL, DEFAULT_PAGE_SIZE,
    LOCAL_CONFIG_FILE, RECOMPUTE_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl ClientConfig {
    /// Load configuration using the standard search order.
    ///
    /// Never fails: unreadable or invalid files are logged and skipped.
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), backend = %config.backend.base_url, "Loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        // 2. Check ./bucketlens.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(backend = %config.backend.base_url, "Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are logged as warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Suspicious values are logged, impossible ones fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!(field = %w.field, "{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Serialize to TOML, e.g. to write out a starter config.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Backend
// ============================================================================

/// Evaluation backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; endpoint paths are appended to it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional bearer token sent as `Authorization: Bearer <token>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Per-request HTTP timeout (seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

const fn default_http_timeout_secs() -> u64 {
    BACKEND_HTTP_TIMEOUT_SECS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Analysis session and drill-down settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Hard limit on one recompute round trip (seconds)
    #[serde(default = "default_recompute_timeout_secs")]
    pub recompute_timeout_secs: u64,

    /// Cases per drill-down page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Ask the backend for pairwise performance-gap analyses
    #[serde(default)]
    pub pairwise_performance_gap: bool,
}

const fn default_recompute_timeout_secs() -> u64 {
    RECOMPUTE_TIMEOUT_SECS
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            recompute_timeout_secs: default_recompute_timeout_secs(),
            page_size: default_page_size(),
            pairwise_performance_gap: false,
        }
    }
}

impl AnalysisConfig {
    pub const fn recompute_timeout(&self) -> Duration {
        Duration::from_secs(self.recompute_timeout_secs)
    }
}
