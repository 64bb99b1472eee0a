//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Config Loading
// ============================================================================

/// Environment variable holding the path to a TOML config file.
pub const CONFIG_ENV_VAR: &str = "BUCKETLENS_CONFIG";

/// Config file looked up in the current working directory.
pub const LOCAL_CONFIG_FILE: &str = "bucketlens.toml";

// ============================================================================
// Backend Client
// ============================================================================

/// Evaluation backend base URL used when none is configured.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000/api";

/// HTTP client timeout for backend requests (seconds).
///
/// Kept above the recompute timeout so the session timer fires first.
pub const BACKEND_HTTP_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Analysis Session
// ============================================================================

/// Hard limit on one analysis recompute round trip (seconds).
pub const RECOMPUTE_TIMEOUT_SECS: u64 = 20;

/// Upper bound accepted for `analysis.recompute_timeout_secs`.
pub const MAX_RECOMPUTE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Drill-Down
// ============================================================================

/// Cases shown per drill-down table page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Upper bound accepted for `analysis.page_size`.
pub const MAX_PAGE_SIZE: usize = 100;
