//! bucketlens: Fine-Grained System Analysis
//!
//! Client-side engine for single and pairwise fine-grained (bucketed)
//! analysis of evaluated systems.
//!
//! ## Architecture
//!
//! - **Types**: backend wire format and the normalized cross-system view
//! - **Analysis**: normalization, bucket editing, session lifecycle, drill-down
//! - **Backend**: `AnalysisBackend` seam and its reqwest implementation
//! - **Config**: TOML client configuration with validation

pub mod analysis;
pub mod backend;
pub mod config;
pub mod types;

// Re-export client configuration
pub use config::ClientConfig;

// Re-export commonly used types
pub use types::{
    AnalysisResult, CaseId, ParsedFeatureResult, ParsedResults, SystemAnalysesResponse,
    SystemModel, SystemsAnalysesRequest,
};

// Re-export the analysis engine
pub use analysis::{
    normalize, AnalysisOrchestrator, AnalysisSession, BucketIntervalStore, DisplayMode,
    DrillDownResolver, NormalizationError, RefreshOutcome, SessionError, SessionState,
};

// Re-export backend components
pub use backend::{AnalysisBackend, BackendError, HttpBackend};
