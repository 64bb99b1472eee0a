//! Fine-grained analysis engine
//!
//! Turns the backend's per-system bucket analyses into one aligned,
//! cross-system view and drives the recompute lifecycle around it.
//!
//! ## Components
//!
//! - **formatting**: bucket labels to display names and numeric bounds
//! - **normalizer**: per-system raw results to `ParsedResults`
//! - **combo**: two-feature co-occurrence results and their heat-map view
//! - **intervals**: user-editable bucket boundaries per feature
//! - **orchestrator**: session state machine with a hard recompute timeout
//! - **drilldown**: clicked bar to paginated case records
//!
//! ## Data Flow
//!
//! ```text
//! open / "update analysis"
//!         │
//!         ▼
//! AnalysisOrchestrator ──request──▶ AnalysisBackend
//!         │                              │
//!         │◀──────── raw results ────────┘
//!         ▼
//! normalize() ──▶ ParsedResults ──▶ BucketIntervalStore (reseed)
//!                      │
//!                      ▼
//!               DrillDownResolver ──▶ case page fetch ──▶ CaseTable
//! ```

pub mod combo;
pub mod drilldown;
pub mod formatting;
pub mod intervals;
pub mod normalizer;
pub mod orchestrator;

pub use combo::{normalize_combo, ComboCell, ComboMatrix};
pub use drilldown::{
    page_range, resolve_cases, sort_case_ids, ActiveDrillDown, CaseFetch, CaseTable,
    DrillDownError, DrillDownResolver, FetchKey, Notice, NoticeLevel,
};
pub use formatting::{format_bucket_name, parse_bound, parse_interval, FormatError};
pub use intervals::{BucketInterval, BucketIntervalStore, IntervalError};
pub use normalizer::{normalize, validate_alignment, NormalizationError};
pub use orchestrator::{
    AnalysisOrchestrator, AnalysisSession, CloseHandle, DisplayMode, RecomputeTicket,
    RefreshOutcome, SessionError, SessionState, FALLBACK_MESSAGE,
};
