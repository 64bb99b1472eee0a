//! Client Configuration Module
//!
//! Backend connection and analysis-session settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `BUCKETLENS_CONFIG` environment variable (path to TOML file)
//! 2. `bucketlens.toml` in the current working directory
//! 3. Built-in defaults (see `defaults`)
//!
//! ## Usage
//!
//! ```ignore
//! let config = ClientConfig::load();
//! let backend = HttpBackend::from_config(&config.backend)?;
//! let orchestrator = AnalysisOrchestrator::from_config(backend, &config.analysis);
//! ```

mod client_config;
pub mod defaults;
pub mod validation;

pub use client_config::*;
