//! Shared data structures for fine-grained system analysis
//!
//! - `analysis`: wire types of the evaluation backend (results, requests, responses)
//! - `parsed`: canonical cross-system model built by the normalizer

mod analysis;
mod parsed;

pub use analysis::*;
pub use parsed::*;
