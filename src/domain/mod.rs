//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - per-period training records (`FineObservation`)
//! - prior and state component specifications (`RegressionPrior`, `StateComponentSpec`)
//! - debug truth overrides and the sampler capabilities derived from them
//! - the fit request / CLI configuration (`FitRequest`, `FitConfig`)

pub mod types;

pub use types::*;
