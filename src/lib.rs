//! `mfbsts` library crate.
//!
//! The binary (`mfbsts`) is a thin wrapper around this library so that:
//!
//! - the sampler is testable without spawning processes
//! - the fit can be embedded by other callers with their own cancellation and
//!   progress hooks

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
