//! Fit orchestration.
//!
//! Responsibilities:
//!
//! - wire both models and register outputs (`specify`)
//! - keep the augmented model's data in step with the primary draw (`transcribe`)
//! - drive the MCMC iterations with cancellation and fail-fast errors (`fitter`)

pub mod fitter;
pub mod progress;
pub mod specify;
pub mod transcribe;

pub use fitter::*;
pub use progress::*;
pub use specify::*;
pub use transcribe::*;
