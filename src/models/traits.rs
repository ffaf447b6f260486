//! Model capabilities used by the fit loop.
//!
//! The loop, the transcriber and the recorder only talk to models through these
//! traits, so test doubles can stand in for the real samplers.

use std::fmt;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::models::state::LatentState;
use crate::models::structure::StateStructure;

/// Which of the two models an output or a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Primary,
    Augmented,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Primary => write!(f, "primary"),
            ModelRole::Augmented => write!(f, "augmented"),
        }
    }
}

pub trait PosteriorModel {
    /// Number of fine periods.
    fn time_dimension(&self) -> usize;

    fn state(&self) -> &LatentState;

    fn state_structure(&self) -> &StateStructure;

    /// One full posterior sampling step, drawing from `rng` only.
    fn sample_posterior(&mut self, rng: &mut StdRng) -> Result<(), ModelError>;

    fn number_of_components(&self) -> usize {
        self.state_structure().len()
    }

    /// Per-component additive contributions (`components x time`).
    fn state_contributions(&self) -> DMatrix<f64> {
        self.state_structure()
            .contributions(self.state().structural_block())
    }
}

/// Primary model: structural state plus regression under aggregation
/// constraints.
pub trait AggregatedModel: PosteriorModel {
    fn coefficients(&self) -> &[f64];

    fn residual_sd(&self) -> f64;
}

/// Secondary model driven only by the transcribed fine series.
pub trait AugmentedModel: PosteriorModel {
    fn observations(&self) -> &[f64];

    fn observations_mut(&mut self) -> &mut [f64];
}
