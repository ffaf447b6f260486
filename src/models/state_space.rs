//! Plain fine-frequency state-space model used for extrapolation.
//!
//! Its observations are overwritten with the primary model's imputed series
//! before every draw.

use rand::rngs::StdRng;

use crate::domain::SdPrior;
use crate::error::ModelError;
use crate::math::draw_sd_posterior;
use crate::models::component::StateComponent;
use crate::models::state::LatentState;
use crate::models::structure::{StateStructure, StructuralModel};
use crate::models::traits::{AugmentedModel, PosteriorModel};

#[derive(Debug, Clone)]
pub struct StateSpaceModel {
    observations: Vec<f64>,
    structure: StateStructure,
    state: LatentState,
    sigma: f64,
    observation_prior: Option<SdPrior>,
}

impl StateSpaceModel {
    pub fn new(observations: Vec<f64>) -> Self {
        let n = observations.len();
        Self {
            observations,
            structure: StateStructure::new(),
            state: LatentState::structural(0, n),
            sigma: 1.0,
            observation_prior: None,
        }
    }

    /// Prior on the observation sd; the current value starts at its guess.
    pub fn set_observation_prior(&mut self, prior: SdPrior) {
        self.sigma = prior.sigma_guess;
        self.observation_prior = Some(prior);
    }

    pub fn residual_sd(&self) -> f64 {
        self.sigma
    }

    fn draw_residual_sd(&mut self, rng: &mut StdRng) -> Result<(), ModelError> {
        let Some(prior) = &self.observation_prior else {
            return Ok(());
        };
        let signal = self.structure.signal(self.state.structural_block());
        let (count, ss) = self
            .observations
            .iter()
            .zip(&signal)
            .filter(|(y, _)| y.is_finite())
            .fold((0usize, 0.0), |(count, ss), (y, mu)| {
                (count + 1, ss + (y - mu) * (y - mu))
            });
        self.sigma = draw_sd_posterior(prior, count, ss, rng, "observation sd")?;
        Ok(())
    }
}

impl StructuralModel for StateSpaceModel {
    fn add_state(&mut self, component: StateComponent) {
        self.structure.push(component);
        self.state = LatentState::structural(self.structure.dimension(), self.observations.len());
    }
}

impl PosteriorModel for StateSpaceModel {
    fn time_dimension(&self) -> usize {
        self.observations.len()
    }

    fn state(&self) -> &LatentState {
        &self.state
    }

    fn state_structure(&self) -> &StateStructure {
        &self.structure
    }

    fn sample_posterior(&mut self, rng: &mut StdRng) -> Result<(), ModelError> {
        if self.observations.is_empty() {
            return Ok(());
        }
        let path = self
            .structure
            .draw_path(&self.observations, self.sigma * self.sigma, rng)?;
        self.state.set_structural_block(&path)?;
        self.structure
            .draw_parameters(self.state.structural_block(), rng)?;
        self.draw_residual_sd(rng)
    }
}

impl AugmentedModel for StateSpaceModel {
    fn observations(&self) -> &[f64] {
        &self.observations
    }

    fn observations_mut(&mut self) -> &mut [f64] {
        &mut self.observations
    }
}
