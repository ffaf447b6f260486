//! Ordered list of state components and the system matrices they imply.

use nalgebra::{DMatrix, DMatrixView, DVector};
use rand::rngs::StdRng;

use crate::error::ModelError;
use crate::math::block_diagonal;
use crate::models::component::StateComponent;
use crate::models::kalman::{simulate_state_path, SystemMatrices};

/// Models that accept state components.
pub trait StructuralModel {
    fn add_state(&mut self, component: StateComponent);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateStructure {
    components: Vec<StateComponent>,
}

impl StateStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, component: StateComponent) {
        self.components.push(component);
    }

    pub fn components(&self) -> &[StateComponent] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Total number of structural state rows.
    pub fn dimension(&self) -> usize {
        self.components.iter().map(StateComponent::state_dimension).sum()
    }

    /// First state row of each component.
    pub fn offsets(&self) -> Vec<usize> {
        let mut offset = 0;
        self.components
            .iter()
            .map(|c| {
                let start = offset;
                offset += c.state_dimension();
                start
            })
            .collect()
    }

    pub fn system(&self) -> SystemMatrices {
        let transitions: Vec<_> = self.components.iter().map(|c| c.transition()).collect();
        let disturbances: Vec<_> = self
            .components
            .iter()
            .map(|c| c.disturbance_variance())
            .collect();
        let initial: Vec<_> = self
            .components
            .iter()
            .map(|c| c.initial_variance())
            .collect();
        let observations: Vec<_> = self
            .components
            .iter()
            .map(|c| c.observation_vector())
            .collect();
        let means: Vec<_> = self.components.iter().map(|c| c.initial_mean()).collect();
        SystemMatrices {
            transition: block_diagonal(&transitions),
            observation: stack(&observations),
            disturbance: block_diagonal(&disturbances),
            initial_mean: stack(&means),
            initial_variance: block_diagonal(&initial),
        }
    }

    /// Draw the structural state path given a series and its noise variance.
    pub fn draw_path(
        &self,
        y: &[f64],
        observation_variance: f64,
        rng: &mut StdRng,
    ) -> Result<DMatrix<f64>, ModelError> {
        simulate_state_path(&self.system(), y, observation_variance, rng)
    }

    /// Draw every component's parameters given the structural block.
    pub fn draw_parameters(
        &mut self,
        block: DMatrixView<'_, f64>,
        rng: &mut StdRng,
    ) -> Result<(), ModelError> {
        let offsets = self.offsets();
        for (component, start) in self.components.iter_mut().zip(offsets) {
            let rows = block.rows(start, component.state_dimension());
            component.draw_parameters(rows, rng)?;
        }
        Ok(())
    }

    /// Contribution of component `index` over time.
    pub fn contribution(&self, index: usize, block: DMatrixView<'_, f64>) -> Option<Vec<f64>> {
        let component = self.components.get(index)?;
        let start = self.offsets()[index];
        Some(component.contribution(block.rows(start, component.state_dimension())))
    }

    /// All contributions, one row per component.
    pub fn contributions(&self, block: DMatrixView<'_, f64>) -> DMatrix<f64> {
        let n = block.ncols();
        let mut out = DMatrix::zeros(self.len(), n);
        for index in 0..self.len() {
            if let Some(series) = self.contribution(index, block) {
                for (t, v) in series.into_iter().enumerate() {
                    out[(index, t)] = v;
                }
            }
        }
        out
    }

    /// Sum of all component contributions.
    pub fn signal(&self, block: DMatrixView<'_, f64>) -> Vec<f64> {
        let contributions = self.contributions(block);
        (0..block.ncols())
            .map(|t| contributions.column(t).sum())
            .collect()
    }
}

fn stack(parts: &[DVector<f64>]) -> DVector<f64> {
    DVector::from_vec(parts.iter().flat_map(|p| p.iter().copied()).collect())
}
