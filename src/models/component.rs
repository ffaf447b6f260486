//! State components.
//!
//! A component is one tagged variant of [`StateComponentSpec`] plus its current
//! disturbance standard deviations. Each component contributes:
//!
//! - a square transition block `T`
//! - an observation vector `Z` (its additive effect is `Z' alpha[t]`)
//! - a diagonal disturbance variance block
//! - a Gaussian prior on its initial state

use std::collections::HashMap;

use nalgebra::{DMatrix, DMatrixView, DVector};
use rand::rngs::StdRng;

use crate::domain::{NormalPrior, SdPrior, StateComponentSpec};
use crate::error::{FitError, ModelError};
use crate::math::draw_sd_posterior;
use crate::models::structure::StructuralModel;
use crate::models::ModelRole;
use crate::report::{OutputRecorder, OutputShape, OutputSource};

#[derive(Debug, Clone, PartialEq)]
pub struct StateComponent {
    spec: StateComponentSpec,
    label: String,
    sigmas: Vec<f64>,
}

/// Output labels for a component list, in order.
///
/// A label is the kind name; a kind that repeats gets its one-based
/// occurrence appended from the second occurrence on
/// (`seasonal_3`, `seasonal_3_2`).
pub fn component_labels(specs: &[StateComponentSpec]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    specs
        .iter()
        .map(|spec| {
            let name = spec.name();
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name}_{count}")
            }
        })
        .collect()
}

impl StateComponent {
    /// Instantiate a component with each disturbance sd at its prior guess.
    pub fn new(spec: &StateComponentSpec) -> Result<Self, FitError> {
        spec.validate()?;
        let sigmas = sd_priors(spec).iter().map(|p| p.sigma_guess).collect();
        Ok(Self {
            spec: spec.clone(),
            label: spec.name(),
            sigmas,
        })
    }

    /// Replace the label used in output names (see [`component_labels`]).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn spec(&self) -> &StateComponentSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.label
    }

    pub fn state_dimension(&self) -> usize {
        self.spec.state_dimension()
    }

    /// Add this component to a model's state.
    pub fn attach<M: StructuralModel + ?Sized>(self, model: &mut M) {
        model.add_state(self);
    }

    /// Output names for this component's parameters, in [`Self::parameters`] order.
    pub fn parameter_names(&self) -> Vec<String> {
        let name = self.name();
        match &self.spec {
            StateComponentSpec::LocalLinearTrend { .. } => {
                vec![format!("sigma_{name}_level"), format!("sigma_{name}_slope")]
            }
            _ => vec![format!("sigma_{name}")],
        }
    }

    /// Current disturbance standard deviations.
    pub fn parameters(&self) -> &[f64] {
        &self.sigmas
    }

    /// Register one scalar output per parameter under `prefix`.
    pub fn register_outputs(
        &self,
        model: ModelRole,
        index: usize,
        prefix: &str,
        recorder: &mut OutputRecorder,
    ) -> Result<(), FitError> {
        for (parameter, name) in self.parameter_names().into_iter().enumerate() {
            recorder.register(
                format!("{prefix}{name}"),
                OutputShape::Scalar,
                OutputSource::ComponentParameter {
                    model,
                    component: index,
                    parameter,
                },
            )?;
        }
        Ok(())
    }

    pub fn transition(&self) -> DMatrix<f64> {
        match &self.spec {
            StateComponentSpec::LocalLevel { .. } => DMatrix::identity(1, 1),
            StateComponentSpec::LocalLinearTrend { .. } => {
                DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0])
            }
            StateComponentSpec::Seasonal { .. } => {
                // Seasonal effects sum to zero over a cycle: the new effect is
                // minus the sum of the previous nseasons - 1; the rest shift down.
                let m = self.state_dimension();
                let mut t = DMatrix::zeros(m, m);
                for j in 0..m {
                    t[(0, j)] = -1.0;
                }
                for i in 1..m {
                    t[(i, i - 1)] = 1.0;
                }
                t
            }
        }
    }

    pub fn observation_vector(&self) -> DVector<f64> {
        let mut z = DVector::zeros(self.state_dimension());
        if !z.is_empty() {
            z[0] = 1.0;
        }
        z
    }

    /// Diagonal disturbance variance for this block.
    pub fn disturbance_variance(&self) -> DMatrix<f64> {
        let m = self.state_dimension();
        let mut q = DMatrix::zeros(m, m);
        for (p, &row) in self.disturbed_rows().iter().enumerate() {
            q[(row, row)] = self.sigmas[p] * self.sigmas[p];
        }
        q
    }

    pub fn initial_mean(&self) -> DVector<f64> {
        DVector::from_element(self.state_dimension(), self.initial_prior().mean)
    }

    pub fn initial_variance(&self) -> DMatrix<f64> {
        let sd = self.initial_prior().sd;
        DMatrix::identity(self.state_dimension(), self.state_dimension()) * (sd * sd)
    }

    /// Additive contribution `Z' alpha[t]` over time, given this component's
    /// block of state rows.
    pub fn contribution(&self, block: DMatrixView<'_, f64>) -> Vec<f64> {
        if block.nrows() == 0 {
            return vec![0.0; block.ncols()];
        }
        block.row(0).iter().copied().collect()
    }

    /// Draw each disturbance sd from its conjugate posterior given a state path
    /// for this block (`dim x n`).
    pub fn draw_parameters(
        &mut self,
        block: DMatrixView<'_, f64>,
        rng: &mut StdRng,
    ) -> Result<(), ModelError> {
        let n = block.ncols();
        if n < 2 {
            return Ok(());
        }
        let t = self.transition();
        let mut ss = vec![0.0; self.sigmas.len()];
        for col in 1..n {
            let innovation = block.column(col) - &t * block.column(col - 1);
            for (p, &row) in self.disturbed_rows().iter().enumerate() {
                ss[p] += innovation[row] * innovation[row];
            }
        }
        let priors = sd_priors(&self.spec);
        for (p, prior) in priors.iter().enumerate() {
            self.sigmas[p] = draw_sd_posterior(prior, n - 1, ss[p], rng, "state disturbance sd")?;
        }
        Ok(())
    }

    /// State rows (within the block) driven by each sd parameter.
    fn disturbed_rows(&self) -> Vec<usize> {
        match &self.spec {
            StateComponentSpec::LocalLinearTrend { .. } => vec![0, 1],
            _ => vec![0],
        }
    }

    fn initial_prior(&self) -> &NormalPrior {
        match &self.spec {
            StateComponentSpec::LocalLevel {
                initial_state_prior,
                ..
            }
            | StateComponentSpec::LocalLinearTrend {
                initial_state_prior,
                ..
            }
            | StateComponentSpec::Seasonal {
                initial_state_prior,
                ..
            } => initial_state_prior,
        }
    }
}

fn sd_priors(spec: &StateComponentSpec) -> Vec<&SdPrior> {
    match spec {
        StateComponentSpec::LocalLevel { sigma_prior, .. }
        | StateComponentSpec::Seasonal { sigma_prior, .. } => vec![sigma_prior],
        StateComponentSpec::LocalLinearTrend {
            level_sigma_prior,
            slope_sigma_prior,
            ..
        } => vec![level_sigma_prior, slope_sigma_prior],
    }
}
