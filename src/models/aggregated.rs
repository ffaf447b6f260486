//! Primary model: structural time series plus regression at the fine
//! frequency, observed only through coarse aggregates.
//!
//! Aggregation walks the fine periods in order. A period adds
//! `fraction * y[t]` to the open coarse interval; a period that ends an
//! interval closes it and carries `(1 - fraction) * y[t]` into the next one.
//! The cumulator row of the state holds the running total, so at an interval
//! end it equals that interval's aggregate.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::domain::FineObservation;
use crate::error::ModelError;
use crate::math::robust_cholesky;
use crate::models::component::StateComponent;
use crate::models::regression::{RegressionModel, SpikeSlabSampler};
use crate::models::state::LatentState;
use crate::models::structure::{StateStructure, StructuralModel};
use crate::models::traits::{AggregatedModel, PosteriorModel};

/// Linear constraints `W y = Y` implied by the observed coarse aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConstraints {
    /// One row per observed interval, one column per fine period.
    pub weights: DMatrix<f64>,
    pub values: DVector<f64>,
}

impl AggregationConstraints {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Build the constraint rows for every observed coarse value.
pub fn aggregation_constraints(data: &[FineObservation]) -> AggregationConstraints {
    let n = data.len();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut values = Vec::new();
    let mut open = vec![0.0; n];
    for (t, obs) in data.iter().enumerate() {
        open[t] += obs.fraction;
        if obs.ends_interval {
            if let Some(value) = obs.coarse_value {
                rows.push(open.clone());
                values.push(value);
            }
            open = vec![0.0; n];
            open[t] = 1.0 - obs.fraction;
        }
    }
    AggregationConstraints {
        weights: DMatrix::from_fn(rows.len(), n, |i, j| rows[i][j]),
        values: DVector::from_vec(values),
    }
}

/// Running total of the open coarse interval at each fine period.
pub fn cumulate(data: &[FineObservation], y: &[f64]) -> Vec<f64> {
    let mut open = 0.0;
    data.iter()
        .zip(y)
        .map(|(obs, &v)| {
            open += obs.fraction * v;
            let total = open;
            if obs.ends_interval {
                open = (1.0 - obs.fraction) * v;
            }
            total
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AggregatedStateSpaceRegression {
    xdim: usize,
    data: Vec<FineObservation>,
    design: DMatrix<f64>,
    constraints: AggregationConstraints,
    structure: StateStructure,
    state: LatentState,
    regression: RegressionModel,
    sampler: Option<SpikeSlabSampler>,
    state_fixed: bool,
}

impl AggregatedStateSpaceRegression {
    pub fn new(xdim: usize) -> Self {
        Self {
            xdim,
            data: Vec::new(),
            design: DMatrix::zeros(0, xdim),
            constraints: aggregation_constraints(&[]),
            structure: StateStructure::new(),
            state: LatentState::aggregated(0, 0),
            regression: RegressionModel::new(xdim, 1.0),
            sampler: None,
            state_fixed: false,
        }
    }

    pub fn xdim(&self) -> usize {
        self.xdim
    }

    pub fn data(&self) -> &[FineObservation] {
        &self.data
    }

    pub fn constraints(&self) -> &AggregationConstraints {
        &self.constraints
    }

    pub fn regression(&self) -> &RegressionModel {
        &self.regression
    }

    pub fn is_state_fixed(&self) -> bool {
        self.state_fixed
    }

    /// Replace the training data. Resets the state to zeros.
    pub fn set_data(&mut self, data: Vec<FineObservation>) -> Result<(), ModelError> {
        if let Some(bad) = data.iter().find(|obs| obs.xdim() != self.xdim) {
            return Err(ModelError::DimensionMismatch {
                what: "predictor vector",
                expected: self.xdim,
                actual: bad.xdim(),
            });
        }
        self.design = DMatrix::from_fn(data.len(), self.xdim, |i, j| data[i].predictors[j]);
        self.constraints = aggregation_constraints(&data);
        self.data = data;
        self.reset_state();
        Ok(())
    }

    pub fn set_regression_sampler(&mut self, sampler: SpikeSlabSampler) {
        if sampler.capabilities().draw_inclusion {
            self.regression.included = sampler.initial_inclusion();
        }
        self.sampler = Some(sampler);
    }

    pub fn set_coefficients(&mut self, beta: &[f64]) -> Result<(), ModelError> {
        self.regression.set_coefficients(beta)
    }

    pub fn set_residual_sd(&mut self, sigma: f64) -> Result<(), ModelError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(ModelError::InvalidParameter {
                what: "residual sd",
                reason: format!("must be finite and > 0 (got {sigma})"),
            });
        }
        self.regression.sigma = sigma;
        Ok(())
    }

    /// Install a full state matrix (structural rows, imputed series,
    /// cumulator) that the sampler will never redraw.
    pub fn permanently_set_state(&mut self, matrix: DMatrix<f64>) -> Result<(), ModelError> {
        if matrix.ncols() != self.data.len() {
            return Err(ModelError::DimensionMismatch {
                what: "state columns",
                expected: self.data.len(),
                actual: matrix.ncols(),
            });
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite { what: "fixed state" });
        }
        self.state = LatentState::aggregated_from_matrix(matrix, self.structure.dimension())?;
        self.state_fixed = true;
        Ok(())
    }

    fn reset_state(&mut self) {
        self.state = LatentState::aggregated(self.structure.dimension(), self.data.len());
        self.state_fixed = false;
    }

    /// Draw the fine series given state, coefficients and the aggregates.
    fn impute(&self, signal: &[f64], rng: &mut StdRng) -> Result<DVector<f64>, ModelError> {
        let sigma = self.regression.sigma;
        let mean = self.regression.predict(&self.design);
        let mut z = DVector::from_fn(self.data.len(), |t, _| {
            let e: f64 = StandardNormal.sample(rng);
            mean[t] + signal[t] + sigma * e
        });
        if !self.constraints.is_empty() {
            let w = &self.constraints.weights;
            let gap = &self.constraints.values - w * &z;
            let gram = w * w.transpose();
            let chol = robust_cholesky(&gram, "aggregation constraints")?;
            z += w.transpose() * chol.solve(&gap);
        }
        if z.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite {
                what: "imputed series",
            });
        }
        Ok(z)
    }
}

impl StructuralModel for AggregatedStateSpaceRegression {
    /// Adding a component resizes the state and discards its contents.
    fn add_state(&mut self, component: StateComponent) {
        self.structure.push(component);
        self.reset_state();
    }
}

impl PosteriorModel for AggregatedStateSpaceRegression {
    fn time_dimension(&self) -> usize {
        self.data.len()
    }

    fn state(&self) -> &LatentState {
        &self.state
    }

    fn state_structure(&self) -> &StateStructure {
        &self.structure
    }

    fn sample_posterior(&mut self, rng: &mut StdRng) -> Result<(), ModelError> {
        if self.data.is_empty() {
            return Ok(());
        }

        if !self.state_fixed {
            let signal = self.structure.signal(self.state.structural_block());
            let imputed = self.impute(&signal, rng)?;
            self.state.set_imputed_series(imputed.as_slice())?;

            let regression_part = self.regression.predict(&self.design);
            let target: Vec<f64> = (&imputed - regression_part).iter().copied().collect();
            let sigsq = self.regression.sigma * self.regression.sigma;
            let path = self.structure.draw_path(&target, sigsq, rng)?;
            self.state.set_structural_block(&path)?;
            self.structure
                .draw_parameters(self.state.structural_block(), rng)?;
        }

        let imputed = self
            .state
            .imputed_series()
            .ok_or_else(|| ModelError::InvalidParameter {
                what: "state layout",
                reason: "missing imputed series row".to_string(),
            })?;
        if let Some(sampler) = &self.sampler {
            let signal = self.structure.signal(self.state.structural_block());
            let y = DVector::from_fn(imputed.len(), |t, _| imputed[t] - signal[t]);
            sampler.draw(&mut self.regression, &self.design, &y, rng)?;
        }

        if !self.state_fixed {
            let cumulator = cumulate(&self.data, &imputed);
            self.state.set_cumulator(&cumulator)?;
        }
        Ok(())
    }
}

impl AggregatedModel for AggregatedStateSpaceRegression {
    fn coefficients(&self) -> &[f64] {
        &self.regression.beta
    }

    fn residual_sd(&self) -> f64 {
        self.regression.sigma
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        NormalPrior, RegressionPrior, SamplerCapabilities, SdPrior, StateComponentSpec,
    };
    use rand::SeedableRng;

    fn obs(x: f64, coarse: Option<f64>, ends: bool) -> FineObservation {
        FineObservation {
            predictors: vec![x],
            coarse_value: coarse,
            fraction: 0.5,
            ends_interval: ends,
        }
    }

    fn data() -> Vec<FineObservation> {
        vec![
            obs(1.0, None, false),
            obs(0.0, Some(10.0), true),
            obs(2.0, None, false),
            obs(1.0, Some(12.0), true),
            obs(0.5, None, false),
        ]
    }

    fn level() -> StateComponent {
        StateComponent::new(&StateComponentSpec::LocalLevel {
            sigma_prior: SdPrior::new(0.5, 1.0),
            initial_state_prior: NormalPrior::default(),
        })
        .unwrap()
    }

    #[test]
    fn cumulator_carries_remainder_past_interval_end() {
        let data = data();
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        // 1, 1+2=3 (close, carry 2), 2+3=5, 5+4=9 (close, carry 4), 4+5=9
        assert_eq!(cumulate(&data, &y), vec![1.0, 3.0, 5.0, 9.0, 9.0]);
    }

    #[test]
    fn constraint_rows_match_cumulator_at_observed_ends() {
        let data = data();
        let c = aggregation_constraints(&data);
        assert_eq!(c.len(), 2);
        let y = DVector::from_row_slice(&[2.0, 4.0, 6.0, 8.0, 10.0]);
        let wy = &c.weights * &y;
        let cum = cumulate(&data, y.as_slice());
        assert_eq!(wy[0], cum[1]);
        assert_eq!(wy[1], cum[3]);
    }

    #[test]
    fn imputed_series_honours_observed_aggregates() {
        let mut model = AggregatedStateSpaceRegression::new(1);
        model.set_data(data()).unwrap();
        level().attach(&mut model);
        let prior = RegressionPrior::weak(1, 1.0);
        model.set_regression_sampler(SpikeSlabSampler::new(&prior, SamplerCapabilities::default()));

        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..20 {
            model.sample_posterior(&mut rng).unwrap();
            let cum = model.state().cumulator().unwrap();
            assert!((cum[1] - 10.0).abs() < 1e-8, "{cum:?}");
            assert!((cum[3] - 12.0).abs() < 1e-8, "{cum:?}");
        }
        assert_eq!(model.state().nrows(), 3);
    }

    #[test]
    fn fixed_state_is_never_redrawn() {
        let mut model = AggregatedStateSpaceRegression::new(1);
        model.set_data(data()).unwrap();
        level().attach(&mut model);

        assert!(model.permanently_set_state(DMatrix::zeros(2, 5)).is_err());
        let fixed = DMatrix::from_fn(3, 5, |i, j| (i * 5 + j) as f64);
        model.permanently_set_state(fixed.clone()).unwrap();

        let prior = RegressionPrior::weak(1, 1.0);
        model.set_regression_sampler(SpikeSlabSampler::new(&prior, SamplerCapabilities::default()));
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..3 {
            model.sample_posterior(&mut rng).unwrap();
        }
        assert_eq!(model.state().matrix(), &fixed);
    }

    #[test]
    fn rejects_predictors_of_the_wrong_dimension() {
        let mut model = AggregatedStateSpaceRegression::new(2);
        assert!(matches!(
            model.set_data(data()),
            Err(ModelError::DimensionMismatch { .. })
        ));
    }
}
