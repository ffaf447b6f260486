//! Regression component with a spike-and-slab prior.
//!
//! Given the residual variance `sigma^2` and an inclusion pattern `gamma`, the
//! included coefficients have prior `N(b, sigma^2 * Omega^-1)`. Each draw:
//!
//! - visits inclusion indicators in random order (at most `max_flips` of
//!   them) and redraws each from its conditional given the others
//! - draws the included coefficients from their Gaussian posterior
//! - draws `sigma` from its inverse-gamma posterior given the residuals
//!
//! Each step can be switched off through [`SamplerCapabilities`].

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::domain::{RegressionPrior, SamplerCapabilities};
use crate::error::ModelError;
use crate::math::{
    bernoulli, draw_inverse_gamma_sd, draw_mvn_precision, log_determinant, robust_cholesky,
    select_square, select_vector,
};

/// Current regression parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionModel {
    pub beta: Vec<f64>,
    pub included: Vec<bool>,
    pub sigma: f64,
}

impl RegressionModel {
    pub fn new(xdim: usize, sigma: f64) -> Self {
        Self {
            beta: vec![0.0; xdim],
            included: vec![false; xdim],
            sigma,
        }
    }

    pub fn xdim(&self) -> usize {
        self.beta.len()
    }

    /// Install coefficients; non-zero entries are marked included.
    pub fn set_coefficients(&mut self, beta: &[f64]) -> Result<(), ModelError> {
        if beta.len() != self.xdim() {
            return Err(ModelError::DimensionMismatch {
                what: "coefficients",
                expected: self.xdim(),
                actual: beta.len(),
            });
        }
        self.beta = beta.to_vec();
        self.included = beta.iter().map(|b| *b != 0.0).collect();
        Ok(())
    }

    /// `X beta` for an `n x p` design.
    pub fn predict(&self, x: &DMatrix<f64>) -> DVector<f64> {
        x * DVector::from_column_slice(&self.beta)
    }
}

/// Posterior sampler for [`RegressionModel`].
#[derive(Debug, Clone)]
pub struct SpikeSlabSampler {
    prior_mean: DVector<f64>,
    prior_precision: DMatrix<f64>,
    inclusion_probabilities: Vec<f64>,
    prior_df: f64,
    prior_ss: f64,
    max_flips: usize,
    capabilities: SamplerCapabilities,
}

impl SpikeSlabSampler {
    /// Build from a prior already validated against the predictor dimension.
    pub fn new(prior: &RegressionPrior, capabilities: SamplerCapabilities) -> Self {
        let xdim = prior.xdim();
        Self {
            prior_mean: DVector::from_column_slice(&prior.mu),
            prior_precision: prior.precision_matrix(),
            inclusion_probabilities: prior.prior_inclusion_probabilities.clone(),
            prior_df: prior.prior_df,
            prior_ss: prior.residual_sd_prior().sum_of_squares(),
            max_flips: prior.max_flips.unwrap_or(xdim).min(xdim),
            capabilities,
        }
    }

    pub fn capabilities(&self) -> SamplerCapabilities {
        self.capabilities
    }

    /// Starting inclusion pattern: forced indicators honoured, the rest
    /// included when their prior odds favour it.
    pub fn initial_inclusion(&self) -> Vec<bool> {
        self.inclusion_probabilities.iter().map(|p| *p >= 0.5).collect()
    }

    /// One draw of `(gamma, beta, sigma)` given `y ~ X beta + noise`.
    pub fn draw(
        &self,
        model: &mut RegressionModel,
        x: &DMatrix<f64>,
        y: &DVector<f64>,
        rng: &mut StdRng,
    ) -> Result<(), ModelError> {
        if x.ncols() != model.xdim() || x.nrows() != y.len() {
            return Err(ModelError::DimensionMismatch {
                what: "regression design",
                expected: model.xdim(),
                actual: x.ncols(),
            });
        }

        if model.xdim() > 0 {
            let xtx = x.transpose() * x;
            let xty = x.transpose() * y;
            let sigsq = model.sigma * model.sigma;
            if self.capabilities.draw_inclusion {
                self.draw_inclusion(model, &xtx, &xty, sigsq, rng)?;
            }
            if self.capabilities.draw_coefficients {
                self.draw_coefficients(model, &xtx, &xty, sigsq, rng)?;
            }
        }

        if self.capabilities.draw_sigma {
            let residual = y - model.predict(x);
            let sse = residual.norm_squared();
            model.sigma = draw_inverse_gamma_sd(
                self.prior_df,
                self.prior_ss,
                y.len(),
                sse,
                rng,
                "residual sd",
            )?;
        }
        Ok(())
    }

    fn draw_inclusion(
        &self,
        model: &mut RegressionModel,
        xtx: &DMatrix<f64>,
        xty: &DVector<f64>,
        sigsq: f64,
        rng: &mut StdRng,
    ) -> Result<(), ModelError> {
        for (inc, p) in model.included.iter_mut().zip(&self.inclusion_probabilities) {
            if *p <= 0.0 {
                *inc = false;
            } else if *p >= 1.0 {
                *inc = true;
            }
        }
        let mut order: Vec<usize> = (0..model.xdim()).collect();
        order.shuffle(rng);
        for &j in order.iter().take(self.max_flips) {
            let p = self.inclusion_probabilities[j];
            if p <= 0.0 || p >= 1.0 {
                continue;
            }
            model.included[j] = true;
            let with = self.log_model_prob(&model.included, xtx, xty, sigsq)?;
            model.included[j] = false;
            let without = self.log_model_prob(&model.included, xtx, xty, sigsq)?;
            let prob_in = 1.0 / (1.0 + (without - with).exp());
            model.included[j] = bernoulli(prob_in, rng);
        }
        for (j, keep) in model.included.iter().enumerate() {
            if !keep {
                model.beta[j] = 0.0;
            }
        }
        Ok(())
    }

    fn draw_coefficients(
        &self,
        model: &mut RegressionModel,
        xtx: &DMatrix<f64>,
        xty: &DVector<f64>,
        sigsq: f64,
        rng: &mut StdRng,
    ) -> Result<(), ModelError> {
        let idx = included_indices(&model.included);
        model.beta.iter_mut().for_each(|b| *b = 0.0);
        if idx.is_empty() {
            return Ok(());
        }
        let posterior = self.posterior(&idx, xtx, xty)?;
        let draw = draw_mvn_precision(
            &posterior.mean,
            &posterior.precision,
            sigsq,
            rng,
            "coefficient posterior precision",
        )?;
        for (k, &j) in idx.iter().enumerate() {
            model.beta[j] = draw[k];
        }
        Ok(())
    }

    /// Log posterior probability of an inclusion pattern, up to a constant,
    /// with the coefficients integrated out.
    fn log_model_prob(
        &self,
        included: &[bool],
        xtx: &DMatrix<f64>,
        xty: &DVector<f64>,
        sigsq: f64,
    ) -> Result<f64, ModelError> {
        let prior: f64 = self
            .inclusion_probabilities
            .iter()
            .zip(included)
            .map(|(p, inc)| if *inc { p.ln() } else { (1.0 - p).ln() })
            .sum();
        let idx = included_indices(included);
        if idx.is_empty() {
            return Ok(prior);
        }
        let omega = select_square(&self.prior_precision, &idx);
        let b = select_vector(&self.prior_mean, &idx);
        let prior_chol = robust_cholesky(&omega, "prior precision")?;
        let posterior = self.posterior(&idx, xtx, xty)?;
        let post_chol = robust_cholesky(&posterior.precision, "posterior precision")?;
        let rhs = &omega * &b + select_vector(xty, &idx);
        let quad = b.dot(&(&omega * &b)) - posterior.mean.dot(&rhs);
        Ok(0.5 * log_determinant(&prior_chol) - 0.5 * log_determinant(&post_chol)
            - quad / (2.0 * sigsq)
            + prior)
    }

    fn posterior(
        &self,
        idx: &[usize],
        xtx: &DMatrix<f64>,
        xty: &DVector<f64>,
    ) -> Result<GaussianPosterior, ModelError> {
        let omega = select_square(&self.prior_precision, idx);
        let b = select_vector(&self.prior_mean, idx);
        let precision = &omega + select_square(xtx, idx);
        let rhs = &omega * &b + select_vector(xty, idx);
        let chol = robust_cholesky(&precision, "posterior precision")?;
        let mean = chol.solve(&rhs);
        Ok(GaussianPosterior { mean, precision })
    }
}

struct GaussianPosterior {
    mean: DVector<f64>,
    precision: DMatrix<f64>,
}

fn included_indices(included: &[bool]) -> Vec<usize> {
    included
        .iter()
        .enumerate()
        .filter_map(|(j, inc)| inc.then_some(j))
        .collect()
}
