//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - read from a JSON fit request
//! - used in-memory while the samplers run
//! - written back out next to the posterior draws

use std::path::PathBuf;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Default number of MCMC iterations when a request does not say.
pub const DEFAULT_NITER: usize = 1000;

/// Default diffuse prior sd on the initial value of each state element.
pub const DEFAULT_INITIAL_STATE_SD: f64 = 1.0e3;

/// One fine period of training data.
///
/// Built by [`crate::data::TrainingDataBuilder`] and owned by the primary model
/// for the duration of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FineObservation {
    /// Predictor vector (fixed dimension across periods).
    pub predictors: Vec<f64>,
    /// Aggregate value of the coarse interval this period closes, if observed.
    pub coarse_value: Option<f64>,
    /// This period's share of its coarse interval, in `(0, 1]`.
    pub fraction: f64,
    /// Whether this period closes a coarse interval.
    pub ends_interval: bool,
}

impl FineObservation {
    pub fn xdim(&self) -> usize {
        self.predictors.len()
    }

    pub fn has_coarse_value(&self) -> bool {
        self.coarse_value.is_some()
    }
}

/// Inverse-gamma prior on a standard deviation, parameterised as a prior guess
/// and a prior sample size (degrees of freedom).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdPrior {
    pub sigma_guess: f64,
    pub sample_size: f64,
    /// Draws are capped at this value when set.
    #[serde(default)]
    pub upper_limit: Option<f64>,
}

impl SdPrior {
    pub fn new(sigma_guess: f64, sample_size: f64) -> Self {
        Self {
            sigma_guess,
            sample_size,
            upper_limit: None,
        }
    }

    /// Prior sum of squares (`sample_size * sigma_guess^2`).
    pub fn sum_of_squares(&self) -> f64 {
        self.sample_size * self.sigma_guess * self.sigma_guess
    }

    pub fn validate(&self, what: &str) -> Result<(), FitError> {
        if !(self.sigma_guess.is_finite() && self.sigma_guess > 0.0) {
            return Err(FitError::config(format!(
                "{what}: sigma_guess must be finite and > 0 (got {})",
                self.sigma_guess
            )));
        }
        if !(self.sample_size.is_finite() && self.sample_size > 0.0) {
            return Err(FitError::config(format!(
                "{what}: sample_size must be finite and > 0 (got {})",
                self.sample_size
            )));
        }
        if let Some(limit) = self.upper_limit {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(FitError::config(format!(
                    "{what}: upper_limit must be > 0 (got {limit})"
                )));
            }
        }
        Ok(())
    }
}

/// Gaussian prior on the initial value of each element of a state component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalPrior {
    pub mean: f64,
    pub sd: f64,
}

impl Default for NormalPrior {
    fn default() -> Self {
        Self {
            mean: 0.0,
            sd: DEFAULT_INITIAL_STATE_SD,
        }
    }
}

/// Specification of one state component.
///
/// Components are added to both models in list order; the order defines the
/// row layout of the state matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateComponentSpec {
    /// Random walk level: `mu[t+1] = mu[t] + eta`.
    LocalLevel {
        sigma_prior: SdPrior,
        #[serde(default)]
        initial_state_prior: NormalPrior,
    },
    /// Level plus slope, each with its own disturbance.
    LocalLinearTrend {
        level_sigma_prior: SdPrior,
        slope_sigma_prior: SdPrior,
        #[serde(default)]
        initial_state_prior: NormalPrior,
    },
    /// Dummy-variable seasonal with `nseasons` seasons per cycle.
    Seasonal {
        nseasons: usize,
        sigma_prior: SdPrior,
        #[serde(default)]
        initial_state_prior: NormalPrior,
    },
}

impl StateComponentSpec {
    /// Short name used to build output names (`sigma_<name>`).
    pub fn name(&self) -> String {
        match self {
            StateComponentSpec::LocalLevel { .. } => "level".to_string(),
            StateComponentSpec::LocalLinearTrend { .. } => "trend".to_string(),
            StateComponentSpec::Seasonal { nseasons, .. } => format!("seasonal_{nseasons}"),
        }
    }

    /// Number of state rows this component occupies.
    pub fn state_dimension(&self) -> usize {
        match self {
            StateComponentSpec::LocalLevel { .. } => 1,
            StateComponentSpec::LocalLinearTrend { .. } => 2,
            StateComponentSpec::Seasonal { nseasons, .. } => nseasons.saturating_sub(1),
        }
    }

    pub fn validate(&self) -> Result<(), FitError> {
        let name = self.name();
        let initial = match self {
            StateComponentSpec::LocalLevel {
                sigma_prior,
                initial_state_prior,
            } => {
                sigma_prior.validate(&name)?;
                initial_state_prior
            }
            StateComponentSpec::LocalLinearTrend {
                level_sigma_prior,
                slope_sigma_prior,
                initial_state_prior,
            } => {
                level_sigma_prior.validate(&format!("{name} level"))?;
                slope_sigma_prior.validate(&format!("{name} slope"))?;
                initial_state_prior
            }
            StateComponentSpec::Seasonal {
                nseasons,
                sigma_prior,
                initial_state_prior,
            } => {
                if *nseasons < 2 {
                    return Err(FitError::config(format!(
                        "seasonal component needs nseasons >= 2 (got {nseasons})"
                    )));
                }
                sigma_prior.validate(&name)?;
                initial_state_prior
            }
        };
        if !(initial.mean.is_finite() && initial.sd.is_finite() && initial.sd > 0.0) {
            return Err(FitError::config(format!(
                "{name}: initial_state_prior needs a finite mean and sd > 0"
            )));
        }
        Ok(())
    }
}

/// Spike-and-slab prior for the regression component.
///
/// Given the residual variance `sigma^2`, included coefficients are
/// `beta ~ N(mu, sigma^2 * siginv^-1)`; each coefficient is included with its
/// prior inclusion probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionPrior {
    pub mu: Vec<f64>,
    /// Prior precision, row-major (`xdim` rows of `xdim` values).
    pub siginv: Vec<Vec<f64>>,
    pub prior_inclusion_probabilities: Vec<f64>,
    pub prior_df: f64,
    pub sigma_guess: f64,
    /// Maximum number of inclusion indicators visited per draw.
    #[serde(default)]
    pub max_flips: Option<usize>,
}

impl RegressionPrior {
    /// A weakly informative default: zero mean, small ridge precision, even
    /// inclusion odds.
    pub fn weak(xdim: usize, sigma_guess: f64) -> Self {
        let siginv = (0..xdim)
            .map(|i| (0..xdim).map(|j| if i == j { 0.01 } else { 0.0 }).collect())
            .collect();
        Self {
            mu: vec![0.0; xdim],
            siginv,
            prior_inclusion_probabilities: vec![0.5; xdim],
            prior_df: 1.0,
            sigma_guess,
            max_flips: None,
        }
    }

    pub fn xdim(&self) -> usize {
        self.mu.len()
    }

    pub fn precision_matrix(&self) -> DMatrix<f64> {
        let p = self.xdim();
        DMatrix::from_fn(p, p, |i, j| self.siginv[i][j])
    }

    /// Sd prior implied for an observation variance (`sigma_guess`, `prior_df`).
    pub fn residual_sd_prior(&self) -> SdPrior {
        SdPrior::new(self.sigma_guess, self.prior_df)
    }

    pub fn validate(&self, xdim: usize) -> Result<(), FitError> {
        if self.mu.len() != xdim {
            return Err(FitError::config(format!(
                "regression prior mu has length {} but predictors have dimension {xdim}",
                self.mu.len()
            )));
        }
        if self.siginv.len() != xdim || self.siginv.iter().any(|row| row.len() != xdim) {
            return Err(FitError::config(format!(
                "regression prior siginv must be {xdim} x {xdim}"
            )));
        }
        if self.prior_inclusion_probabilities.len() != xdim {
            return Err(FitError::config(format!(
                "regression prior has {} inclusion probabilities for {xdim} predictors",
                self.prior_inclusion_probabilities.len()
            )));
        }
        if self
            .prior_inclusion_probabilities
            .iter()
            .any(|p| !(p.is_finite() && (0.0..=1.0).contains(p)))
        {
            return Err(FitError::config(
                "prior inclusion probabilities must lie in [0, 1]",
            ));
        }
        if self
            .mu
            .iter()
            .chain(self.siginv.iter().flatten())
            .any(|v| !v.is_finite())
        {
            return Err(FitError::config("regression prior contains non-finite values"));
        }
        self.residual_sd_prior().validate("regression residual sd")?;
        Ok(())
    }
}

/// Debug-only values that stay fixed for the life of the MCMC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TruthOverrides {
    /// Full primary state matrix (structural rows, imputed series, cumulator),
    /// one inner vector per row.
    #[serde(default)]
    pub state: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub beta: Option<Vec<f64>>,
    #[serde(default)]
    pub sigma_obs: Option<f64>,
}

impl TruthOverrides {
    pub fn capabilities(&self) -> SamplerCapabilities {
        SamplerCapabilities {
            draw_coefficients: self.beta.is_none(),
            draw_inclusion: self.beta.is_none(),
            draw_sigma: self.sigma_obs.is_none(),
        }
    }

    pub fn state_matrix(&self) -> Result<Option<DMatrix<f64>>, FitError> {
        let Some(rows) = &self.state else {
            return Ok(None);
        };
        let nrow = rows.len();
        let ncol = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != ncol) {
            return Err(FitError::config("truth state matrix has ragged rows"));
        }
        Ok(Some(DMatrix::from_fn(nrow, ncol, |i, j| rows[i][j])))
    }
}

/// Which regression draws the spike-and-slab sampler performs.
///
/// Fixed at construction; suppressing a draw keeps the corresponding value
/// pinned at whatever was installed on the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerCapabilities {
    pub draw_coefficients: bool,
    pub draw_inclusion: bool,
    pub draw_sigma: bool,
}

impl Default for SamplerCapabilities {
    fn default() -> Self {
        Self {
            draw_coefficients: true,
            draw_inclusion: true,
            draw_sigma: true,
        }
    }
}

impl SamplerCapabilities {
    pub fn from_truth(truth: Option<&TruthOverrides>) -> Self {
        truth.map(TruthOverrides::capabilities).unwrap_or_default()
    }
}

fn default_true() -> bool {
    true
}

fn default_niter() -> usize {
    DEFAULT_NITER
}

/// Everything a fit needs, as read from a request file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRequest {
    /// Coarse target series; `null` marks a missing aggregate.
    pub target_series: Vec<Option<f64>>,
    /// One row of predictors per fine period.
    pub predictors: Vec<Vec<f64>>,
    /// One-based coarse interval index per fine period (`null` if unmapped).
    pub which_coarse_interval: Vec<Option<usize>>,
    pub membership_fraction: Vec<f64>,
    pub ends_interval: Vec<bool>,
    pub state_specification: Vec<StateComponentSpec>,
    /// Defaults to [`RegressionPrior::weak`] when absent.
    #[serde(default)]
    pub regression_prior: Option<RegressionPrior>,
    #[serde(default = "default_niter")]
    pub niter: usize,
    /// Progress report interval in iterations (0 disables).
    #[serde(default)]
    pub ping: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_true")]
    pub save_state_history: bool,
    /// Never treat the first coarse interval as observed.
    #[serde(default = "default_true")]
    pub skip_first_interval: bool,
    #[serde(default)]
    pub truth: Option<TruthOverrides>,
}

/// A full run's configuration as understood by the CLI pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub summary_csv: Option<PathBuf>,

    /// Overrides the request's `niter` when set.
    pub niter: Option<usize>,
    pub ping: Option<usize>,
    pub seed: Option<u64>,
    pub save_state_history: bool,

    /// Leading draws dropped from the summary.
    pub burn: usize,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
}
