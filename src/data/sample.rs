//! Synthetic mixed-frequency datasets.
//!
//! A random-walk level plus a regression on Gaussian predictors is simulated at
//! the fine frequency and then aggregated into coarse intervals of equal
//! length. The result is a ready-to-fit [`FitRequest`] plus the values that
//! generated it.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    FitRequest, FineObservation, NormalPrior, SdPrior, StateComponentSpec, TruthOverrides,
    DEFAULT_NITER,
};
use crate::error::FitError;
use crate::models::aggregated::cumulate;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub intervals: usize,
    pub periods_per_interval: usize,
    /// True coefficients; their count sets the predictor dimension.
    pub beta: Vec<f64>,
    pub level_sd: f64,
    pub observation_sd: f64,
    pub initial_level: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            intervals: 24,
            periods_per_interval: 4,
            beta: vec![1.5, -0.5],
            level_sd: 0.3,
            observation_sd: 0.2,
            initial_level: 10.0,
            seed: 42,
        }
    }
}

/// Values used to generate a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationTruth {
    pub level: Vec<f64>,
    pub fine_series: Vec<f64>,
    pub beta: Vec<f64>,
    pub sigma_obs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedData {
    #[serde(flatten)]
    pub request: FitRequest,
    pub simulated: SimulationTruth,
}

impl SimulatedData {
    /// Overrides pinning the full primary state (level, fine series,
    /// cumulator), the coefficients and the observation sd to their true
    /// values. Matches a single local-level component.
    pub fn pinned_truth(&self) -> TruthOverrides {
        let observations: Vec<FineObservation> = self
            .request
            .membership_fraction
            .iter()
            .zip(&self.request.ends_interval)
            .map(|(&fraction, &ends_interval)| FineObservation {
                predictors: Vec::new(),
                coarse_value: None,
                fraction,
                ends_interval,
            })
            .collect();
        let cumulator = cumulate(&observations, &self.simulated.fine_series);
        TruthOverrides {
            state: Some(vec![
                self.simulated.level.clone(),
                self.simulated.fine_series.clone(),
                cumulator,
            ]),
            beta: Some(self.simulated.beta.clone()),
            sigma_obs: Some(self.simulated.sigma_obs),
        }
    }
}

pub fn simulate(config: &SimulationConfig) -> Result<SimulatedData, FitError> {
    if config.intervals == 0 || config.periods_per_interval == 0 {
        return Err(FitError::config(
            "simulation needs at least one interval and one period per interval",
        ));
    }
    let level_noise = Normal::new(0.0, config.level_sd)
        .map_err(|e| FitError::config(format!("level sd: {e}")))?;
    let obs_noise = Normal::new(0.0, config.observation_sd)
        .map_err(|e| FitError::config(format!("observation sd: {e}")))?;
    let predictor_dist = Normal::new(0.0, 1.0)
        .map_err(|e| FitError::config(format!("predictor distribution: {e}")))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let n = config.intervals * config.periods_per_interval;
    let fraction = 1.0 / config.periods_per_interval as f64;

    let mut level = Vec::with_capacity(n);
    let mut predictors = Vec::with_capacity(n);
    let mut fine_series = Vec::with_capacity(n);
    let mut mu = config.initial_level;
    for _ in 0..n {
        mu += level_noise.sample(&mut rng);
        let x: Vec<f64> = config
            .beta
            .iter()
            .map(|_| predictor_dist.sample(&mut rng))
            .collect();
        let regression: f64 = x.iter().zip(&config.beta).map(|(x, b)| x * b).sum();
        level.push(mu);
        fine_series.push(mu + regression + obs_noise.sample(&mut rng));
        predictors.push(x);
    }

    let ends_interval: Vec<bool> = (0..n)
        .map(|t| (t + 1) % config.periods_per_interval == 0)
        .collect();
    let which_coarse_interval: Vec<Option<usize>> = (0..n)
        .map(|t| Some(t / config.periods_per_interval + 1))
        .collect();
    let membership_fraction = vec![fraction; n];

    let observations: Vec<FineObservation> = ends_interval
        .iter()
        .map(|&ends_interval| FineObservation {
            predictors: Vec::new(),
            coarse_value: None,
            fraction,
            ends_interval,
        })
        .collect();
    let cumulator = cumulate(&observations, &fine_series);
    let target_series: Vec<Option<f64>> = (0..n)
        .filter(|t| ends_interval[*t])
        .map(|t| Some(cumulator[t]))
        .collect();

    let state_specification = vec![StateComponentSpec::LocalLevel {
        sigma_prior: SdPrior::new(config.level_sd.max(0.01), 1.0),
        initial_state_prior: NormalPrior {
            mean: config.initial_level,
            sd: 10.0,
        },
    }];

    Ok(SimulatedData {
        request: FitRequest {
            target_series,
            predictors,
            which_coarse_interval,
            membership_fraction,
            ends_interval,
            state_specification,
            regression_prior: None,
            niter: DEFAULT_NITER,
            ping: 0,
            seed: Some(config.seed),
            save_state_history: true,
            skip_first_interval: true,
            truth: None,
        },
        simulated: SimulationTruth {
            level,
            fine_series,
            beta: config.beta.clone(),
            sigma_obs: config.observation_sd,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_match_the_fine_series() {
        let config = SimulationConfig {
            intervals: 5,
            periods_per_interval: 3,
            ..Default::default()
        };
        let data = simulate(&config).unwrap();
        let req = &data.request;
        assert_eq!(req.predictors.len(), 15);
        assert_eq!(req.target_series.len(), 5);
        assert_eq!(req.which_coarse_interval[14], Some(5));
        assert!(req.ends_interval[2] && !req.ends_interval[3]);

        // First interval: plain weighted sum of its three periods.
        let y = &data.simulated.fine_series;
        let first = (y[0] + y[1] + y[2]) / 3.0;
        assert!((req.target_series[0].unwrap() - first).abs() < 1e-12);
        // Second interval also picks up the carried remainder of period 2.
        let second = (2.0 * y[2] + y[3] + y[4] + y[5]) / 3.0;
        assert!((req.target_series[1].unwrap() - second).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_data() {
        let a = simulate(&SimulationConfig::default()).unwrap();
        let b = simulate(&SimulationConfig::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pinned_truth_has_full_primary_layout() {
        let data = simulate(&SimulationConfig::default()).unwrap();
        let truth = data.pinned_truth();
        let state = truth.state_matrix().unwrap().unwrap();
        assert_eq!(state.nrows(), 3);
        assert_eq!(state.ncols(), data.request.predictors.len());
    }

    #[test]
    fn rejects_empty_layout() {
        let config = SimulationConfig {
            intervals: 0,
            ..Default::default()
        };
        assert!(simulate(&config).is_err());
    }
}
