//! Simulation smoother for linear Gaussian state-space models.
//!
//! Model: `y[t] = z' alpha[t] + eps`, `eps ~ N(0, h)` and
//! `alpha[t+1] = T alpha[t] + eta`, `eta ~ N(0, Q)`, with
//! `alpha[0] ~ N(a0, P0)`.
//!
//! [`simulate_state_path`] runs a Kalman filter forward and samples the path
//! backward (FFBS). Missing observations (NaN) contribute no update.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;

use crate::error::ModelError;
use crate::math::{draw_mvn, robust_cholesky};

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMatrices {
    pub transition: DMatrix<f64>,
    pub observation: DVector<f64>,
    pub disturbance: DMatrix<f64>,
    pub initial_mean: DVector<f64>,
    pub initial_variance: DMatrix<f64>,
}

impl SystemMatrices {
    pub fn dimension(&self) -> usize {
        self.observation.len()
    }
}

struct FilterStep {
    predicted_mean: DVector<f64>,
    predicted_variance: DMatrix<f64>,
    filtered_mean: DVector<f64>,
    filtered_variance: DMatrix<f64>,
}

/// Draw a state path (`dim x n`) from its posterior given `y`.
pub fn simulate_state_path(
    system: &SystemMatrices,
    y: &[f64],
    observation_variance: f64,
    rng: &mut StdRng,
) -> Result<DMatrix<f64>, ModelError> {
    let m = system.dimension();
    let n = y.len();
    if m == 0 || n == 0 {
        return Ok(DMatrix::zeros(m, n));
    }
    if !(observation_variance.is_finite() && observation_variance > 0.0) {
        return Err(ModelError::InvalidParameter {
            what: "observation variance",
            reason: format!("{observation_variance}"),
        });
    }

    let z = &system.observation;
    let t_mat = &system.transition;

    let mut steps: Vec<FilterStep> = Vec::with_capacity(n);
    let mut a = system.initial_mean.clone();
    let mut p = system.initial_variance.clone();
    for &obs in y {
        let (a_filt, p_filt) = if obs.is_nan() {
            (a.clone(), p.clone())
        } else {
            let pz = &p * z;
            let f = z.dot(&pz) + observation_variance;
            if !(f.is_finite() && f > 0.0) {
                return Err(ModelError::NonFinite {
                    what: "prediction error variance",
                });
            }
            let gain = &pz / f;
            let innovation = obs - z.dot(&a);
            let a_filt = &a + &gain * innovation;
            let p_filt = &p - &gain * pz.transpose();
            (a_filt, p_filt)
        };
        let a_next = t_mat * &a_filt;
        let p_next = t_mat * &p_filt * t_mat.transpose() + &system.disturbance;
        steps.push(FilterStep {
            predicted_mean: a,
            predicted_variance: p,
            filtered_mean: a_filt,
            filtered_variance: p_filt,
        });
        a = a_next;
        p = p_next;
    }

    let mut path = DMatrix::zeros(m, n);
    let last = &steps[n - 1];
    let mut next = draw_mvn(
        &last.filtered_mean,
        &last.filtered_variance,
        rng,
        "filtered state variance",
    )?;
    path.set_column(n - 1, &next);

    for t in (0..n - 1).rev() {
        let cur = &steps[t];
        let ahead = &steps[t + 1];
        // J = P_filt T' P_pred^-1, computed as (P_pred^-1 T P_filt)'.
        let chol = robust_cholesky(&ahead.predicted_variance, "predicted state variance")?;
        let gain = chol.solve(&(t_mat * &cur.filtered_variance)).transpose();
        let mean = &cur.filtered_mean + &gain * (&next - &ahead.predicted_mean);
        let cov = &cur.filtered_variance - &gain * t_mat * &cur.filtered_variance;
        next = draw_mvn(&mean, &cov, rng, "smoothed state variance")?;
        path.set_column(t, &next);
    }

    if path.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite { what: "state path" });
    }
    Ok(path)
}
