//! Random draws used by the posterior samplers.
//!
//! Every function takes the generator explicitly; there is no process-wide RNG.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Exp1, Gamma, StandardNormal};

use crate::domain::SdPrior;
use crate::error::ModelError;
use crate::math::linalg::robust_cholesky;

/// Vector of iid `N(0, 1)` draws.
pub fn standard_normal_vector(n: usize, rng: &mut StdRng) -> DVector<f64> {
    DVector::from_fn(n, |_, _| StandardNormal.sample(rng))
}

/// Draw from `N(mean, cov)`.
pub fn draw_mvn(
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    rng: &mut StdRng,
    what: &'static str,
) -> Result<DVector<f64>, ModelError> {
    let chol = robust_cholesky(cov, what)?;
    let z = standard_normal_vector(mean.len(), rng);
    Ok(mean + chol.l() * z)
}

/// Draw from `N(mean, scale * precision^-1)` without forming the inverse.
pub fn draw_mvn_precision(
    mean: &DVector<f64>,
    precision: &DMatrix<f64>,
    scale: f64,
    rng: &mut StdRng,
    what: &'static str,
) -> Result<DVector<f64>, ModelError> {
    let chol = robust_cholesky(precision, what)?;
    let z = standard_normal_vector(mean.len(), rng);
    // precision = L L', so L'^-1 z has covariance precision^-1.
    let w = chol
        .l()
        .tr_solve_lower_triangular(&z)
        .ok_or(ModelError::NotPositiveDefinite { what })?;
    Ok(mean + w * scale.sqrt())
}

/// Attempts allowed for a rejection draw from a truncated gamma.
const MAX_TRUNCATION_TRIES: usize = 10_000;

/// Draw a standard deviation whose variance has the conjugate inverse-gamma
/// posterior `IG((prior_df + n) / 2, (prior_ss + ss) / 2)`.
pub fn draw_inverse_gamma_sd(
    prior_df: f64,
    prior_ss: f64,
    n: usize,
    ss: f64,
    rng: &mut StdRng,
    what: &'static str,
) -> Result<f64, ModelError> {
    let (shape, rate) = inverse_gamma_parameters(prior_df, prior_ss, n, ss, what)?;
    let gamma = Gamma::new(shape, 1.0 / rate).map_err(|e| ModelError::InvalidParameter {
        what,
        reason: e.to_string(),
    })?;
    let precision: f64 = gamma.sample(rng);
    precision_to_sd(precision, what)
}

/// Same posterior as [`draw_inverse_gamma_sd`], truncated to `sd <= upper_limit`.
///
/// The precision is drawn from its gamma posterior restricted to
/// `[1 / upper_limit^2, inf)`.
pub fn draw_truncated_inverse_gamma_sd(
    prior_df: f64,
    prior_ss: f64,
    n: usize,
    ss: f64,
    upper_limit: f64,
    rng: &mut StdRng,
    what: &'static str,
) -> Result<f64, ModelError> {
    if !(upper_limit.is_finite() && upper_limit > 0.0) {
        return Err(ModelError::InvalidParameter {
            what,
            reason: format!("upper limit must be finite and > 0 (got {upper_limit})"),
        });
    }
    let (shape, rate) = inverse_gamma_parameters(prior_df, prior_ss, n, ss, what)?;
    let lower = 1.0 / (upper_limit * upper_limit);
    let precision = draw_gamma_above(shape, rate, lower, rng, what)?;
    precision_to_sd(precision, what)
}

/// Posterior draw of a standard deviation under an [`SdPrior`], honouring its
/// upper limit as a truncation bound.
pub fn draw_sd_posterior(
    prior: &SdPrior,
    n: usize,
    ss: f64,
    rng: &mut StdRng,
    what: &'static str,
) -> Result<f64, ModelError> {
    let (df, prior_ss) = (prior.sample_size, prior.sum_of_squares());
    match prior.upper_limit {
        Some(limit) => draw_truncated_inverse_gamma_sd(df, prior_ss, n, ss, limit, rng, what),
        None => draw_inverse_gamma_sd(df, prior_ss, n, ss, rng, what),
    }
}

fn inverse_gamma_parameters(
    prior_df: f64,
    prior_ss: f64,
    n: usize,
    ss: f64,
    what: &'static str,
) -> Result<(f64, f64), ModelError> {
    let shape = 0.5 * (prior_df + n as f64);
    let rate = 0.5 * (prior_ss + ss);
    if !(shape.is_finite() && rate.is_finite() && shape > 0.0 && rate > 0.0) {
        return Err(ModelError::InvalidParameter {
            what,
            reason: format!("inverse gamma shape={shape}, rate={rate}"),
        });
    }
    Ok((shape, rate))
}

fn precision_to_sd(precision: f64, what: &'static str) -> Result<f64, ModelError> {
    let sd = (1.0 / precision).sqrt();
    if sd.is_finite() {
        Ok(sd)
    } else {
        Err(ModelError::NonFinite { what })
    }
}

/// `Gamma(shape, rate)` conditioned on `x >= lower`, by rejection.
///
/// Below the mode plain draws are kept when they land above `lower` (at least
/// half the mass lies above the mode). Otherwise the proposal is
/// `lower + Exp(lambda)`, with `lambda` chosen so the envelope touches the
/// density at `lower`.
fn draw_gamma_above(
    shape: f64,
    rate: f64,
    lower: f64,
    rng: &mut StdRng,
    what: &'static str,
) -> Result<f64, ModelError> {
    let mode = if shape > 1.0 { (shape - 1.0) / rate } else { 0.0 };
    if shape > 1.0 && lower <= mode {
        let gamma = Gamma::new(shape, 1.0 / rate).map_err(|e| ModelError::InvalidParameter {
            what,
            reason: e.to_string(),
        })?;
        for _ in 0..MAX_TRUNCATION_TRIES {
            let x: f64 = gamma.sample(rng);
            if x >= lower {
                return Ok(x);
            }
        }
    } else {
        let lambda = if shape > 1.0 {
            rate - (shape - 1.0) / lower
        } else {
            rate
        };
        for _ in 0..MAX_TRUNCATION_TRIES {
            let e: f64 = Exp1.sample(rng);
            let x = lower + e / lambda;
            let log_accept = (shape - 1.0) * (x / lower).ln() - (rate - lambda) * (x - lower);
            let u: f64 = rng.r#gen();
            if u.ln() <= log_accept {
                return Ok(x);
            }
        }
    }
    Err(ModelError::InvalidParameter {
        what,
        reason: format!(
            "no truncated gamma draw after {MAX_TRUNCATION_TRIES} tries \
             (shape={shape}, rate={rate}, lower={lower})"
        ),
    })
}

/// `true` with probability `p`.
pub fn bernoulli(p: f64, rng: &mut StdRng) -> bool {
    let u: f64 = rng.r#gen();
    u < p
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn inverse_gamma_sd_concentrates_with_data() {
        let mut rng = StdRng::seed_from_u64(7);
        // 10_000 observations with sum of squares 4 * n: sd should be near 2.
        let n = 10_000;
        let draws: Vec<f64> = (0..200)
            .map(|_| draw_inverse_gamma_sd(1.0, 1.0, n, 4.0 * n as f64, &mut rng, "sd").unwrap())
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 2.0).abs() < 0.05, "mean sd {mean}");
    }

    #[test]
    fn inverse_gamma_rejects_degenerate_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(draw_inverse_gamma_sd(0.0, 0.0, 0, 0.0, &mut rng, "sd").is_err());
        assert!(draw_truncated_inverse_gamma_sd(1.0, 1.0, 5, 5.0, 0.0, &mut rng, "sd").is_err());
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    #[test]
    fn truncation_inside_the_bulk_matches_conditioned_draws() {
        // Posterior sd is centred near 1; truncating at 1 cuts it roughly in half.
        let (df, ss_prior, n, ss) = (1.0, 1.0, 40, 40.0);
        let mut rng = StdRng::seed_from_u64(21);
        let conditioned: Vec<f64> = (0..40_000)
            .map(|_| draw_inverse_gamma_sd(df, ss_prior, n, ss, &mut rng, "sd").unwrap())
            .filter(|sd| *sd <= 1.0)
            .collect();
        let truncated: Vec<f64> = (0..20_000)
            .map(|_| {
                draw_truncated_inverse_gamma_sd(df, ss_prior, n, ss, 1.0, &mut rng, "sd").unwrap()
            })
            .collect();
        assert!(truncated.iter().all(|sd| *sd <= 1.0));
        let (a, b) = (mean(&conditioned), mean(&truncated));
        assert!((a - b).abs() < 0.005, "conditioned {a} vs truncated {b}");
    }

    #[test]
    fn truncation_in_the_far_tail_spreads_below_the_limit() {
        // Posterior sd is near 3 but limited to 0.5.
        let mut rng = StdRng::seed_from_u64(5);
        let draws: Vec<f64> = (0..2000)
            .map(|_| {
                draw_truncated_inverse_gamma_sd(1.0, 1.0, 50, 450.0, 0.5, &mut rng, "sd").unwrap()
            })
            .collect();
        assert!(draws.iter().all(|sd| *sd < 0.5 && *sd > 0.0));
        let at_limit = draws.iter().filter(|sd| **sd == 0.5).count();
        assert_eq!(at_limit, 0);
        let smallest = draws.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!(smallest < 0.499, "smallest draw {smallest}");
    }

    #[test]
    fn truncation_with_small_shape_stays_below_the_limit() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..500 {
            let sd = draw_truncated_inverse_gamma_sd(0.5, 0.01, 0, 0.0, 0.2, &mut rng, "sd").unwrap();
            assert!(sd <= 0.2);
        }
    }

    #[test]
    fn mvn_precision_draw_matches_covariance_scale() {
        let mut rng = StdRng::seed_from_u64(11);
        let mean = DVector::from_row_slice(&[1.0, -1.0]);
        let precision = DMatrix::from_diagonal(&DVector::from_row_slice(&[4.0, 0.25]));
        let n = 4000;
        let mut sum_sq = [0.0; 2];
        for _ in 0..n {
            let x = draw_mvn_precision(&mean, &precision, 1.0, &mut rng, "beta").unwrap();
            for k in 0..2 {
                sum_sq[k] += (x[k] - mean[k]).powi(2);
            }
        }
        let var0 = sum_sq[0] / n as f64;
        let var1 = sum_sq[1] / n as f64;
        assert!((var0 - 0.25).abs() < 0.03, "var0 {var0}");
        assert!((var1 - 4.0).abs() < 0.4, "var1 {var1}");
    }
}
