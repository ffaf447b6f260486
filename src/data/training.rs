//! Builds the fine-period training records.
//!
//! Inputs are aligned per fine period: one predictor row, one mapped coarse
//! interval (one-based), one membership fraction and one interval-end flag.
//! The coarse target series is indexed by interval.

use tracing::debug;

use crate::domain::FineObservation;
use crate::error::FitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingDataBuilder {
    /// Never attach the first coarse interval's value.
    ///
    /// The earliest aggregate is legitimate data, but historically it has been
    /// treated as unobservable; this keeps that behaviour available.
    pub skip_first_interval: bool,
}

impl Default for TrainingDataBuilder {
    fn default() -> Self {
        Self {
            skip_first_interval: true,
        }
    }
}

impl TrainingDataBuilder {
    pub fn new(skip_first_interval: bool) -> Self {
        Self {
            skip_first_interval,
        }
    }

    /// One record per fine period, in input order.
    pub fn build(
        &self,
        target: &[Option<f64>],
        predictors: &[Vec<f64>],
        which_coarse_interval: &[Option<usize>],
        membership_fraction: &[f64],
        ends_interval: &[bool],
    ) -> Result<Vec<FineObservation>, FitError> {
        let n = predictors.len();
        if n == 0 {
            return Err(FitError::config("no fine periods: predictor matrix is empty"));
        }
        let xdim = predictors[0].len();
        if let Some((i, row)) = predictors.iter().enumerate().find(|(_, r)| r.len() != xdim) {
            return Err(FitError::config(format!(
                "predictor row {i} has {} columns, expected {xdim}",
                row.len()
            )));
        }
        if predictors.iter().flatten().any(|v| !v.is_finite()) {
            return Err(FitError::config("predictors contain non-finite values"));
        }
        // NaN marks a missing aggregate like `None`; infinities are bad input.
        if let Some((k, v)) = target
            .iter()
            .enumerate()
            .find_map(|(k, v)| v.filter(|v| v.is_infinite()).map(|v| (k, v)))
        {
            return Err(FitError::config(format!(
                "target value {v} for coarse interval {} is not finite",
                k + 1
            )));
        }
        check_len("which_coarse_interval", which_coarse_interval.len(), n)?;
        check_len("membership_fraction", membership_fraction.len(), n)?;
        check_len("ends_interval", ends_interval.len(), n)?;
        if let Some((i, f)) = membership_fraction
            .iter()
            .enumerate()
            .find(|(_, f)| !(f.is_finite() && **f > 0.0 && **f <= 1.0))
        {
            return Err(FitError::config(format!(
                "membership fraction {f} at period {i} is outside (0, 1]"
            )));
        }

        let records: Vec<FineObservation> = (0..n)
            .map(|i| FineObservation {
                predictors: predictors[i].clone(),
                coarse_value: self.coarse_value(target, which_coarse_interval[i], ends_interval[i]),
                fraction: membership_fraction[i],
                ends_interval: ends_interval[i],
            })
            .collect();

        debug!(
            periods = n,
            xdim,
            observed = records.iter().filter(|r| r.has_coarse_value()).count(),
            "built training data"
        );
        Ok(records)
    }

    /// Coarse value attached to a period mapped to `mapped` (one-based).
    fn coarse_value(&self, target: &[Option<f64>], mapped: Option<usize>, ends: bool) -> Option<f64> {
        // Zero is not a valid one-based index.
        let k = mapped?.checked_sub(1)?;
        if self.skip_first_interval && k == 0 {
            return None;
        }
        if !ends {
            return None;
        }
        (*target.get(k)?).filter(|v| !v.is_nan())
    }
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<(), FitError> {
    if actual != expected {
        return Err(FitError::config(format!(
            "{what} has length {actual} but there are {expected} fine periods"
        )));
    }
    Ok(())
}
