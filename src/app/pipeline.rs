//! Shared "fit pipeline" logic used by the CLI and the integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! read request -> apply CLI overrides -> fit -> summarize
//!
//! The CLI can then focus on presentation (printing, plots, exports).

use tracing::info;

use crate::data::TrainingDataBuilder;
use crate::domain::{FitConfig, FitRequest};
use crate::error::{AppError, EXIT_CANCELLED};
use crate::fit::{fit_mixed_frequency, CancellationToken, FitOutcome, TracingProgress};
use crate::report::{summarize, FitOutput, ParameterSummary};

/// All computed outputs of a single `mfbsts fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub request: FitRequest,
    pub output: FitOutput,
    pub summaries: Vec<ParameterSummary>,
    /// Observed aggregates keyed by the zero-based fine period that closes them.
    pub observed: Vec<(usize, f64)>,
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(config: &FitConfig, cancel: &dyn CancellationToken) -> Result<RunOutput, AppError> {
    let request = crate::io::read_fit_request(&config.input)?;
    run_request(config, apply_overrides(request, config), cancel)
}

/// Execute the pipeline on an in-memory request (overrides already applied).
pub fn run_request(
    config: &FitConfig,
    request: FitRequest,
    cancel: &dyn CancellationToken,
) -> Result<RunOutput, AppError> {
    let mut progress = TracingProgress { ping: request.ping };
    let output = match fit_mixed_frequency(&request, cancel, &mut progress)? {
        FitOutcome::Completed(output) => output,
        FitOutcome::Cancelled { iteration } => {
            return Err(AppError::new(
                EXIT_CANCELLED,
                format!("Fit cancelled at iteration {iteration}"),
            ));
        }
    };
    let summaries = summarize(&output, config.burn);
    let observed = observed_aggregates(&request)?;
    info!(
        niter = output.niter,
        seed = output.seed,
        summaries = summaries.len(),
        "pipeline finished"
    );

    Ok(RunOutput {
        request,
        output,
        summaries,
        observed,
    })
}

/// CLI flags take precedence over the request file.
pub fn apply_overrides(mut request: FitRequest, config: &FitConfig) -> FitRequest {
    if let Some(niter) = config.niter {
        request.niter = niter;
    }
    if let Some(ping) = config.ping {
        request.ping = ping;
    }
    if config.seed.is_some() {
        request.seed = config.seed;
    }
    request.save_state_history &= config.save_state_history;
    request
}

fn observed_aggregates(request: &FitRequest) -> Result<Vec<(usize, f64)>, AppError> {
    let data = TrainingDataBuilder::new(request.skip_first_interval).build(
        &request.target_series,
        &request.predictors,
        &request.which_coarse_interval,
        &request.membership_fraction,
        &request.ends_interval,
    )?;
    Ok(data
        .iter()
        .enumerate()
        .filter_map(|(t, obs)| obs.coarse_value.map(|v| (t, v)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{simulate, SimulationConfig};
    use crate::fit::NeverCancel;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;

    fn config() -> FitConfig {
        FitConfig {
            input: PathBuf::from("unused.json"),
            output: None,
            summary_csv: None,
            niter: Some(5),
            ping: None,
            seed: Some(11),
            save_state_history: true,
            burn: 1,
            plot: false,
            plot_width: 40,
            plot_height: 10,
        }
    }

    fn request() -> FitRequest {
        let sim = simulate(&SimulationConfig {
            intervals: 4,
            periods_per_interval: 3,
            ..Default::default()
        })
        .unwrap();
        sim.request
    }

    #[test]
    fn overrides_take_precedence() {
        let mut cfg = config();
        cfg.save_state_history = false;
        let req = apply_overrides(request(), &cfg);
        assert_eq!(req.niter, 5);
        assert_eq!(req.seed, Some(11));
        assert!(!req.save_state_history);
        assert_eq!(req.ping, 0);
    }

    #[test]
    fn run_collects_observed_aggregates_and_summaries() {
        let cfg = config();
        let run = run_request(&cfg, apply_overrides(request(), &cfg), &NeverCancel).unwrap();
        // Four intervals of three periods; the first interval is skipped.
        let periods: Vec<usize> = run.observed.iter().map(|(t, _)| *t).collect();
        assert_eq!(periods, vec![5, 8, 11]);
        assert_eq!(run.output.niter, 5);
        assert!(run.summaries.iter().any(|s| s.name == "sigma_obs"));
    }

    #[test]
    fn cancellation_maps_to_its_exit_code() {
        let cfg = config();
        let cancel = AtomicBool::new(true);
        let err = run_request(&cfg, apply_overrides(request(), &cfg), &cancel).unwrap_err();
        assert_eq!(err.exit_code(), EXIT_CANCELLED);
    }
}
