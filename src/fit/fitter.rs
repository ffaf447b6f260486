//! The MCMC fit loop.
//!
//! States: ready -> running -> completed | cancelled | failed.
//!
//! - One warm-up step runs on the primary model before outputs are allocated
//!   (skipped when there are no iterations, so nothing is sampled at all).
//! - Each iteration polls cancellation, samples the primary model, copies its
//!   imputed series into the augmented model, samples the augmented model and
//!   records every output.
//! - Any failure aborts the whole fit with the iteration index attached; panics
//!   inside a sampler are caught and reported the same way.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::Once;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info};

use crate::data::TrainingDataBuilder;
use crate::domain::{FineObservation, FitRequest, RegressionPrior};
use crate::error::FitError;
use crate::fit::progress::{CancellationToken, ProgressSink};
use crate::fit::specify::{specify_models, ModelSpecification};
use crate::fit::transcribe::transcribe_response;
use crate::models::{
    AggregatedModel, AggregatedStateSpaceRegression, AugmentedModel, ModelRole, PosteriorModel,
    StateSpaceModel,
};
use crate::report::{FitOutput, OutputRecorder};

#[derive(Debug, Clone, PartialEq)]
pub enum FitOutcome {
    Completed(FitOutput),
    /// Stopped at the start of `iteration`; no output is kept.
    Cancelled { iteration: usize },
}

impl FitOutcome {
    pub fn completed(self) -> Option<FitOutput> {
        match self {
            FitOutcome::Completed(output) => Some(output),
            FitOutcome::Cancelled { .. } => None,
        }
    }
}

/// Drives `niter` iterations over a pair of already-specified models.
#[derive(Debug, Clone)]
pub struct FitLoop {
    niter: usize,
    seed: u64,
    rng: StdRng,
}

impl FitLoop {
    pub fn new(niter: usize, seed: u64) -> Self {
        Self {
            niter,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn run<P, A>(
        mut self,
        primary: &mut P,
        augmented: &mut A,
        recorder: OutputRecorder,
        cancel: &dyn CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<FitOutcome, FitError>
    where
        P: AggregatedModel,
        A: AugmentedModel,
    {
        info!(niter = self.niter, seed = self.seed, "fit ready");
        match self.iterate(primary, augmented, recorder, cancel, progress) {
            Ok(FitOutcome::Completed(output)) => {
                info!(niter = self.niter, "fit completed");
                Ok(FitOutcome::Completed(output))
            }
            Ok(FitOutcome::Cancelled { iteration }) => {
                info!(iteration, "fit cancelled; discarding partial output");
                Ok(FitOutcome::Cancelled { iteration })
            }
            Err(err) => {
                error!(iteration = ?err.iteration(), "fit failed: {err}");
                Err(err)
            }
        }
    }

    fn iterate<P, A>(
        &mut self,
        primary: &mut P,
        augmented: &mut A,
        mut recorder: OutputRecorder,
        cancel: &dyn CancellationToken,
        progress: &mut dyn ProgressSink,
    ) -> Result<FitOutcome, FitError>
    where
        P: AggregatedModel,
        A: AugmentedModel,
    {
        if self.niter > 0 {
            debug!("warm-up step on the primary model");
            guarded_step(primary, &mut self.rng, 0, ModelRole::Primary)?;
        }
        recorder.prepare_to_write(self.niter);
        info!(niter = self.niter, "running");

        for iteration in 0..self.niter {
            if cancel.should_stop() {
                return Ok(FitOutcome::Cancelled { iteration });
            }
            progress.report(iteration, self.niter);

            guarded_step(primary, &mut self.rng, iteration, ModelRole::Primary)?;
            transcribe_response(&*primary, augmented)
                .map_err(|source| FitError::Transcription { iteration, source })?;
            guarded_step(augmented, &mut self.rng, iteration, ModelRole::Augmented)?;
            recorder.write(iteration, &*primary, &*augmented)?;
        }

        Ok(FitOutcome::Completed(recorder.into_output(self.seed)))
    }
}

thread_local! {
    /// Set while a sampler runs on this thread; its panics are reported as
    /// `FitError::Panicked` instead of by the default hook.
    static IN_SAMPLER: Cell<bool> = const { Cell::new(false) };
}

static QUIET_SAMPLER_PANICS: Once = Once::new();

/// Wrap the process panic hook once so panics caught by [`guarded_step`] are
/// logged at debug level rather than printed to stderr. Panics anywhere else
/// still reach the previous hook.
fn install_sampler_panic_hook() {
    QUIET_SAMPLER_PANICS.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_SAMPLER.with(Cell::get) {
                match info.location() {
                    Some(location) => debug!(%location, "sampler panicked"),
                    None => debug!("sampler panicked"),
                }
                return;
            }
            previous(info);
        }));
    });
}

/// One posterior step with errors and panics tagged by iteration and model.
fn guarded_step<M>(
    model: &mut M,
    rng: &mut StdRng,
    iteration: usize,
    role: ModelRole,
) -> Result<(), FitError>
where
    M: PosteriorModel + ?Sized,
{
    install_sampler_panic_hook();
    IN_SAMPLER.with(|flag| flag.set(true));
    let result = catch_unwind(AssertUnwindSafe(|| model.sample_posterior(rng)));
    IN_SAMPLER.with(|flag| flag.set(false));
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(FitError::Sampling {
            iteration,
            model: role,
            source,
        }),
        Err(payload) => Err(FitError::Panicked {
            iteration,
            model: role,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic in sampler".to_string()
    }
}

/// Fit a request end to end: build the data, specify both models, run the
/// loop.
pub fn fit_mixed_frequency(
    request: &FitRequest,
    cancel: &dyn CancellationToken,
    progress: &mut dyn ProgressSink,
) -> Result<FitOutcome, FitError> {
    let data = TrainingDataBuilder::new(request.skip_first_interval).build(
        &request.target_series,
        &request.predictors,
        &request.which_coarse_interval,
        &request.membership_fraction,
        &request.ends_interval,
    )?;
    let xdim = data.first().map(FineObservation::xdim).unwrap_or(0);
    let n = data.len();

    let prior = match &request.regression_prior {
        Some(prior) => prior.clone(),
        None => RegressionPrior::weak(xdim, default_sigma_guess(&data)),
    };
    let seed = request.seed.unwrap_or_else(|| {
        let seed = rand::random();
        info!(seed, "no seed given; drew one from entropy");
        seed
    });

    let mut primary = AggregatedStateSpaceRegression::new(xdim);
    primary
        .set_data(data)
        .map_err(|e| FitError::config(e.to_string()))?;
    let mut augmented = StateSpaceModel::new(vec![0.0; n]);
    let recorder = specify_models(
        &mut primary,
        &mut augmented,
        &ModelSpecification {
            components: &request.state_specification,
            regression_prior: &prior,
            truth: request.truth.as_ref(),
            save_state_history: request.save_state_history,
        },
    )?;

    FitLoop::new(request.niter, seed).run(&mut primary, &mut augmented, recorder, cancel, progress)
}

/// Residual sd guess for the default prior: the spread of the observed
/// aggregates, or 1 when there are too few of them.
fn default_sigma_guess(data: &[FineObservation]) -> f64 {
    let values: Vec<f64> = data.iter().filter_map(|obs| obs.coarse_value).collect();
    if values.len() < 2 {
        return 1.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
        / (values.len() - 1) as f64;
    let sd = var.sqrt();
    if sd.is_finite() && sd > 0.0 { sd } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::fit::progress::{CancelWhen, NeverCancel, SilentProgress};
    use crate::models::{LatentState, StateStructure};
    use crate::report::{OutputShape, OutputSource};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct MockPrimary {
        state: LatentState,
        structure: StateStructure,
        log: Log,
        calls: usize,
        fail_on_call: Option<usize>,
    }

    impl PosteriorModel for MockPrimary {
        fn time_dimension(&self) -> usize {
            self.state.ncols()
        }
        fn state(&self) -> &LatentState {
            &self.state
        }
        fn state_structure(&self) -> &StateStructure {
            &self.structure
        }
        fn sample_posterior(&mut self, _rng: &mut StdRng) -> Result<(), ModelError> {
            self.calls += 1;
            self.log.borrow_mut().push("primary");
            if Some(self.calls) == self.fail_on_call {
                return Err(ModelError::NonFinite { what: "mock" });
            }
            let imputed = vec![self.calls as f64; self.state.ncols()];
            self.state.set_imputed_series(&imputed)
        }
    }

    impl AggregatedModel for MockPrimary {
        fn coefficients(&self) -> &[f64] {
            &[]
        }
        fn residual_sd(&self) -> f64 {
            1.0
        }
    }

    struct MockAugmented {
        state: LatentState,
        structure: StateStructure,
        observations: Vec<f64>,
        log: Log,
        panic_on_call: Option<usize>,
        calls: usize,
    }

    impl PosteriorModel for MockAugmented {
        fn time_dimension(&self) -> usize {
            self.observations.len()
        }
        fn state(&self) -> &LatentState {
            &self.state
        }
        fn state_structure(&self) -> &StateStructure {
            &self.structure
        }
        fn sample_posterior(&mut self, _rng: &mut StdRng) -> Result<(), ModelError> {
            self.calls += 1;
            self.log.borrow_mut().push("augmented");
            if Some(self.calls) == self.panic_on_call {
                panic!("augmented sampler blew up");
            }
            Ok(())
        }
    }

    impl AugmentedModel for MockAugmented {
        fn observations(&self) -> &[f64] {
            &self.observations
        }
        fn observations_mut(&mut self) -> &mut [f64] {
            &mut self.observations
        }
    }

    fn mocks(n: usize, augmented_n: usize) -> (MockPrimary, MockAugmented, Log) {
        let log: Log = Rc::default();
        let primary = MockPrimary {
            state: LatentState::aggregated(0, n),
            structure: StateStructure::new(),
            log: log.clone(),
            calls: 0,
            fail_on_call: None,
        };
        let augmented = MockAugmented {
            state: LatentState::structural(0, augmented_n),
            structure: StateStructure::new(),
            observations: vec![0.0; augmented_n],
            log: log.clone(),
            panic_on_call: None,
            calls: 0,
        };
        (primary, augmented, log)
    }

    fn recorder() -> OutputRecorder {
        let mut rec = OutputRecorder::new();
        rec.register("sigma_obs", OutputShape::Scalar, OutputSource::ResidualSd)
            .unwrap();
        rec.register(
            "latent_fine",
            OutputShape::Vector { len: 3 },
            OutputSource::StateRow {
                model: ModelRole::Primary,
                row: 1,
                from_front: false,
            },
        )
        .unwrap();
        rec
    }

    #[test]
    fn zero_iterations_sample_nothing() {
        let (mut p, mut a, log) = mocks(3, 3);
        let outcome = FitLoop::new(0, 1)
            .run(&mut p, &mut a, recorder(), &NeverCancel, &mut SilentProgress)
            .unwrap();
        let output = outcome.completed().unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(output.get("latent_fine").unwrap().shape, vec![0, 3]);
        assert_eq!(output.get("sigma_obs").unwrap().shape, vec![0]);
    }

    #[test]
    fn warm_up_then_alternating_steps() {
        let (mut p, mut a, log) = mocks(3, 3);
        let output = FitLoop::new(2, 1)
            .run(&mut p, &mut a, recorder(), &NeverCancel, &mut SilentProgress)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["primary", "primary", "augmented", "primary", "augmented"]
        );
        // Warm-up is call 1, so iteration i records call i + 2.
        let latent = output.get("latent_fine").unwrap();
        assert_eq!(latent.draw(0), Some(&[2.0, 2.0, 2.0][..]));
        assert_eq!(latent.draw(1), Some(&[3.0, 3.0, 3.0][..]));
        assert_eq!(a.observations(), &[3.0, 3.0, 3.0]);
    }

    #[test]
    fn cancellation_stops_before_the_requested_iteration() {
        let (mut p, mut a, _log) = mocks(3, 3);
        let polls = Cell::new(0);
        let cancel = CancelWhen(|| {
            polls.set(polls.get() + 1);
            polls.get() > 3
        });
        let outcome = FitLoop::new(10, 1)
            .run(&mut p, &mut a, recorder(), &cancel, &mut SilentProgress)
            .unwrap();
        assert_eq!(outcome, FitOutcome::Cancelled { iteration: 3 });
        assert_eq!(p.calls, 1 + 3);
        assert_eq!(a.calls, 3);
    }

    #[test]
    fn sampler_errors_carry_the_iteration() {
        let (mut p, mut a, _log) = mocks(3, 3);
        p.fail_on_call = Some(4);
        let err = FitLoop::new(10, 1)
            .run(&mut p, &mut a, recorder(), &NeverCancel, &mut SilentProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            FitError::Sampling {
                iteration: 2,
                model: ModelRole::Primary,
                ..
            }
        ));
        assert_eq!(a.calls, 2);
    }

    #[test]
    fn sampler_panics_become_errors() {
        let (mut p, mut a, _log) = mocks(3, 3);
        a.panic_on_call = Some(2);
        let err = FitLoop::new(5, 1)
            .run(&mut p, &mut a, recorder(), &NeverCancel, &mut SilentProgress)
            .unwrap_err();
        match err {
            FitError::Panicked {
                iteration,
                model,
                message,
            } => {
                assert_eq!(iteration, 1);
                assert_eq!(model, ModelRole::Augmented);
                assert!(message.contains("blew up"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!IN_SAMPLER.with(Cell::get));
    }

    #[test]
    fn panics_outside_samplers_still_reach_the_previous_hook() {
        let (mut p, mut a, _log) = mocks(3, 3);
        a.panic_on_call = Some(1);
        let _ = FitLoop::new(2, 1).run(&mut p, &mut a, recorder(), &NeverCancel, &mut SilentProgress);
        assert!(QUIET_SAMPLER_PANICS.is_completed());
        assert!(!IN_SAMPLER.with(Cell::get));
        // A panic after the loop is an ordinary panic again.
        let outside = std::panic::catch_unwind(|| panic!("outside the fit"));
        assert!(outside.is_err());
    }

    #[test]
    fn transcription_mismatch_fails_the_fit() {
        let (mut p, mut a, _log) = mocks(3, 4);
        let err = FitLoop::new(5, 1)
            .run(&mut p, &mut a, recorder(), &NeverCancel, &mut SilentProgress)
            .unwrap_err();
        assert!(matches!(err, FitError::Transcription { iteration: 0, .. }));
        assert_eq!(a.calls, 0);
        assert_eq!(a.observations(), &[0.0; 4]);
    }
}
