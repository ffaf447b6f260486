//! Wires the primary and augmented models and registers every output.
//!
//! The order matters:
//!
//! 1. regression outputs
//! 2. state components on the primary model (and their outputs)
//! 3. the same components on the augmented model, under [`AUGMENTED_PREFIX`]
//! 4. regression prior and sampler (draws suppressed per truth overrides)
//! 5. pinned state, if any
//! 6. final-state outputs, sized only now that the state dimension is known
//! 7. history outputs, if requested

use tracing::debug;

use crate::domain::{RegressionPrior, SamplerCapabilities, StateComponentSpec, TruthOverrides};
use crate::error::{FitError, ModelError};
use crate::models::{
    component_labels, AggregatedStateSpaceRegression, ModelRole, PosteriorModel, SpikeSlabSampler,
    StateComponent, StateSpaceModel,
};
use crate::report::{OutputRecorder, OutputShape, OutputSource};

/// Output-name prefix for everything drawn by the augmented model.
pub const AUGMENTED_PREFIX: &str = "augmented_";

#[derive(Debug, Clone, Copy)]
pub struct ModelSpecification<'a> {
    pub components: &'a [StateComponentSpec],
    pub regression_prior: &'a RegressionPrior,
    pub truth: Option<&'a TruthOverrides>,
    pub save_state_history: bool,
}

pub fn specify_models(
    primary: &mut AggregatedStateSpaceRegression,
    augmented: &mut StateSpaceModel,
    spec: &ModelSpecification<'_>,
) -> Result<OutputRecorder, FitError> {
    let mut recorder = OutputRecorder::new();
    let prior = spec.regression_prior;
    prior.validate(primary.xdim())?;

    recorder.register(
        "coefficients",
        OutputShape::Vector {
            len: primary.xdim(),
        },
        OutputSource::Coefficients,
    )?;
    recorder.register("sigma_obs", OutputShape::Scalar, OutputSource::ResidualSd)?;

    let labels = component_labels(spec.components);
    for (index, (component_spec, label)) in spec.components.iter().zip(&labels).enumerate() {
        let component = StateComponent::new(component_spec)?.with_label(label.as_str());
        component.register_outputs(ModelRole::Primary, index, "", &mut recorder)?;
        component.attach(primary);
    }
    for (index, (component_spec, label)) in spec.components.iter().zip(&labels).enumerate() {
        let component = StateComponent::new(component_spec)?.with_label(label.as_str());
        component.register_outputs(ModelRole::Augmented, index, AUGMENTED_PREFIX, &mut recorder)?;
        component.attach(augmented);
    }
    let primary_rows = primary.state().structural_rows();
    let augmented_rows = augmented.state().structural_rows();
    if primary_rows != augmented_rows {
        return Err(FitError::config(format!(
            "primary model has {primary_rows} structural state rows, augmented has {augmented_rows}"
        )));
    }

    let capabilities = SamplerCapabilities::from_truth(spec.truth);
    primary
        .set_residual_sd(prior.sigma_guess)
        .map_err(model_config)?;
    primary.set_regression_sampler(SpikeSlabSampler::new(prior, capabilities));
    augmented.set_observation_prior(prior.residual_sd_prior());

    if let Some(truth) = spec.truth {
        if let Some(beta) = &truth.beta {
            primary.set_coefficients(beta).map_err(model_config)?;
        }
        if let Some(sigma) = truth.sigma_obs {
            primary.set_residual_sd(sigma).map_err(model_config)?;
        }
        if let Some(state) = truth.state_matrix()? {
            primary.permanently_set_state(state).map_err(model_config)?;
        }
    }

    recorder.register(
        "final_state",
        OutputShape::Vector {
            len: primary.state().nrows(),
        },
        OutputSource::FinalState {
            model: ModelRole::Primary,
        },
    )?;
    recorder.register(
        format!("{AUGMENTED_PREFIX}final_state"),
        OutputShape::Vector {
            len: augmented.state().nrows(),
        },
        OutputSource::FinalState {
            model: ModelRole::Augmented,
        },
    )?;

    if spec.save_state_history {
        let n = primary.time_dimension();
        recorder.register(
            "state_contributions",
            OutputShape::Matrix {
                rows: primary.number_of_components(),
                cols: n,
            },
            OutputSource::StateContributions {
                model: ModelRole::Primary,
            },
        )?;
        recorder.register(
            "latent_fine",
            OutputShape::Vector { len: n },
            OutputSource::StateRow {
                model: ModelRole::Primary,
                row: 1,
                from_front: false,
            },
        )?;
        recorder.register(
            "cumulator",
            OutputShape::Vector { len: n },
            OutputSource::StateRow {
                model: ModelRole::Primary,
                row: 0,
                from_front: false,
            },
        )?;
        recorder.register(
            format!("{AUGMENTED_PREFIX}state_contributions"),
            OutputShape::Matrix {
                rows: augmented.number_of_components(),
                cols: augmented.time_dimension(),
            },
            OutputSource::StateContributions {
                model: ModelRole::Augmented,
            },
        )?;
    }

    debug!(
        components = spec.components.len(),
        structural_rows = primary_rows,
        outputs = recorder.specs().len(),
        "models specified"
    );
    Ok(recorder)
}

fn model_config(err: ModelError) -> FitError {
    FitError::config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FineObservation, NormalPrior, SdPrior};
    use nalgebra::DMatrix;

    fn components() -> Vec<StateComponentSpec> {
        vec![
            StateComponentSpec::LocalLinearTrend {
                level_sigma_prior: SdPrior::new(0.5, 1.0),
                slope_sigma_prior: SdPrior::new(0.05, 1.0),
                initial_state_prior: NormalPrior::default(),
            },
            StateComponentSpec::Seasonal {
                nseasons: 4,
                sigma_prior: SdPrior::new(0.1, 1.0),
                initial_state_prior: NormalPrior::default(),
            },
        ]
    }

    fn models(n: usize) -> (AggregatedStateSpaceRegression, StateSpaceModel) {
        let mut primary = AggregatedStateSpaceRegression::new(1);
        let data = (0..n)
            .map(|t| FineObservation {
                predictors: vec![t as f64],
                coarse_value: None,
                fraction: 1.0,
                ends_interval: true,
            })
            .collect();
        primary.set_data(data).unwrap();
        (primary, StateSpaceModel::new(vec![0.0; n]))
    }

    #[test]
    fn registers_outputs_in_order_with_congruent_state() {
        let (mut primary, mut augmented) = models(6);
        let specs = components();
        let prior = RegressionPrior::weak(1, 1.0);
        let rec = specify_models(
            &mut primary,
            &mut augmented,
            &ModelSpecification {
                components: &specs,
                regression_prior: &prior,
                truth: None,
                save_state_history: true,
            },
        )
        .unwrap();

        assert_eq!(
            rec.names(),
            vec![
                "coefficients",
                "sigma_obs",
                "sigma_trend_level",
                "sigma_trend_slope",
                "sigma_seasonal_4",
                "augmented_sigma_trend_level",
                "augmented_sigma_trend_slope",
                "augmented_sigma_seasonal_4",
                "final_state",
                "augmented_final_state",
                "state_contributions",
                "latent_fine",
                "cumulator",
                "augmented_state_contributions",
            ]
        );
        assert_eq!(primary.state().structural_rows(), 5);
        assert_eq!(augmented.state().structural_rows(), 5);
        assert_eq!(
            rec.spec("final_state").unwrap().shape,
            OutputShape::Vector { len: 7 }
        );
        assert_eq!(
            rec.spec("augmented_final_state").unwrap().shape,
            OutputShape::Vector { len: 5 }
        );
        assert_eq!(
            rec.spec("state_contributions").unwrap().shape,
            OutputShape::Matrix { rows: 2, cols: 6 }
        );
    }

    #[test]
    fn repeated_component_kinds_register_distinct_outputs() {
        let (mut primary, mut augmented) = models(6);
        let seasonal = StateComponentSpec::Seasonal {
            nseasons: 3,
            sigma_prior: SdPrior::new(0.1, 1.0),
            initial_state_prior: NormalPrior::default(),
        };
        let level = StateComponentSpec::LocalLevel {
            sigma_prior: SdPrior::new(0.5, 1.0),
            initial_state_prior: NormalPrior::default(),
        };
        let specs = vec![level.clone(), seasonal.clone(), seasonal, level];
        let prior = RegressionPrior::weak(1, 1.0);
        let rec = specify_models(
            &mut primary,
            &mut augmented,
            &ModelSpecification {
                components: &specs,
                regression_prior: &prior,
                truth: None,
                save_state_history: false,
            },
        )
        .unwrap();

        let names = rec.names();
        for name in [
            "sigma_level",
            "sigma_seasonal_3",
            "sigma_seasonal_3_2",
            "sigma_level_2",
            "augmented_sigma_seasonal_3_2",
            "augmented_sigma_level_2",
        ] {
            assert!(names.contains(&name), "missing {name} in {names:?}");
        }
        assert_eq!(primary.state().structural_rows(), 6);
        assert_eq!(augmented.state().structural_rows(), 6);
        assert_eq!(
            rec.spec("sigma_seasonal_3_2").unwrap().source,
            OutputSource::ComponentParameter {
                model: ModelRole::Primary,
                component: 2,
                parameter: 0,
            }
        );
    }

    #[test]
    fn history_outputs_are_optional() {
        let (mut primary, mut augmented) = models(3);
        let specs = components();
        let prior = RegressionPrior::weak(1, 1.0);
        let rec = specify_models(
            &mut primary,
            &mut augmented,
            &ModelSpecification {
                components: &specs,
                regression_prior: &prior,
                truth: None,
                save_state_history: false,
            },
        )
        .unwrap();
        assert!(rec.spec("latent_fine").is_none());
        assert!(rec.spec("augmented_final_state").is_some());
    }

    #[test]
    fn truth_state_is_dimension_checked_and_pinned() {
        let specs = components();
        let prior = RegressionPrior::weak(1, 1.0);

        let (mut primary, mut augmented) = models(3);
        let wrong = TruthOverrides {
            state: Some(vec![vec![0.0; 3]; 5]),
            ..Default::default()
        };
        let spec = ModelSpecification {
            components: &specs,
            regression_prior: &prior,
            truth: Some(&wrong),
            save_state_history: false,
        };
        assert!(matches!(
            specify_models(&mut primary, &mut augmented, &spec),
            Err(FitError::Config(_))
        ));

        let (mut primary, mut augmented) = models(3);
        let truth = TruthOverrides {
            state: Some(vec![vec![1.0; 3]; 7]),
            beta: Some(vec![2.0]),
            sigma_obs: Some(0.3),
        };
        let spec = ModelSpecification {
            truth: Some(&truth),
            ..spec
        };
        specify_models(&mut primary, &mut augmented, &spec).unwrap();
        assert!(primary.is_state_fixed());
        assert_eq!(primary.state().matrix(), &DMatrix::from_element(7, 3, 1.0));
        assert_eq!(primary.regression().beta, vec![2.0]);
        assert_eq!(primary.regression().sigma, 0.3);
    }

    #[test]
    fn prior_of_the_wrong_dimension_is_rejected() {
        let (mut primary, mut augmented) = models(3);
        let prior = RegressionPrior::weak(2, 1.0);
        let result = specify_models(
            &mut primary,
            &mut augmented,
            &ModelSpecification {
                components: &[],
                regression_prior: &prior,
                truth: None,
                save_state_history: true,
            },
        );
        assert!(matches!(result, Err(FitError::Config(_))));
    }
}
