//! Named per-iteration outputs.
//!
//! Outputs are registered once (name, shape, where the value comes from),
//! allocated once for a known number of iterations, then filled slot by slot.
//! The registered set and shapes never change after allocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::models::{AggregatedModel, ModelRole, PosteriorModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputShape {
    Scalar,
    Vector { len: usize },
    Matrix { rows: usize, cols: usize },
}

impl OutputShape {
    /// Per-iteration dimensions.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            OutputShape::Scalar => Vec::new(),
            OutputShape::Vector { len } => vec![len],
            OutputShape::Matrix { rows, cols } => vec![rows, cols],
        }
    }

    /// Values per iteration.
    pub fn size(&self) -> usize {
        self.dims().iter().product()
    }
}

/// Where an output's value is read from each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Coefficients,
    ResidualSd,
    ComponentParameter {
        model: ModelRole,
        component: usize,
        parameter: usize,
    },
    FinalState {
        model: ModelRole,
    },
    StateContributions {
        model: ModelRole,
    },
    /// Row `row` of the state, counted from the front or from the back.
    StateRow {
        model: ModelRole,
        row: usize,
        from_front: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub name: String,
    pub shape: OutputShape,
    pub source: OutputSource,
}

#[derive(Debug, Clone, Default)]
pub struct OutputRecorder {
    specs: Vec<OutputSpec>,
    buffers: Vec<Vec<f64>>,
    niter: Option<usize>,
}

impl OutputRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        shape: OutputShape,
        source: OutputSource,
    ) -> Result<(), FitError> {
        let name = name.into();
        if self.niter.is_some() {
            return Err(FitError::config(format!(
                "output {name} registered after allocation"
            )));
        }
        if self.specs.iter().any(|s| s.name == name) {
            return Err(FitError::config(format!("duplicate output name {name}")));
        }
        self.specs.push(OutputSpec {
            name,
            shape,
            source,
        });
        Ok(())
    }

    pub fn specs(&self) -> &[OutputSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&OutputSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    /// Allocate storage for `niter` iterations.
    pub fn prepare_to_write(&mut self, niter: usize) {
        self.buffers = self
            .specs
            .iter()
            .map(|s| vec![0.0; niter * s.shape.size()])
            .collect();
        self.niter = Some(niter);
    }

    /// Record every output for slot `iteration`.
    pub fn write<P, A>(&mut self, iteration: usize, primary: &P, augmented: &A) -> Result<(), FitError>
    where
        P: AggregatedModel + ?Sized,
        A: PosteriorModel + ?Sized,
    {
        let niter = self.niter.ok_or_else(|| FitError::Output {
            iteration,
            message: "outputs written before allocation".to_string(),
        })?;
        if iteration >= niter {
            return Err(FitError::Output {
                iteration,
                message: format!("slot {iteration} is past the {niter} allocated"),
            });
        }
        for (spec, buffer) in self.specs.iter().zip(self.buffers.iter_mut()) {
            let values = extract(spec.source, primary, augmented).ok_or_else(|| FitError::Output {
                iteration,
                message: format!("{} has no value", spec.name),
            })?;
            let size = spec.shape.size();
            if values.len() != size {
                return Err(FitError::Output {
                    iteration,
                    message: format!("{} has {} values, expected {size}", spec.name, values.len()),
                });
            }
            buffer[iteration * size..(iteration + 1) * size].copy_from_slice(&values);
        }
        Ok(())
    }

    /// Hand the filled buffers over as a [`FitOutput`].
    pub fn into_output(self, seed: u64) -> FitOutput {
        let niter = self.niter.unwrap_or(0);
        let outputs = self
            .specs
            .into_iter()
            .zip(self.buffers)
            .map(|(spec, values)| {
                let mut shape = vec![niter];
                shape.extend(spec.shape.dims());
                (spec.name, OutputArray { shape, values })
            })
            .collect();
        FitOutput {
            seed,
            niter,
            outputs,
        }
    }
}

fn extract<P, A>(source: OutputSource, primary: &P, augmented: &A) -> Option<Vec<f64>>
where
    P: AggregatedModel + ?Sized,
    A: PosteriorModel + ?Sized,
{
    match source {
        OutputSource::Coefficients => Some(primary.coefficients().to_vec()),
        OutputSource::ResidualSd => Some(vec![primary.residual_sd()]),
        OutputSource::ComponentParameter {
            model,
            component,
            parameter,
        } => {
            let structure = match model {
                ModelRole::Primary => primary.state_structure(),
                ModelRole::Augmented => augmented.state_structure(),
            };
            let value = structure.components().get(component)?.parameters().get(parameter)?;
            Some(vec![*value])
        }
        OutputSource::FinalState { model } => Some(match model {
            ModelRole::Primary => primary.state().final_state(),
            ModelRole::Augmented => augmented.state().final_state(),
        }),
        OutputSource::StateContributions { model } => {
            let m = match model {
                ModelRole::Primary => primary.state_contributions(),
                ModelRole::Augmented => augmented.state_contributions(),
            };
            // Row-major, one component per row.
            Some(m.transpose().iter().copied().collect())
        }
        OutputSource::StateRow {
            model,
            row,
            from_front,
        } => match model {
            ModelRole::Primary => primary.state().row(row, from_front),
            ModelRole::Augmented => augmented.state().row(row, from_front),
        },
    }
}

/// Draws of one output: `shape[0]` iterations, values row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArray {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl OutputArray {
    pub fn niter(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Values per iteration.
    pub fn draw_size(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn draw(&self, iteration: usize) -> Option<&[f64]> {
        let size = self.draw_size();
        self.values.get(iteration * size..(iteration + 1) * size)
    }

    /// Draws of element `index` across iterations.
    pub fn element(&self, index: usize) -> Vec<f64> {
        (0..self.niter())
            .filter_map(|i| self.draw(i).and_then(|d| d.get(index).copied()))
            .collect()
    }
}

/// Every recorded output of a completed fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutput {
    pub seed: u64,
    pub niter: usize,
    pub outputs: BTreeMap<String, OutputArray>,
}

impl FitOutput {
    pub fn get(&self, name: &str) -> Option<&OutputArray> {
        self.outputs.get(name)
    }
}
