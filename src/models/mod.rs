//! State-space models and their posterior samplers.
//!
//! - `component` / `structure`: state components and the system they imply
//! - `kalman`: simulation smoother
//! - `regression`: spike-and-slab regression
//! - `aggregated`: the primary model (aggregation constraints + regression)
//! - `state_space`: the augmented model (plain local model on the imputed series)
//! - `traits`: what the fit loop needs from a model

pub mod aggregated;
pub mod component;
pub mod kalman;
pub mod regression;
pub mod state;
pub mod state_space;
pub mod structure;
pub mod traits;

pub use aggregated::{AggregatedStateSpaceRegression, AggregationConstraints};
pub use component::{component_labels, StateComponent};
pub use regression::{RegressionModel, SpikeSlabSampler};
pub use state::{LatentState, AGGREGATION_ROWS};
pub use state_space::StateSpaceModel;
pub use structure::{StateStructure, StructuralModel};
pub use traits::{AggregatedModel, AugmentedModel, ModelRole, PosteriorModel};
