//! Input data: training records for a fit and synthetic datasets.

pub mod sample;
pub mod training;

pub use sample::{simulate, SimulatedData, SimulationConfig, SimulationTruth};
pub use training::TrainingDataBuilder;
