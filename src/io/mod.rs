//! Input/output helpers.
//!
//! - fit request ingest (`ingest`)
//! - posterior draw files (`draws`)
//! - summary exports (`export`)

pub mod draws;
pub mod export;
pub mod ingest;

pub use draws::*;
pub use export::*;
pub use ingest::*;
