//! Mathematical utilities: robust factorisations and random draws.

pub mod linalg;
pub mod random;

pub use linalg::*;
pub use random::*;
