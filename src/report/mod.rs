//! Reporting: per-iteration output recording and posterior summaries.

pub mod format;
pub mod recorder;

pub use format::*;
pub use recorder::*;
