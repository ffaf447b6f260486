//! Error types.
//!
//! - `AppError` is what the binary reports: a message plus a process exit code.
//! - `FitError` is the single error object a fit surfaces to its caller. Once the
//!   sampling loop has started, every variant carries the iteration index.
//! - `ModelError` is raised by the posterior samplers themselves.

use thiserror::Error;

use crate::models::ModelRole;

/// Exit code used for invalid inputs / configuration.
pub const EXIT_CONFIG: u8 = 2;
/// Exit code used for I/O failures (reading inputs, writing outputs).
pub const EXIT_IO: u8 = 3;
/// Exit code used when a fit fails after sampling started.
pub const EXIT_FIT: u8 = 4;
/// Exit code used when a fit is cancelled.
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match err {
            FitError::Config(_) => EXIT_CONFIG,
            _ => EXIT_FIT,
        };
        AppError::new(code, err.to_string())
    }
}

/// Numerical failure inside a posterior sampler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("{what} is not positive definite")]
    NotPositiveDefinite { what: &'static str },

    #[error("non-finite value in {what}")]
    NonFinite { what: &'static str },

    #[error("{what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid parameter {what}: {reason}")]
    InvalidParameter { what: &'static str, reason: String },
}

/// Length mismatch between the imputed fine series and the augmented model data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Imputed data ({imputed}) and augmented data ({augmented}) are not the same size")]
pub struct TranscriptionError {
    pub imputed: usize,
    pub augmented: usize,
}

/// Fatal outcome of a fit call. No partial results accompany any variant.
#[derive(Debug, Clone, Error)]
pub enum FitError {
    /// Invalid inputs, detected before any sampling begins.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("MCMC iteration {iteration}: {source}")]
    Transcription {
        iteration: usize,
        #[source]
        source: TranscriptionError,
    },

    #[error("MCMC iteration {iteration}: {model} model sampler failed: {source}")]
    Sampling {
        iteration: usize,
        model: ModelRole,
        #[source]
        source: ModelError,
    },

    #[error("MCMC iteration {iteration}: {model} model sampler panicked: {message}")]
    Panicked {
        iteration: usize,
        model: ModelRole,
        message: String,
    },

    #[error("MCMC iteration {iteration}: failed to record output: {message}")]
    Output { iteration: usize, message: String },
}

impl FitError {
    pub fn config(message: impl Into<String>) -> Self {
        FitError::Config(message.into())
    }

    /// Iteration at which the fit failed (`None` for configuration errors).
    pub fn iteration(&self) -> Option<usize> {
        match self {
            FitError::Config(_) => None,
            FitError::Transcription { iteration, .. }
            | FitError::Sampling { iteration, .. }
            | FitError::Panicked { iteration, .. }
            | FitError::Output { iteration, .. } => Some(*iteration),
        }
    }
}
