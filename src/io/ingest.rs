//! Fit request ingest.
//!
//! A request is a single JSON document (see `domain::FitRequest`). Structural
//! validation (lengths, fractions, priors) happens when the fit builds its
//! training data, so configuration problems surface as `FitError::Config`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::debug;

use crate::domain::FitRequest;
use crate::error::{AppError, EXIT_CONFIG, EXIT_IO};

/// Read a fit request JSON file.
pub fn read_fit_request(path: &Path) -> Result<FitRequest, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            EXIT_IO,
            format!("Failed to open fit request '{}': {e}", path.display()),
        )
    })?;
    let request: FitRequest = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        AppError::new(
            EXIT_CONFIG,
            format!("Invalid fit request '{}': {e}", path.display()),
        )
    })?;
    debug!(
        periods = request.predictors.len(),
        intervals = request.target_series.len(),
        components = request.state_specification.len(),
        "read fit request"
    );
    Ok(request)
}
