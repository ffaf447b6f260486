//! Export posterior summaries to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{AppError, EXIT_IO};
use crate::report::ParameterSummary;

/// Write one row per summarised parameter.
pub fn write_summary_csv(path: &Path, summaries: &[ParameterSummary]) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::new(
            EXIT_IO,
            format!("Failed to create summary CSV '{}': {e}", path.display()),
        )
    })?;
    write_summary(&mut file, summaries)
        .map_err(|e| AppError::new(EXIT_IO, format!("Failed to write summary CSV: {e}")))
}

fn write_summary<W: Write>(out: &mut W, summaries: &[ParameterSummary]) -> std::io::Result<()> {
    writeln!(out, "parameter,mean,sd,q05,median,q95")?;
    for s in summaries {
        writeln!(
            out,
            "{},{:.10},{:.10},{:.10},{:.10},{:.10}",
            s.name, s.mean, s.sd, s.q05, s.q50, s.q95
        )?;
    }
    Ok(())
}
