//! Read/write posterior draw files.
//!
//! A draw file is the JSON form of `report::FitOutput`: the seed, the number
//! of iterations and every named output with its shape.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::Serialize;

use crate::error::{AppError, EXIT_CONFIG, EXIT_IO};
use crate::report::FitOutput;

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::new(
            EXIT_IO,
            format!("Failed to create '{}': {e}", path.display()),
        )
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| {
        AppError::new(
            EXIT_IO,
            format!("Failed to write '{}': {e}", path.display()),
        )
    })
}

pub fn write_draws_json(path: &Path, output: &FitOutput) -> Result<(), AppError> {
    write_json(path, output)
}

pub fn read_draws_json(path: &Path) -> Result<FitOutput, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            EXIT_IO,
            format!("Failed to open draws JSON '{}': {e}", path.display()),
        )
    })?;
    let output: FitOutput = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Invalid draws JSON: {e}")))?;
    for (name, array) in &output.outputs {
        let expected = array
            .shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                AppError::new(
                    EXIT_CONFIG,
                    format!("Output '{name}' has an oversized shape {:?}", array.shape),
                )
            })?;
        if array.values.len() != expected {
            return Err(AppError::new(
                EXIT_CONFIG,
                format!(
                    "Output '{name}' has {} values but shape {:?}",
                    array.values.len(),
                    array.shape
                ),
            ));
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::OutputArray;
    use std::collections::BTreeMap;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mfbsts-{}-{name}", std::process::id()))
    }

    #[test]
    fn draws_survive_a_file_roundtrip() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "sigma_obs".to_string(),
            OutputArray {
                shape: vec![2],
                values: vec![0.5, 0.25],
            },
        );
        let output = FitOutput {
            seed: 3,
            niter: 2,
            outputs,
        };
        let path = temp_path("draws.json");
        write_draws_json(&path, &output).unwrap();
        let back = read_draws_json(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, output);
    }

    #[test]
    fn inconsistent_shapes_are_rejected() {
        let path = temp_path("bad.json");
        std::fs::write(
            &path,
            r#"{"seed": 1, "niter": 2, "outputs": {"x": {"shape": [2, 2], "values": [1.0]}}}"#,
        )
        .unwrap();
        let err = read_draws_json(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert_eq!(err.exit_code(), EXIT_CONFIG);
    }

    #[test]
    fn overflowing_shapes_are_rejected() {
        let path = temp_path("huge.json");
        let huge = usize::MAX;
        std::fs::write(
            &path,
            format!(r#"{{"seed": 1, "niter": 2, "outputs": {{"x": {{"shape": [{huge}, 2], "values": []}}}}}}"#),
        )
        .unwrap();
        let err = read_draws_json(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert_eq!(err.exit_code(), EXIT_CONFIG);
        assert!(err.to_string().contains("oversized"));
    }
}
