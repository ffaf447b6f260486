//! Latent state container.
//!
//! The state is an `R x n` matrix: one row per state dimension, one column per
//! fine period. The primary (aggregated) model appends two rows after the
//! structural rows:
//!
//! - row `R - 2`: the imputed fine-frequency series
//! - row `R - 1`: the running cumulator of the open coarse interval
//!
//! Callers reach those rows through [`LatentState::imputed_series`] and
//! [`LatentState::cumulator`] rather than through numeric offsets.

use nalgebra::{DMatrix, DMatrixView};

use crate::error::ModelError;

/// Number of rows the aggregated layout appends after the structural rows.
pub const AGGREGATION_ROWS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct LatentState {
    matrix: DMatrix<f64>,
    structural_rows: usize,
    aggregated: bool,
}

impl LatentState {
    /// Plain layout: structural rows only.
    pub fn structural(structural_rows: usize, periods: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(structural_rows, periods),
            structural_rows,
            aggregated: false,
        }
    }

    /// Aggregated layout: structural rows followed by the imputed series and
    /// the cumulator.
    pub fn aggregated(structural_rows: usize, periods: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(structural_rows + AGGREGATION_ROWS, periods),
            structural_rows,
            aggregated: true,
        }
    }

    /// Wrap an existing aggregated-layout matrix.
    pub fn aggregated_from_matrix(
        matrix: DMatrix<f64>,
        structural_rows: usize,
    ) -> Result<Self, ModelError> {
        if matrix.nrows() != structural_rows + AGGREGATION_ROWS {
            return Err(ModelError::DimensionMismatch {
                what: "state rows",
                expected: structural_rows + AGGREGATION_ROWS,
                actual: matrix.nrows(),
            });
        }
        Ok(Self {
            matrix,
            structural_rows,
            aggregated: true,
        })
    }

    /// Total row count `R`.
    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of fine periods.
    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn structural_rows(&self) -> usize {
        self.structural_rows
    }

    pub fn has_aggregation_rows(&self) -> bool {
        self.aggregated
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// The structural rows only.
    pub fn structural_block(&self) -> DMatrixView<'_, f64> {
        self.matrix.rows(0, self.structural_rows)
    }

    pub fn set_structural_block(&mut self, block: &DMatrix<f64>) -> Result<(), ModelError> {
        if block.nrows() != self.structural_rows || block.ncols() != self.ncols() {
            return Err(ModelError::DimensionMismatch {
                what: "structural state block",
                expected: self.structural_rows * self.ncols(),
                actual: block.nrows() * block.ncols(),
            });
        }
        self.matrix.rows_mut(0, self.structural_rows).copy_from(block);
        Ok(())
    }

    /// Row `k` counted from the front, or row `R - 1 - k` counted from the back.
    pub fn row(&self, k: usize, from_front: bool) -> Option<Vec<f64>> {
        let r = self.nrows();
        let index = if from_front {
            k
        } else {
            r.checked_sub(1)?.checked_sub(k)?
        };
        if index >= r {
            return None;
        }
        Some(self.matrix.row(index).iter().copied().collect())
    }

    /// The imputed fine series (row `R - 2`), if this is an aggregated layout.
    pub fn imputed_series(&self) -> Option<Vec<f64>> {
        if !self.aggregated {
            return None;
        }
        self.row(1, false)
    }

    /// The running cumulator (row `R - 1`), if this is an aggregated layout.
    pub fn cumulator(&self) -> Option<Vec<f64>> {
        if !self.aggregated {
            return None;
        }
        self.row(0, false)
    }

    pub fn set_imputed_series(&mut self, values: &[f64]) -> Result<(), ModelError> {
        let row = self.aggregation_row(1, values.len())?;
        for (j, v) in values.iter().enumerate() {
            self.matrix[(row, j)] = *v;
        }
        Ok(())
    }

    pub fn set_cumulator(&mut self, values: &[f64]) -> Result<(), ModelError> {
        let row = self.aggregation_row(0, values.len())?;
        for (j, v) in values.iter().enumerate() {
            self.matrix[(row, j)] = *v;
        }
        Ok(())
    }

    /// State vector at the last fine period (empty when there are no periods).
    pub fn final_state(&self) -> Vec<f64> {
        match self.ncols() {
            0 => Vec::new(),
            n => self.matrix.column(n - 1).iter().copied().collect(),
        }
    }

    fn aggregation_row(&self, from_back: usize, len: usize) -> Result<usize, ModelError> {
        if !self.aggregated {
            return Err(ModelError::InvalidParameter {
                what: "state layout",
                reason: "no aggregation rows".to_string(),
            });
        }
        if len != self.ncols() {
            return Err(ModelError::DimensionMismatch {
                what: "aggregation row",
                expected: self.ncols(),
                actual: len,
            });
        }
        Ok(self.nrows() - 1 - from_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_rows_sit_at_the_tail() {
        let mut state = LatentState::aggregated(3, 4);
        assert_eq!(state.nrows(), 5);
        state.set_imputed_series(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        state.set_cumulator(&[1.0, 3.0, 3.0, 7.0]).unwrap();

        assert_eq!(state.row(3, true).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(state.row(1, false), state.imputed_series());
        assert_eq!(state.row(0, false), state.cumulator());
        assert_eq!(state.final_state(), vec![0.0, 0.0, 0.0, 4.0, 7.0]);
    }

    #[test]
    fn plain_layout_has_no_aggregation_rows() {
        let mut state = LatentState::structural(2, 3);
        assert!(state.imputed_series().is_none());
        assert!(state.set_cumulator(&[0.0; 3]).is_err());
        assert!(state.row(5, false).is_none());
    }

    #[test]
    fn structural_block_roundtrip_checks_shape() {
        let mut state = LatentState::aggregated(2, 3);
        let block = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        state.set_structural_block(&block).unwrap();
        assert_eq!(state.structural_block().clone_owned(), block);
        assert!(state.set_structural_block(&DMatrix::zeros(1, 3)).is_err());
    }
}
