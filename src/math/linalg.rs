//! Dense linear algebra helpers on top of nalgebra.
//!
//! The samplers repeatedly factor small covariance / precision matrices that are
//! positive definite in exact arithmetic but can lose definiteness to rounding
//! (e.g. the backward-sampling covariance of a deterministic seasonal state).
//! We symmetrise first and then retry the Cholesky factorisation with a
//! progressively larger diagonal jitter, scaled to the matrix.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

use crate::error::ModelError;

/// Relative diagonal jitters tried in order.
const JITTERS: [f64; 6] = [0.0, 1e-12, 1e-10, 1e-8, 1e-6, 1e-4];

/// `(m + m') / 2`.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Cholesky factorisation with escalating jitter.
pub fn robust_cholesky(
    m: &DMatrix<f64>,
    what: &'static str,
) -> Result<Cholesky<f64, Dyn>, ModelError> {
    if m.nrows() != m.ncols() {
        return Err(ModelError::DimensionMismatch {
            what,
            expected: m.nrows(),
            actual: m.ncols(),
        });
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite { what });
    }

    let sym = symmetrize(m);
    let scale = sym
        .diagonal()
        .iter()
        .fold(1.0_f64, |acc, v| acc.max(v.abs()));

    for &jitter in &JITTERS {
        let mut candidate = sym.clone();
        if jitter > 0.0 {
            for i in 0..candidate.nrows() {
                candidate[(i, i)] += jitter * scale;
            }
        }
        if let Some(chol) = Cholesky::new(candidate) {
            return Ok(chol);
        }
    }

    Err(ModelError::NotPositiveDefinite { what })
}

/// `ln |A|` from the Cholesky factor of `A`.
pub fn log_determinant(chol: &Cholesky<f64, Dyn>) -> f64 {
    chol.l_dirty().diagonal().iter().map(|d| 2.0 * d.ln()).sum()
}

/// Square submatrix `m[idx, idx]`.
pub fn select_square(m: &DMatrix<f64>, idx: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(idx.len(), idx.len(), |i, j| m[(idx[i], idx[j])])
}

/// Subvector `v[idx]`.
pub fn select_vector(v: &DVector<f64>, idx: &[usize]) -> DVector<f64> {
    DVector::from_fn(idx.len(), |i, _| v[idx[i]])
}

/// Block-diagonal matrix from square blocks.
pub fn block_diagonal(blocks: &[DMatrix<f64>]) -> DMatrix<f64> {
    let n: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::<f64>::zeros(n, n);
    let mut offset = 0;
    for block in blocks {
        let k = block.nrows();
        out.view_mut((offset, offset), (k, k)).copy_from(block);
        offset += k;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robust_cholesky_recovers_semidefinite_matrix() {
        // Rank-one matrix: plain Cholesky fails, jitter makes it usable.
        let v = DVector::from_row_slice(&[1.0, 2.0]);
        let m = &v * v.transpose();
        let chol = robust_cholesky(&m, "test").unwrap();
        let back = chol.l() * chol.l().transpose();
        assert!((back - m).amax() < 1e-3);
    }

    #[test]
    fn robust_cholesky_rejects_non_finite() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, f64::NAN, 1.0]);
        assert_eq!(
            robust_cholesky(&m, "m").unwrap_err(),
            ModelError::NonFinite { what: "m" }
        );
    }

    #[test]
    fn log_determinant_of_diagonal() {
        let m = DMatrix::from_diagonal(&DVector::from_row_slice(&[2.0, 3.0]));
        let chol = robust_cholesky(&m, "diag").unwrap();
        assert!((log_determinant(&chol) - 6.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn block_diagonal_places_blocks() {
        let a = DMatrix::from_element(1, 1, 2.0);
        let b = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
        let m = block_diagonal(&[a, b]);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m[(0, 0)], 2.0);
        assert_eq!(m[(1, 2)], 1.0);
        assert_eq!(m[(0, 1)], 0.0);
    }
}
