// src/qr.rs

//! Thin QR factorization by classical Gram-Schmidt.
//!
//! Each pass takes all projection coefficients against the same vector
//! (`r_ji = <a_i, e_j>` on the first pass), not against the partially
//! orthogonalized one as the modified variant would. A single pass loses
//! orthogonality roughly with the square of the condition number of `A`, and
//! the QR iteration multiplies those `Q` factors together a thousand times, so
//! the projection is repeated once on the residual (CGS2). The second pass
//! adds its coefficients into `R`, and `Q` stays orthonormal to working
//! precision as long as `A` is not numerically rank deficient.
//!
//! A pivot is treated as degenerate when the residual norm of a column after
//! projection is at most `DEGENERACY_TOLERANCE` times the largest column norm
//! of `A`, so the test is invariant to the overall scale of the input. Callers choose
//! what happens then: [`QrDecomposition::decompose`] rejects the input, while
//! [`QrDecomposition::decompose_completing`] records a zero on the diagonal of
//! `R` and fills the column of `Q` with a unit vector orthogonal to the
//! previous ones, which keeps `Q` orthonormal and `A = QR` intact.

use log::trace;

use crate::error::PcaError;
use crate::matrix::{dot, norm, Matrix};

/// Relative residual norm below which a Gram-Schmidt pivot counts as zero.
pub const DEGENERACY_TOLERANCE: f64 = 1e-12;

const REORTHOGONALIZATION_PASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DegeneratePivot {
    Reject,
    Complete,
}

/// The factors of `A = QR` for an `m x n` matrix `A` with `n <= m`.
#[derive(Debug, Clone)]
pub struct QrDecomposition {
    /// `m x n`, orthonormal columns.
    q: Matrix,
    /// `n x n`, upper triangular.
    r: Matrix,
    degenerate_columns: Vec<usize>,
}

impl QrDecomposition {
    /// Factors `a`, failing on the first linearly dependent column.
    ///
    /// # Errors
    /// * `DimensionMismatch` if `a` has more columns than rows.
    /// * `DegenerateInput` if a column is (numerically) in the span of the
    ///   preceding columns, or the input holds non-finite values.
    ///
    /// # Examples
    ///
    /// ```
    /// use qr_pca::{Matrix, QrDecomposition};
    /// let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    /// let qr = QrDecomposition::decompose(&a).unwrap();
    /// let back = qr.q().matmul(qr.r()).unwrap();
    /// assert!(back.approx_eq(&a, 1e-12));
    /// ```
    pub fn decompose(a: &Matrix) -> Result<Self, PcaError> {
        gram_schmidt(a, DegeneratePivot::Reject)
    }

    /// Factors `a`, replacing dependent columns of `Q` with an orthonormal
    /// completion and putting `0` on the matching diagonal entry of `R`.
    ///
    /// # Errors
    /// `DimensionMismatch` if `a` has more columns than rows, `DegenerateInput`
    /// on non-finite input.
    pub fn decompose_completing(a: &Matrix) -> Result<Self, PcaError> {
        gram_schmidt(a, DegeneratePivot::Complete)
    }

    pub fn q(&self) -> &Matrix {
        &self.q
    }

    pub fn r(&self) -> &Matrix {
        &self.r
    }

    /// Indices of the columns whose pivot was degenerate and got completed.
    pub fn degenerate_columns(&self) -> &[usize] {
        &self.degenerate_columns
    }

    pub fn into_parts(self) -> (Matrix, Matrix) {
        (self.q, self.r)
    }
}

fn gram_schmidt(a: &Matrix, policy: DegeneratePivot) -> Result<QrDecomposition, PcaError> {
    let (m, n) = a.shape();
    if n > m {
        return Err(PcaError::mismatch("QR decomposition", (m, m), (m, n)));
    }

    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut r = Matrix::zeros(n, n);
    let mut degenerate_columns = Vec::new();
    let scale = (0..n).map(|j| norm(&a.column(j))).fold(0.0, f64::max);

    for i in 0..n {
        let mut u = a.column(i);
        for _ in 0..REORTHOGONALIZATION_PASSES {
            let coefs: Vec<f64> = basis.iter().map(|e_j| dot(&u, e_j)).collect();
            for (j, (e_j, coef)) in basis.iter().zip(&coefs).enumerate() {
                r[(j, i)] += coef;
                for (u_k, e_k) in u.iter_mut().zip(e_j) {
                    *u_k -= coef * e_k;
                }
            }
        }

        let u_norm = norm(&u);
        if !u_norm.is_finite() {
            return Err(PcaError::degenerate(format!(
                "column {} of the QR input contains non-finite values",
                i
            )));
        }
        if u_norm <= DEGENERACY_TOLERANCE * scale {
            match policy {
                DegeneratePivot::Reject => {
                    return Err(PcaError::degenerate(format!(
                        "column {} is linearly dependent on the preceding columns (residual norm {:e})",
                        i, u_norm
                    )));
                }
                DegeneratePivot::Complete => {
                    trace!(
                        "Gram-Schmidt pivot {} degenerate (residual norm {:e}); completing basis.",
                        i,
                        u_norm
                    );
                    r[(i, i)] = 0.0;
                    basis.push(orthogonal_completion(&basis, m));
                    degenerate_columns.push(i);
                    continue;
                }
            }
        }

        r[(i, i)] = u_norm;
        basis.push(u.iter().map(|v| v / u_norm).collect());
    }

    let mut q = Matrix::zeros(m, n);
    for (j, e_j) in basis.iter().enumerate() {
        q.set_column(j, e_j);
    }

    Ok(QrDecomposition {
        q,
        r,
        degenerate_columns,
    })
}

/// Unit vector of length `m` orthogonal to every vector in `basis`.
///
/// Requires `basis.len() < m` and `basis` orthonormal. Projects each standard
/// basis vector out of the span twice and keeps the one with the largest
/// residual.
fn orthogonal_completion(basis: &[Vec<f64>], m: usize) -> Vec<f64> {
    let mut best = vec![0.0; m];
    let mut best_norm = 0.0;
    for k in 0..m {
        let mut v = vec![0.0; m];
        v[k] = 1.0;
        for _ in 0..2 {
            for e in basis {
                let coef = dot(&v, e);
                for (v_i, e_i) in v.iter_mut().zip(e) {
                    *v_i -= coef * e_i;
                }
            }
        }
        let v_norm = norm(&v);
        if v_norm > best_norm {
            best_norm = v_norm;
            best = v;
        }
    }
    best.iter().map(|v| v / best_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn assert_orthonormal_columns(q: &Matrix, tol: f64) {
        let gram = q.transpose().matmul(q).unwrap();
        assert!(
            gram.approx_eq(&Matrix::identity(q.cols()), tol),
            "QᵀQ is not the identity: {:?}",
            gram
        );
    }

    fn assert_upper_triangular(r: &Matrix) {
        for i in 0..r.rows() {
            for j in 0..i {
                assert_eq!(r[(i, j)], 0.0, "R[{}, {}] should be zero", i, j);
            }
        }
    }

    #[test]
    fn test_qr_decomp_2x2() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();

        let qr = QrDecomposition::decompose(&a).unwrap();

        let expected_q = Matrix::from_rows(&[vec![0.316, 0.949], vec![0.949, -0.316]]).unwrap();
        let expected_r = Matrix::from_rows(&[vec![3.162, 4.427], vec![0.0, 0.632]]).unwrap();
        assert!(qr.q().approx_eq(&expected_q, 1e-3));
        assert!(qr.r().approx_eq(&expected_r, 1e-3));
        assert!(qr.degenerate_columns().is_empty());
    }

    #[test]
    fn test_qr_reconstructs_tall_matrix() {
        let a = Matrix::from_rows(&[
            vec![12.0, -51.0, 4.0],
            vec![6.0, 167.0, -68.0],
            vec![-4.0, 24.0, -41.0],
            vec![1.0, 1.0, 1.0],
        ])
        .unwrap();

        let qr = QrDecomposition::decompose(&a).unwrap();

        assert_eq!(qr.q().shape(), (4, 3));
        assert_eq!(qr.r().shape(), (3, 3));
        assert_orthonormal_columns(qr.q(), 1e-10);
        assert_upper_triangular(qr.r());
        for i in 0..3 {
            assert!(qr.r()[(i, i)] > 0.0);
        }
        let back = qr.q().matmul(qr.r()).unwrap();
        assert!(back.approx_eq(&a, 1e-9));
    }

    #[test]
    fn test_qr_stays_orthonormal_for_ill_conditioned_input() {
        // Columns agree to about 1e-7, so the condition number is near 1e7.
        let eps = 1e-7;
        let a = Matrix::from_rows(&[
            vec![1.0, 1.0, 1.0],
            vec![eps, 0.0, 0.0],
            vec![0.0, eps, 0.0],
            vec![0.0, 0.0, eps],
        ])
        .unwrap();

        let qr = QrDecomposition::decompose(&a).unwrap();

        assert_orthonormal_columns(qr.q(), 1e-10);
        assert_upper_triangular(qr.r());
        let back = qr.q().matmul(qr.r()).unwrap();
        assert!(back.approx_eq(&a, 1e-12));
    }

    #[test]
    fn test_qr_rejects_dependent_column() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();

        let err = QrDecomposition::decompose(&a).unwrap_err();
        assert!(matches!(err, PcaError::DegenerateInput(_)));
    }

    #[test]
    fn test_qr_completes_dependent_column() {
        let a = Matrix::from_rows(&[
            vec![1.0, 2.0, 0.0],
            vec![2.0, 4.0, 1.0],
            vec![3.0, 6.0, 5.0],
        ])
        .unwrap();

        let qr = QrDecomposition::decompose_completing(&a).unwrap();

        assert_eq!(qr.degenerate_columns(), &[1]);
        assert_eq!(qr.r()[(1, 1)], 0.0);
        assert_orthonormal_columns(qr.q(), 1e-10);
        assert_upper_triangular(qr.r());
        let back = qr.q().matmul(qr.r()).unwrap();
        assert!(back.approx_eq(&a, 1e-9));
    }

    #[test]
    fn test_qr_completes_zero_leading_column() {
        let a = Matrix::from_rows(&[vec![0.0, 1.0], vec![0.0, 1.0]]).unwrap();

        let (q, r) = QrDecomposition::decompose_completing(&a).unwrap().into_parts();

        assert_orthonormal_columns(&q, 1e-12);
        assert_abs_diff_eq!(r[(0, 0)], 0.0);
        assert!(q.matmul(&r).unwrap().approx_eq(&a, 1e-12));
    }

    #[test]
    fn test_qr_rejects_wide_matrix() {
        let a = Matrix::zeros(2, 3);
        assert!(matches!(
            QrDecomposition::decompose(&a),
            Err(PcaError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_qr_rejects_non_finite() {
        let a = Matrix::from_rows(&[vec![f64::NAN, 1.0], vec![0.0, 1.0]]).unwrap();
        assert!(matches!(
            QrDecomposition::decompose_completing(&a),
            Err(PcaError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_qr_empty_matrix() {
        let qr = QrDecomposition::decompose(&Matrix::zeros(0, 0)).unwrap();
        assert_eq!(qr.q().shape(), (0, 0));
        assert_eq!(qr.r().shape(), (0, 0));
    }
}
