// src/linalg_backends.rs

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::PcaError;
use crate::matrix::Matrix;
use crate::qr::QrDecomposition;

// --- Trait Definitions ---

/// Output of a symmetric eigendecomposition.
///
/// Backends make no promise about ordering or sign: `eigenvalues[i]` belongs
/// to `eigenvectors.column(i)` and nothing more. Ordering and sign fixing are
/// done by the caller (see [`crate::sort_eigenpairs_descending`] and
/// [`crate::normalize_component_signs`]).
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues in whatever order the backend produced them.
    pub eigenvalues: Vec<f64>,
    /// Eigenvectors as columns of the matrix.
    pub eigenvectors: Matrix,
    /// Iterations spent by an iterative backend (0 for direct ones).
    pub iterations: usize,
    /// Largest absolute off-diagonal entry left in the final iterate.
    /// Compare against the requested tolerance to detect non-convergence.
    pub residual: f64,
}

/// A single eigenvalue with its eigenvector.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenPair {
    pub value: f64,
    pub vector: Vec<f64>,
}

impl EigenDecomposition {
    /// Splits the decomposition into unordered `(value, vector)` pairs.
    pub fn into_pairs(self) -> Vec<EigenPair> {
        self.eigenvalues
            .iter()
            .enumerate()
            .map(|(i, &value)| EigenPair {
                value,
                vector: self.eigenvectors.column(i),
            })
            .collect()
    }
}

/// Symmetric eigendecomposition backend.
///
/// Implementers may assume `matrix` is symmetric. Any backend (iterative,
/// LAPACK-backed, precomputed) can be handed to
/// [`crate::PcaModel::fit_with_solver`] without changes to the PCA code.
pub trait SymmetricEigenSolver {
    fn solve(&self, matrix: &Matrix) -> Result<EigenDecomposition, PcaError>;
}

// --- QR iteration backend ---

/// Stopping rule for [`QrEigenSolver`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EigenConfig {
    /// Hard cap on QR sweeps. Reaching it is not an error.
    pub max_iterations: usize,
    /// Iteration stops once every off-diagonal entry is below this value.
    pub tolerance: f64,
}

impl Default for EigenConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-10,
        }
    }
}

/// Unshifted QR algorithm: `A_{k+1} = R_k Q_k`, `V_{k+1} = V_k Q_k`.
///
/// For a symmetric input the iterates converge to a diagonal matrix whose
/// entries are the eigenvalues, and `V` accumulates the eigenvectors.
/// Convergence is linear in the ratio of neighbouring eigenvalue magnitudes, so
/// clustered spectra may use the whole iteration budget; the best estimate is
/// returned either way.
#[derive(Debug, Default, Clone, Copy)]
pub struct QrEigenSolver {
    config: EigenConfig,
}

impl QrEigenSolver {
    pub fn new(config: EigenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EigenConfig {
        &self.config
    }
}

impl SymmetricEigenSolver for QrEigenSolver {
    fn solve(&self, matrix: &Matrix) -> Result<EigenDecomposition, PcaError> {
        let (n, cols) = matrix.shape();
        if n != cols {
            return Err(PcaError::mismatch(
                "symmetric eigendecomposition",
                (n, n),
                (n, cols),
            ));
        }
        if !matrix.is_finite() {
            return Err(PcaError::degenerate(
                "eigensolver input contains non-finite values",
            ));
        }

        let mut a_k = matrix.clone();
        let mut v = Matrix::identity(n);
        let mut residual = a_k.max_abs_off_diagonal();
        let mut iterations = 0;

        while n > 0 && iterations < self.config.max_iterations {
            let (q, r) = QrDecomposition::decompose_completing(&a_k)?.into_parts();
            a_k = r.matmul(&q)?;
            v = v.matmul(&q)?;
            iterations += 1;

            residual = a_k.max_abs_off_diagonal();
            if residual < self.config.tolerance {
                break;
            }
        }

        if residual >= self.config.tolerance {
            warn!(
                "QR iteration stopped after {} iterations without converging (off-diagonal {:e} >= tolerance {:e}); returning best estimate.",
                iterations, residual, self.config.tolerance
            );
        } else {
            debug!(
                "QR iteration converged in {} iterations (off-diagonal {:e}).",
                iterations, residual
            );
        }

        Ok(EigenDecomposition {
            eigenvalues: a_k.diagonal(),
            eigenvectors: v,
            iterations,
            residual,
        })
    }
}
