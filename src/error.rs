// src/error.rs

use std::error::Error;
use std::fmt::Display;

/// Errors raised by the matrix, decomposition and PCA routines.
///
/// Every variant is a precondition violation detected synchronously; nothing here
/// is transient. Failing to converge inside the QR iteration is *not* an error,
/// see [`crate::EigenDecomposition::residual`].
#[derive(Debug, Clone, PartialEq)]
pub enum PcaError {
    /// Operand shapes are incompatible.
    DimensionMismatch {
        operation: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// Requested number of components is outside `[1, n_features]`.
    InvalidComponentCount { requested: usize, n_features: usize },
    /// Input that cannot produce a meaningful result (too few samples,
    /// a constant feature, a zero pivot, non-finite values, ...).
    DegenerateInput(String),
}

impl PcaError {
    pub(crate) fn mismatch(
        operation: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    ) -> Self {
        PcaError::DimensionMismatch {
            operation,
            expected,
            found,
        }
    }

    pub(crate) fn degenerate<S: Into<String>>(reason: S) -> Self {
        PcaError::DegenerateInput(reason.into())
    }
}

impl Display for PcaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcaError::DimensionMismatch {
                operation,
                expected,
                found,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}x{}, found {}x{}",
                operation, expected.0, expected.1, found.0, found.1
            ),
            PcaError::InvalidComponentCount {
                requested,
                n_features,
            } => write!(
                f,
                "Invalid component count {}: must be between 1 and the number of features ({})",
                requested, n_features
            ),
            PcaError::DegenerateInput(reason) => write!(f, "Degenerate input: {}", reason),
        }
    }
}

impl Error for PcaError {}
