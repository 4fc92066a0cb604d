// Principal component analysis (PCA)

#![doc = include_str!("../README.md")]

pub mod error;
pub mod linalg_backends;
pub mod matrix;
pub mod pca;
pub mod qr;


pub use error::PcaError;
pub use linalg_backends::{
    EigenConfig, EigenDecomposition, EigenPair, QrEigenSolver, SymmetricEigenSolver,
};
pub use matrix::Matrix;
pub use pca::{normalize_component_signs, sort_eigenpairs_descending, PcaModel};
pub use qr::QrDecomposition;
