// Principal component analysis (PCA)

use log::{debug, info};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::PcaError;
use crate::linalg_backends::{EigenPair, QrEigenSolver, SymmetricEigenSolver};
use crate::matrix::{norm, Matrix};

/// A feature whose variance is at most this fraction of the largest feature
/// variance is treated as constant.
const CONSTANT_FEATURE_TOLERANCE: f64 = 1e-12;

/// A fitted principal component analysis model.
///
/// Holds everything needed to project data onto the principal axes and back:
/// the per-feature mean used for centering, the component basis, and the
/// variance explained by each retained component. The model is immutable once
/// built; it can be saved to and loaded from disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PcaModel {
    /// Principal axes as columns, sorted by descending explained variance.
    /// Shape: (n_features, n_components)
    components: Matrix,
    /// Mean vector of the training data.
    /// Shape: (n_features)
    mean: Vec<f64>,
    /// Eigenvalues of the sample covariance matrix for the retained components.
    /// Shape: (n_components)
    explained_variance: Vec<f64>,
    /// `explained_variance` divided by its own sum. Relative to the retained
    /// components only, so it always sums to one.
    /// Shape: (n_components)
    explained_variance_ratio: Vec<f64>,
}

impl PcaModel {
    /// Fits a model keeping `n_components` principal axes, using the QR
    /// iteration eigensolver with its default configuration.
    ///
    /// * `data` - Rows of observations, shape (n_samples, n_features). Every
    ///            row must have the same length.
    /// * `n_components` - Number of axes to keep, between 1 and n_features.
    ///
    /// # Errors
    /// * `DimensionMismatch` if the rows are ragged.
    /// * `InvalidComponentCount` if `n_components` is 0 or exceeds n_features.
    /// * `DegenerateInput` for fewer than 2 samples, zero features, non-finite
    ///   values, or a (near-)constant feature.
    ///
    /// # Examples
    ///
    /// ```
    /// use qr_pca::PcaModel;
    ///
    /// let data = vec![
    ///     vec![2.5, 2.4],
    ///     vec![0.5, 0.7],
    ///     vec![2.2, 2.9],
    ///     vec![1.9, 2.2],
    /// ];
    /// let model = PcaModel::fit(&data, 1).unwrap();
    /// assert_eq!(model.components().shape(), (2, 1));
    /// ```
    pub fn fit<R: AsRef<[f64]>>(data: &[R], n_components: usize) -> Result<Self, PcaError> {
        Self::fit_with_solver(data, n_components, &QrEigenSolver::default())
    }

    /// Like [`PcaModel::fit`], but with a caller-supplied eigensolver backend.
    pub fn fit_with_solver<R, S>(
        data: &[R],
        n_components: usize,
        solver: &S,
    ) -> Result<Self, PcaError>
    where
        R: AsRef<[f64]>,
        S: SymmetricEigenSolver + ?Sized,
    {
        let data_matrix = Matrix::from_rows(data)?;
        Self::fit_matrix(&data_matrix, n_components, solver)
    }

    /// Fits on data already held in a [`Matrix`], shape (n_samples, n_features).
    pub fn fit_matrix<S>(
        data_matrix: &Matrix,
        n_components: usize,
        solver: &S,
    ) -> Result<Self, PcaError>
    where
        S: SymmetricEigenSolver + ?Sized,
    {
        let (n_samples, n_features) = data_matrix.shape();

        if n_samples < 2 {
            return Err(PcaError::degenerate(format!(
                "PCA needs at least 2 samples, got {}",
                n_samples
            )));
        }
        if n_features == 0 {
            return Err(PcaError::degenerate("input data has zero features"));
        }
        if n_components == 0 || n_components > n_features {
            return Err(PcaError::InvalidComponentCount {
                requested: n_components,
                n_features,
            });
        }
        if !data_matrix.is_finite() {
            return Err(PcaError::degenerate(
                "input data contains non-finite (NaN or infinite) values",
            ));
        }
        debug!(
            "Fitting PCA on {} samples x {} features, keeping {} components.",
            n_samples, n_features, n_components
        );

        let mean = data_matrix.column_means();
        let centered = data_matrix.sub_row_broadcast(&mean)?;
        let covariance = centered
            .transpose()
            .matmul(&centered)?
            .div_scalar((n_samples - 1) as f64);
        check_feature_variances(&covariance)?;
        debug!("Built {}x{} covariance matrix.", n_features, n_features);

        let decomposition = solver.solve(&covariance)?;
        if decomposition.eigenvalues.len() != n_features
            || decomposition.eigenvectors.shape() != (n_features, n_features)
        {
            return Err(PcaError::mismatch(
                "eigensolver output",
                (n_features, n_features),
                decomposition.eigenvectors.shape(),
            ));
        }
        debug!(
            "Eigensolver finished after {} iterations (residual {:e}).",
            decomposition.iterations, decomposition.residual
        );

        let mut pairs = decomposition.into_pairs();
        sort_eigenpairs_descending(&mut pairs);

        let mut components = Matrix::zeros(n_features, n_components);
        let mut explained_variance = Vec::with_capacity(n_components);
        for (j, pair) in pairs.iter().take(n_components).enumerate() {
            // So that each column is unit length, whatever the backend returned
            let length = norm(&pair.vector);
            if length > 1e-12 {
                let unit: Vec<f64> = pair.vector.iter().map(|v| v / length).collect();
                components.set_column(j, &unit);
            } else {
                components.set_column(j, &pair.vector);
            }
            // Covariance is PSD; negative values are round-off
            explained_variance.push(pair.value.max(0.0));
        }
        normalize_component_signs(&mut components);

        let model = Self::from_parts(components, mean, explained_variance)?;
        info!(
            "PCA fitted: {} of {} components retained, total retained variance {:.6e}.",
            n_components,
            n_features,
            model.explained_variance.iter().sum::<f64>()
        );
        Ok(model)
    }

    /// Fits on an `ndarray` matrix, shape (n_samples, n_features).
    pub fn fit_array(data: &Array2<f64>, n_components: usize) -> Result<Self, PcaError> {
        Self::fit_matrix(&Matrix::from(data), n_components, &QrEigenSolver::default())
    }

    /// Fits the model and projects the same data in one call.
    ///
    /// Returns the projected rows, shape (n_samples, n_components), together
    /// with the fitted model.
    pub fn fit_transform<R: AsRef<[f64]>>(
        data: &[R],
        n_components: usize,
    ) -> Result<(Vec<Vec<f64>>, Self), PcaError> {
        let model = Self::fit(data, n_components)?;
        let transformed = model.transform(data)?;
        Ok((transformed, model))
    }

    /// Rebuilds a model from precomputed parts.
    ///
    /// The explained variance ratio is derived from `explained_variance`.
    ///
    /// * `components` - Principal axes as columns, shape (n_features, n_components).
    /// * `mean` - Feature means, shape (n_features).
    /// * `explained_variance` - One non-negative variance per component.
    ///
    /// # Errors
    /// `DimensionMismatch` for inconsistent shapes, `InvalidComponentCount` for
    /// an empty or over-wide basis, `DegenerateInput` for non-finite values,
    /// negative variances, or variances summing to zero.
    pub fn from_parts(
        components: Matrix,
        mean: Vec<f64>,
        explained_variance: Vec<f64>,
    ) -> Result<Self, PcaError> {
        let (n_features, n_components) = components.shape();
        if mean.len() != n_features {
            return Err(PcaError::mismatch(
                "PCA model mean",
                (n_features, 1),
                (mean.len(), 1),
            ));
        }
        if n_components == 0 || n_components > n_features {
            return Err(PcaError::InvalidComponentCount {
                requested: n_components,
                n_features,
            });
        }
        if explained_variance.len() != n_components {
            return Err(PcaError::mismatch(
                "PCA model explained variance",
                (n_components, 1),
                (explained_variance.len(), 1),
            ));
        }
        if !components.is_finite() || mean.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::degenerate(
                "PCA model components or mean contain non-finite values",
            ));
        }
        if explained_variance
            .iter()
            .any(|&v| !v.is_finite() || v < 0.0)
        {
            return Err(PcaError::degenerate(
                "explained variance contains non-finite or negative values",
            ));
        }

        let total: f64 = explained_variance.iter().sum();
        if total <= 0.0 {
            return Err(PcaError::degenerate(
                "retained components explain zero variance",
            ));
        }
        let explained_variance_ratio = explained_variance.iter().map(|v| v / total).collect();

        Ok(Self {
            components,
            mean,
            explained_variance,
            explained_variance_ratio,
        })
    }

    /// Principal axes as columns, shape (n_features, n_components).
    pub fn components(&self) -> &Matrix {
        &self.components
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Variance along each component, largest first.
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    pub fn explained_variance_ratio(&self) -> &[f64] {
        &self.explained_variance_ratio
    }

    pub fn n_features(&self) -> usize {
        self.components.rows()
    }

    pub fn n_components(&self) -> usize {
        self.components.cols()
    }

    /// Projects rows onto the principal axes.
    ///
    /// * `data` - Rows of shape (m_samples, n_features). An empty slice yields
    ///            an empty result.
    ///
    /// # Errors
    /// `DimensionMismatch` if the rows are ragged or their length differs
    /// from the model's feature count.
    pub fn transform<R: AsRef<[f64]>>(&self, data: &[R]) -> Result<Vec<Vec<f64>>, PcaError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.transform_matrix(&Matrix::from_rows(data)?)?.to_rows())
    }

    /// [`PcaModel::transform`] on a [`Matrix`]; returns (m_samples, n_components).
    pub fn transform_matrix(&self, data: &Matrix) -> Result<Matrix, PcaError> {
        if data.rows() == 0 {
            return Ok(Matrix::zeros(0, self.n_components()));
        }
        if data.cols() != self.n_features() {
            return Err(PcaError::mismatch(
                "PCA transform",
                (data.rows(), self.n_features()),
                data.shape(),
            ));
        }
        data.sub_row_broadcast(&self.mean)?.matmul(&self.components)
    }

    pub fn transform_array(&self, data: &Array2<f64>) -> Result<Array2<f64>, PcaError> {
        Ok(self.transform_matrix(&Matrix::from(data))?.to_array2())
    }

    /// Maps projected rows back to feature space.
    ///
    /// Exact (up to round-off) when every component was kept; otherwise the
    /// result is the closest point in the retained subspace.
    ///
    /// # Errors
    /// `DimensionMismatch` if the rows are ragged or their length differs from
    /// the model's component count.
    pub fn inverse_transform<R: AsRef<[f64]>>(
        &self,
        data: &[R],
    ) -> Result<Vec<Vec<f64>>, PcaError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .inverse_transform_matrix(&Matrix::from_rows(data)?)?
            .to_rows())
    }

    /// [`PcaModel::inverse_transform`] on a [`Matrix`]; returns (m_samples, n_features).
    pub fn inverse_transform_matrix(&self, data: &Matrix) -> Result<Matrix, PcaError> {
        if data.rows() == 0 {
            return Ok(Matrix::zeros(0, self.n_features()));
        }
        if data.cols() != self.n_components() {
            return Err(PcaError::mismatch(
                "PCA inverse transform",
                (data.rows(), self.n_components()),
                data.shape(),
            ));
        }
        data.matmul(&self.components.transpose())?
            .add_row_broadcast(&self.mean)
    }

    pub fn inverse_transform_array(&self, data: &Array2<f64>) -> Result<Array2<f64>, PcaError> {
        Ok(self.inverse_transform_matrix(&Matrix::from(data))?.to_array2())
    }

    /// Saves the model to a file using bincode.
    ///
    /// # Errors
    /// Returns an error if file I/O or serialization fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn Error>> {
        let file = File::create(path.as_ref())
            .map_err(|e| format!("Failed to create file at {:?}: {}", path.as_ref(), e))?;
        let mut writer = BufWriter::new(file);

        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| format!("Failed to serialize PCA model: {}", e))?;
        Ok(())
    }

    /// Loads a model previously written by [`PcaModel::save_model`].
    ///
    /// The loaded parts go through the same validation as
    /// [`PcaModel::from_parts`] and the variance ratio is recomputed.
    ///
    /// # Errors
    /// Returns an error if file I/O or deserialization fails, or if the stored
    /// model is internally inconsistent.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let file = File::open(path.as_ref())
            .map_err(|e| format!("Failed to open file at {:?}: {}", path.as_ref(), e))?;
        let mut reader = BufReader::new(file);

        let stored: PcaModel =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| format!("Failed to deserialize PCA model: {}", e))?;

        let model = Self::from_parts(stored.components, stored.mean, stored.explained_variance)?;
        Ok(model)
    }
}

/// Orders eigenpairs by descending eigenvalue.
///
/// The sort is stable, so equal eigenvalues keep the order the solver
/// produced them in.
pub fn sort_eigenpairs_descending(pairs: &mut [EigenPair]) {
    pairs.sort_by(|a, b| b.value.total_cmp(&a.value));
}

/// Fixes the sign of every column so that its entry of largest magnitude is
/// non-negative. On ties the first such entry decides.
///
/// Eigenvectors are only defined up to sign; this makes the basis
/// reproducible regardless of which backend produced it.
pub fn normalize_component_signs(components: &mut Matrix) {
    for c in 0..components.cols() {
        let column = components.column(c);
        let mut pivot: f64 = 0.0;
        for v in &column {
            if v.abs() > pivot.abs() {
                pivot = *v;
            }
        }
        if pivot < 0.0 {
            let flipped: Vec<f64> = column.iter().map(|v| -v).collect();
            components.set_column(c, &flipped);
        }
    }
}

fn check_feature_variances(covariance: &Matrix) -> Result<(), PcaError> {
    let variances = covariance.diagonal();
    let largest = variances.iter().cloned().fold(0.0, f64::max);
    let threshold = CONSTANT_FEATURE_TOLERANCE * largest;
    if let Some(c) = variances.iter().position(|&v| v <= threshold) {
        return Err(PcaError::degenerate(format!(
            "feature {} is constant (variance {:e})",
            c, variances[c]
        )));
    }
    Ok(())
}
