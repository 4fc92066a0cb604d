// src/matrix.rs

//! Dense, row-major `f64` matrix used by the decomposition and PCA routines.

use std::ops::{Add, Div, Index, IndexMut, Mul, Sub};

use float_cmp::approx_eq;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PcaError;

/// A dense matrix with a fixed shape and row-major storage.
///
/// Element `(r, c)` lives at offset `r * cols + c`. Arithmetic never mutates its
/// operands; every operation allocates a fresh matrix.
///
/// Deserialization goes through [`Matrix::new`], so a decoded matrix always has
/// `rows * cols` elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    elements: Vec<f64>,
}

/// Unchecked wire form of [`Matrix`]; field order matches its `Serialize` output.
#[derive(Deserialize)]
struct RawMatrix {
    rows: usize,
    cols: usize,
    elements: Vec<f64>,
}

impl TryFrom<RawMatrix> for Matrix {
    type Error = PcaError;

    fn try_from(raw: RawMatrix) -> Result<Self, PcaError> {
        Matrix::new(raw.elements, raw.rows, raw.cols)
    }
}

impl Matrix {
    /// Wraps row-major `elements` as a `rows x cols` matrix.
    ///
    /// # Errors
    /// `DimensionMismatch` if `elements.len() != rows * cols`.
    pub fn new(elements: Vec<f64>, rows: usize, cols: usize) -> Result<Self, PcaError> {
        if elements.len() != rows * cols {
            return Err(PcaError::mismatch(
                "Matrix::new",
                (rows, cols),
                (elements.len(), 1),
            ));
        }
        Ok(Self {
            rows,
            cols,
            elements,
        })
    }

    /// A `rows x cols` matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            elements: vec![0.0; rows * cols],
        }
    }

    /// The `n x n` identity.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.elements[i * n + i] = 1.0;
        }
        m
    }

    /// Builds a matrix from rows of equal length.
    ///
    /// An empty slice yields a `0 x 0` matrix.
    ///
    /// # Errors
    /// `DimensionMismatch` if any row length differs from the first row's.
    ///
    /// # Examples
    ///
    /// ```
    /// use qr_pca::Matrix;
    /// let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    /// assert_eq!(m[(1, 0)], 3.0);
    /// ```
    pub fn from_rows<R: AsRef<[f64]>>(data: &[R]) -> Result<Self, PcaError> {
        let rows = data.len();
        let cols = data.first().map_or(0, |r| r.as_ref().len());
        let mut elements = Vec::with_capacity(rows * cols);
        for (i, row) in data.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(PcaError::mismatch("Matrix::from_rows", (i, cols), (i, row.len())));
            }
            elements.extend_from_slice(row);
        }
        Ok(Self {
            rows,
            cols,
            elements,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major view of the elements.
    pub fn as_slice(&self) -> &[f64] {
        &self.elements
    }

    /// Element `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.elements[row * self.cols + col])
        } else {
            None
        }
    }

    /// Overwrites element `(row, col)`.
    ///
    /// # Errors
    /// `DimensionMismatch` when the index is out of bounds.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), PcaError> {
        if row >= self.rows || col >= self.cols {
            return Err(PcaError::mismatch("Matrix::set", self.shape(), (row, col)));
        }
        self.elements[row * self.cols + col] = value;
        Ok(())
    }

    /// Copy of column `c`. Panics if `c >= cols`, like slice indexing.
    pub fn column(&self, c: usize) -> Vec<f64> {
        assert!(c < self.cols, "column index {} out of bounds ({} columns)", c, self.cols);
        self.elements
            .iter()
            .skip(c)
            .step_by(self.cols)
            .copied()
            .collect()
    }

    /// Copy of row `r`. Panics if `r >= rows`.
    pub fn row(&self, r: usize) -> Vec<f64> {
        self.elements[r * self.cols..(r + 1) * self.cols].to_vec()
    }

    pub(crate) fn set_column(&mut self, c: usize, values: &[f64]) {
        for (r, v) in values.iter().enumerate() {
            self.elements[r * self.cols + c] = *v;
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|r| self.row(r)).collect()
    }

    pub fn transpose(&self) -> Matrix {
        let mut elements = Vec::with_capacity(self.elements.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                elements.push(self.elements[r * self.cols + c]);
            }
        }
        Matrix {
            rows: self.cols,
            cols: self.rows,
            elements,
        }
    }

    /// Matrix product `self * rhs`.
    ///
    /// Output rows are filled in parallel; each entry is still a sequential
    /// sum over `k`, so the result does not depend on the thread count.
    ///
    /// # Errors
    /// `DimensionMismatch` if `self.cols() != rhs.rows()`.
    pub fn matmul(&self, rhs: &Matrix) -> Result<Matrix, PcaError> {
        if self.cols != rhs.rows {
            return Err(PcaError::mismatch(
                "matrix multiply",
                (self.cols, rhs.cols),
                rhs.shape(),
            ));
        }
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        if out.elements.is_empty() {
            return Ok(out);
        }
        out.elements
            .par_chunks_mut(rhs.cols)
            .enumerate()
            .for_each(|(i, out_row)| {
                let lhs_row = &self.elements[i * self.cols..(i + 1) * self.cols];
                for (j, out_val) in out_row.iter_mut().enumerate() {
                    let mut sum = 0.0;
                    for (k, a) in lhs_row.iter().enumerate() {
                        sum += a * rhs.elements[k * rhs.cols + j];
                    }
                    *out_val = sum;
                }
            });
        Ok(out)
    }

    pub fn div_scalar(&self, scalar: f64) -> Matrix {
        self.map(|v| v / scalar)
    }

    /// Element-wise `self - rhs`.
    ///
    /// # Errors
    /// `DimensionMismatch` unless both shapes are identical.
    pub fn sub(&self, rhs: &Matrix) -> Result<Matrix, PcaError> {
        self.zip_with(rhs, "matrix subtract", |a, b| a - b)
    }

    /// Element-wise `self + rhs`.
    pub fn add(&self, rhs: &Matrix) -> Result<Matrix, PcaError> {
        self.zip_with(rhs, "matrix add", |a, b| a + b)
    }

    /// Subtracts `row` from every row. `row.len()` must equal `cols`.
    pub fn sub_row_broadcast(&self, row: &[f64]) -> Result<Matrix, PcaError> {
        self.sub(&Self::broadcast_row(row, self.rows))
    }

    /// Adds `row` to every row. `row.len()` must equal `cols`.
    pub fn add_row_broadcast(&self, row: &[f64]) -> Result<Matrix, PcaError> {
        self.add(&Self::broadcast_row(row, self.rows))
    }

    fn broadcast_row(row: &[f64], rows: usize) -> Matrix {
        Matrix {
            rows,
            cols: row.len(),
            elements: row.repeat(rows),
        }
    }

    /// Per-column arithmetic mean. Empty for a matrix without rows.
    pub fn column_means(&self) -> Vec<f64> {
        if self.rows == 0 {
            return Vec::new();
        }
        let mut sums = vec![0.0; self.cols];
        for row in self.elements.chunks(self.cols.max(1)) {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        sums.iter().map(|s| s / self.rows as f64).collect()
    }

    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols))
            .map(|i| self.elements[i * self.cols + i])
            .collect()
    }

    /// Largest `|a_ij|` with `i != j`; `0.0` for matrices without off-diagonal entries.
    pub fn max_abs_off_diagonal(&self) -> f64 {
        let mut max: f64 = 0.0;
        for r in 0..self.rows {
            for c in 0..self.cols {
                if r != c {
                    max = max.max(self.elements[r * self.cols + c].abs());
                }
            }
        }
        max
    }

    pub fn is_finite(&self) -> bool {
        self.elements.iter().all(|v| v.is_finite())
    }

    /// Shape equality plus element-wise closeness within `epsilon`.
    pub fn approx_eq(&self, other: &Matrix, epsilon: f64) -> bool {
        self.shape() == other.shape()
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| approx_eq!(f64, *a, *b, epsilon = epsilon))
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            elements: self.elements.iter().map(|v| f(*v)).collect(),
        }
    }

    pub fn to_array2(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.rows, self.cols), |(r, c)| {
            self.elements[r * self.cols + c]
        })
    }

    fn zip_with<F: Fn(f64, f64) -> f64>(
        &self,
        rhs: &Matrix,
        operation: &'static str,
        f: F,
    ) -> Result<Matrix, PcaError> {
        if self.shape() != rhs.shape() {
            return Err(PcaError::mismatch(operation, self.shape(), rhs.shape()));
        }
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            elements: self
                .elements
                .iter()
                .zip(&rhs.elements)
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        assert!(r < self.rows && c < self.cols, "index ({}, {}) out of bounds for {}x{} matrix", r, c, self.rows, self.cols);
        &self.elements[r * self.cols + c]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        assert!(r < self.rows && c < self.cols, "index ({}, {}) out of bounds for {}x{} matrix", r, c, self.rows, self.cols);
        &mut self.elements[r * self.cols + c]
    }
}

impl Mul<&Matrix> for &Matrix {
    type Output = Result<Matrix, PcaError>;

    fn mul(self, rhs: &Matrix) -> Self::Output {
        self.matmul(rhs)
    }
}

impl Sub<&Matrix> for &Matrix {
    type Output = Result<Matrix, PcaError>;

    fn sub(self, rhs: &Matrix) -> Self::Output {
        Matrix::sub(self, rhs)
    }
}

impl Add<&Matrix> for &Matrix {
    type Output = Result<Matrix, PcaError>;

    fn add(self, rhs: &Matrix) -> Self::Output {
        Matrix::add(self, rhs)
    }
}

impl Div<f64> for &Matrix {
    type Output = Matrix;

    fn div(self, scalar: f64) -> Matrix {
        self.div_scalar(scalar)
    }
}

impl From<&Array2<f64>> for Matrix {
    fn from(array: &Array2<f64>) -> Self {
        let (rows, cols) = array.dim();
        Matrix {
            rows,
            cols,
            elements: array.iter().copied().collect(),
        }
    }
}

impl From<Array2<f64>> for Matrix {
    fn from(array: Array2<f64>) -> Self {
        Matrix::from(&array)
    }
}

pub(crate) fn dot(u: &[f64], v: &[f64]) -> f64 {
    u.iter().zip(v).fold(0.0, |acc, (a, b)| acc + a * b)
}

pub(crate) fn norm(u: &[f64]) -> f64 {
    dot(u, u).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_matrix_new_size_mismatch() {
        let err = Matrix::new(vec![1.0, 2.0, 3.0], 2, 2).unwrap_err();
        assert!(matches!(err, PcaError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_from_rows_rejects_ragged_input() {
        let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            PcaError::DimensionMismatch {
                operation: "Matrix::from_rows",
                expected: (1, 2),
                found: (1, 1),
            }
        );
    }

    #[test]
    fn test_from_rows_empty() {
        let m = Matrix::from_rows::<Vec<f64>>(&[]).unwrap();
        assert_eq!(m.shape(), (0, 0));
    }

    #[test]
    fn test_identity() {
        let expected = Matrix::new(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], 3, 3).unwrap();
        assert_eq!(Matrix::identity(3), expected);
    }

    #[test]
    fn test_get_set_and_index() {
        let mut m = Matrix::zeros(2, 3);
        m.set(1, 2, 7.5).unwrap();
        m[(0, 1)] = -1.0;
        assert_eq!(m.get(1, 2), Some(7.5));
        assert_eq!(m[(0, 1)], -1.0);
        assert_eq!(m.get(2, 0), None);
        assert!(m.set(0, 3, 1.0).is_err());
    }

    #[test]
    #[should_panic]
    fn test_index_out_of_bounds_panics() {
        let m = Matrix::zeros(2, 2);
        let _ = m[(0, 2)];
    }

    #[test]
    fn test_multiply_square_matrix() {
        let a = Matrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], 3, 3).unwrap();
        let b = Matrix::new(
            vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0],
            3,
            3,
        )
        .unwrap();

        let result = (&a * &b).unwrap();

        let expected = Matrix::new(
            vec![84.0, 90.0, 96.0, 201.0, 216.0, 231.0, 318.0, 342.0, 366.0],
            3,
            3,
        )
        .unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_multiply_rectangular_and_mismatch() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        assert_eq!((&a * &b).unwrap(), Matrix::new(vec![6.0], 1, 1).unwrap());
        assert_eq!((&b * &a).unwrap().shape(), (3, 3));

        let err = a.matmul(&a).unwrap_err();
        assert_eq!(
            err,
            PcaError::DimensionMismatch {
                operation: "matrix multiply",
                expected: (3, 3),
                found: (1, 3),
            }
        );
    }

    #[test]
    fn test_multiply_with_empty_inner_dimension() {
        let a = Matrix::zeros(2, 0);
        let b = Matrix::zeros(0, 3);
        assert_eq!(a.matmul(&b).unwrap(), Matrix::zeros(2, 3));
        assert_eq!(b.transpose().matmul(&a.transpose()).unwrap().shape(), (3, 2));
    }

    #[test]
    fn test_transpose() {
        let a = Matrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2).unwrap();
        let expected = Matrix::new(vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0], 2, 3).unwrap();
        assert_eq!(a.transpose(), expected);
        assert_eq!(a.transpose().transpose(), a);
    }

    #[test]
    fn test_sub_div_leave_operands_untouched() {
        let a = Matrix::from_rows(&[vec![4.0, 6.0], vec![8.0, 10.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![1.0, 1.0], vec![2.0, 2.0]]).unwrap();
        let a_before = a.clone();

        assert_eq!((&a - &b).unwrap(), Matrix::from_rows(&[vec![3.0, 5.0], vec![6.0, 8.0]]).unwrap());
        assert_eq!(&a / 2.0, Matrix::from_rows(&[vec![2.0, 3.0], vec![4.0, 5.0]]).unwrap());
        assert_eq!(a, a_before);

        let c = Matrix::zeros(2, 3);
        assert!(matches!((&a - &c), Err(PcaError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_row_and_column_extraction() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(a.row(1), vec![4.0, 5.0, 6.0]);
        assert_eq!(a.column(2), vec![3.0, 6.0]);
        assert_eq!(a.to_rows(), vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_column_means_and_broadcast() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 9.0]]).unwrap();
        let means = a.column_means();
        assert_eq!(means, vec![3.0, 5.0]);

        let centered = a.sub_row_broadcast(&means).unwrap();
        assert_eq!(centered.column_means(), vec![0.0, 0.0]);
        assert_eq!(centered.add_row_broadcast(&means).unwrap(), a);
        assert!(a.sub_row_broadcast(&[1.0]).is_err());
    }

    #[test]
    fn test_max_abs_off_diagonal() {
        let a = Matrix::from_rows(&[vec![9.0, -0.5], vec![0.25, -9.0]]).unwrap();
        assert_eq!(a.max_abs_off_diagonal(), 0.5);
        assert_eq!(a.diagonal(), vec![9.0, -9.0]);
        assert_eq!(Matrix::identity(1).max_abs_off_diagonal(), 0.0);
    }

    #[test]
    fn test_ndarray_conversion() {
        let arr = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let m = Matrix::from(&arr);
        assert_eq!(m.shape(), (3, 2));
        assert_eq!(m[(2, 1)], 6.0);
        assert_eq!(m.to_array2(), arr);
    }

    #[test]
    fn test_deserialize_checks_element_count() {
        let config = bincode::config::standard();
        let good = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let bytes = bincode::serde::encode_to_vec(&good, config).unwrap();
        let (decoded, _): (Matrix, usize) =
            bincode::serde::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(decoded, good);

        let short = Matrix {
            rows: 2,
            cols: 2,
            elements: vec![1.0],
        };
        let bytes = bincode::serde::encode_to_vec(&short, config).unwrap();
        let decoded: Result<(Matrix, usize), _> = bincode::serde::decode_from_slice(&bytes, config);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_approx_eq() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let b = Matrix::from_rows(&[vec![1.0 + 1e-9, 2.0 - 1e-9]]).unwrap();
        assert!(a.approx_eq(&b, 1e-8));
        assert!(!a.approx_eq(&b, 1e-10));
        assert!(!a.approx_eq(&a.transpose(), 1.0));
    }
}
