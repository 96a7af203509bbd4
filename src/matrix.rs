//! Integer matrix and column vector containers.
//!
//! A [`Matrix`] owns each of its rows separately so that rows can be moved out one by one and
//! handed to the next rank without copying the rest of the matrix.

use std::fmt;

use rand::Rng;

use crate::error::{MatvecError, Result};

/// Size of the square matrix generated when no input file is given.
pub const DEFAULT_MATRIX_SIZE: usize = 8;
/// Inclusive lower bound of generated values.
pub const DEFAULT_LOWEST_VALUE: i32 = -10;
/// Exclusive upper bound of generated values.
pub const DEFAULT_HIGHEST_VALUE: i32 = 10;

/// A rectangular grid of integers stored as owned rows.
///
/// Every row has exactly `width` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: Vec<Vec<i32>>,
    width: usize,
}

impl Matrix {
    /// A `height` x `width` matrix filled with zeros.
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            rows: vec![vec![0; width]; height],
            width,
        }
    }

    /// Build a matrix from its rows, refusing rows of unequal length.
    pub fn from_rows(rows: Vec<Vec<i32>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
            return Err(MatvecError::ShapeMismatch(format!(
                "row {} has {} values but row 0 has {}",
                index,
                row.len(),
                width
            )));
        }
        Ok(Self { rows, width })
    }

    /// A `height` x `width` matrix of values drawn uniformly from `[lower, upper)`.
    pub fn random<R: Rng + ?Sized>(
        height: usize,
        width: usize,
        lower: i32,
        upper: i32,
        rng: &mut R,
    ) -> Result<Self> {
        check_bounds(lower, upper)?;
        let mut matrix = Self::zeros(height, width);
        for row in 0..height {
            for col in 0..width {
                matrix.set(row, col, rng.gen_range(lower..upper))?;
            }
        }
        Ok(matrix)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_square(&self) -> bool {
        self.height() == self.width
    }

    /// Read the value at (`row`, `col`).
    pub fn get(&self, row: usize, col: usize) -> Result<i32> {
        self.check_coords("read", row, col)?;
        Ok(self.rows[row][col])
    }

    /// Write `value` at (`row`, `col`).
    pub fn set(&mut self, row: usize, col: usize, value: i32) -> Result<()> {
        self.check_coords("write", row, col)?;
        self.rows[row][col] = value;
        Ok(())
    }

    pub fn row(&self, index: usize) -> Option<&[i32]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<i32>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<i32>> {
        self.rows
    }

    fn check_coords(&self, op: &'static str, row: usize, col: usize) -> Result<()> {
        if row >= self.height() || col >= self.width {
            return Err(MatvecError::OutOfBounds {
                op,
                row,
                col,
                height: self.height(),
                width: self.width,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.rows {
            write!(f, "[matrix printing] ")?;
            for value in row {
                write!(f, "{} ", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// The vector every matrix row is multiplied with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnVector(Vec<i32>);

impl ColumnVector {
    pub fn new(values: Vec<i32>) -> Self {
        Self(values)
    }

    /// `len` values drawn uniformly from `[lower, upper)`.
    pub fn random<R: Rng + ?Sized>(len: usize, lower: i32, upper: i32, rng: &mut R) -> Result<Self> {
        check_bounds(lower, upper)?;
        Ok(Self((0..len).map(|_| rng.gen_range(lower..upper)).collect()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<i32> {
        self.0
    }
}

impl From<Vec<i32>> for ColumnVector {
    fn from(values: Vec<i32>) -> Self {
        Self(values)
    }
}

fn check_bounds(lower: i32, upper: i32) -> Result<()> {
    if lower >= upper {
        return Err(MatvecError::InvalidConfig(format!(
            "value bounds [{}, {}) are empty",
            lower, upper
        )));
    }
    Ok(())
}

/// Dot product of one matrix row with the column vector, accumulated in `i64`.
pub fn scalar_product(row: &[i32], column: &[i32]) -> i64 {
    row.iter()
        .zip(column)
        .map(|(&a, &b)| i64::from(a) * i64::from(b))
        .sum()
}

/// Single-process product of `matrix` with `vector`, used as the reference result.
pub fn multiply(matrix: &Matrix, vector: &ColumnVector) -> Result<Vec<i64>> {
    if matrix.width() != vector.len() {
        return Err(MatvecError::ShapeMismatch(format!(
            "matrix has {} columns but the vector has {} values",
            matrix.width(),
            vector.len()
        )));
    }
    Ok(matrix
        .rows()
        .iter()
        .map(|row| scalar_product(row, vector.as_slice()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample() -> Matrix {
        Matrix::from_rows(vec![
            vec![1, 2, 3, 4],
            vec![5, 6, 7, 8],
            vec![9, 10, 11, 12],
            vec![13, 14, 15, 16],
        ])
        .unwrap()
    }

    #[test]
    fn scalar_products_of_sample_rows() {
        let vector = ColumnVector::new(vec![1, 0, 1, 0]);
        assert_eq!(multiply(&sample(), &vector).unwrap(), vec![4, 12, 20, 28]);
    }

    #[test]
    fn scalar_product_does_not_overflow_i32() {
        let row = [i32::MAX, i32::MAX];
        assert_eq!(scalar_product(&row, &[2, 2]), 4 * i64::from(i32::MAX));
    }

    #[test]
    fn out_of_bounds_access_is_reported() {
        let mut matrix = sample();
        assert_eq!(matrix.get(3, 3).unwrap(), 16);
        match matrix.get(4, 0) {
            Err(MatvecError::OutOfBounds { op, row, height, .. }) => {
                assert_eq!((op, row, height), ("read", 4, 4));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            matrix.set(0, 9, 1),
            Err(MatvecError::OutOfBounds { op: "write", col: 9, .. })
        ));
    }

    #[test]
    fn ragged_rows_are_refused() {
        let err = Matrix::from_rows(vec![vec![1, 2], vec![3]]).unwrap_err();
        assert!(matches!(err, MatvecError::ShapeMismatch(_)));
    }

    #[test]
    fn multiply_checks_vector_length() {
        let err = multiply(&sample(), &ColumnVector::new(vec![1, 2])).unwrap_err();
        assert!(matches!(err, MatvecError::ShapeMismatch(_)));
    }

    #[test]
    fn random_values_stay_in_bounds_and_follow_the_seed() {
        let mut rng = StdRng::seed_from_u64(7);
        let matrix = Matrix::random(8, 8, -10, 10, &mut rng).unwrap();
        assert!(matrix.rows().iter().flatten().all(|v| (-10..10).contains(v)));

        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(Matrix::random(8, 8, -10, 10, &mut rng).unwrap(), matrix);
    }

    #[test]
    fn empty_bounds_are_refused() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(ColumnVector::random(4, 3, 3, &mut rng).is_err());
    }

    #[test]
    fn display_prefixes_every_row() {
        let matrix = Matrix::from_rows(vec![vec![1, -2], vec![3, 4]]).unwrap();
        assert_eq!(
            matrix.to_string(),
            "[matrix printing] 1 -2 \n[matrix printing] 3 4 \n"
        );
    }
}
