//! Dense direct solver: Gaussian elimination with partial pivoting.
//!
//! Circuits handled by the built-in engine are small, so the MNA matrices are
//! kept dense. One implementation serves both the real (OP/DC/TRAN) and the
//! complex (AC) systems.

use crate::error::{OhmserveError, Result};
use num_complex::Complex64;
use std::ops::{Add, Div, Mul, Sub};

/// Pivot magnitudes below this are treated as singular.
const PIVOT_EPSILON: f64 = 1e-15;

/// Field element the solver can eliminate over.
pub trait Scalar:
    Copy
    + Default
    + PartialEq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    fn magnitude(self) -> f64;
    fn from_real(v: f64) -> Self;
}

impl Scalar for f64 {
    fn magnitude(self) -> f64 {
        self.abs()
    }
    fn from_real(v: f64) -> Self {
        v
    }
}

impl Scalar for Complex64 {
    fn magnitude(self) -> f64 {
        self.norm()
    }
    fn from_real(v: f64) -> Self {
        Complex64::new(v, 0.0)
    }
}

/// Square dense matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    size: usize,
    data: Vec<T>,
}

impl<T: Scalar> Matrix<T> {
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![T::default(); size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.size + col]
    }

    /// Accumulate into an entry (MNA stamps add, never overwrite).
    pub fn add(&mut self, row: usize, col: usize, value: T) {
        let idx = row * self.size + col;
        self.data[idx] = self.data[idx] + value;
    }

    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.data[row * self.size + col] = value;
    }

    /// Zero a whole row.
    pub fn clear_row(&mut self, row: usize) {
        let start = row * self.size;
        self.data[start..start + self.size].fill(T::default());
    }

    /// y = A * x
    pub fn mul_vec(&self, x: &[T]) -> Vec<T> {
        self.data
            .chunks(self.size.max(1))
            .take(self.size)
            .map(|row| {
                row.iter()
                    .zip(x)
                    .fold(T::default(), |acc, (&a, &b)| acc + a * b)
            })
            .collect()
    }

    /// Element-wise combination `self + scale * other`, with a scalar scale.
    pub fn combine(&self, other: &Matrix<f64>, scale: T) -> Matrix<T> {
        debug_assert_eq!(self.size, other.size);
        Matrix {
            size: self.size,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| a + scale * T::from_real(b))
                .collect(),
        }
    }

    /// Solve `A x = b` without modifying `self`.
    pub fn solve(&self, b: &[T]) -> Result<Vec<T>> {
        let n = self.size;
        if b.len() != n {
            return Err(OhmserveError::Solve(format!(
                "dimension mismatch: matrix is {n}x{n}, rhs length is {}",
                b.len()
            )));
        }

        let mut a = self.data.clone();
        let mut x = b.to_vec();

        for k in 0..n {
            let pivot_row = (k..n)
                .max_by(|&i, &j| {
                    a[i * n + k]
                        .magnitude()
                        .total_cmp(&a[j * n + k].magnitude())
                })
                .unwrap_or(k);
            if a[pivot_row * n + k].magnitude() < PIVOT_EPSILON {
                return Err(OhmserveError::Solve("singular matrix".into()));
            }
            if pivot_row != k {
                for col in 0..n {
                    a.swap(k * n + col, pivot_row * n + col);
                }
                x.swap(k, pivot_row);
            }

            let pivot = a[k * n + k];
            for i in (k + 1)..n {
                let factor = a[i * n + k] / pivot;
                if factor == T::default() {
                    continue;
                }
                for col in k..n {
                    a[i * n + col] = a[i * n + col] - factor * a[k * n + col];
                }
                x[i] = x[i] - factor * x[k];
            }
        }

        for i in (0..n).rev() {
            let tail = ((i + 1)..n).fold(T::default(), |acc, j| acc + a[i * n + j] * x[j]);
            x[i] = (x[i] - tail) / a[i * n + i];
        }

        if x.iter().any(|v| !v.magnitude().is_finite()) {
            return Err(OhmserveError::Solve("solution contains NaN/Inf".into()));
        }
        Ok(x)
    }
}
