//! Sparse MNA system with stable element handles.
//!
//! Device behaviors resolve a [`MatrixElement`] handle per (row, column) pair
//! once at setup and accumulate into it every solver iteration. Handles are
//! plain indices into a pre-allocated entry arena, so they stay valid across
//! re-factorizations and are shared between devices stamping the same pair.

use std::collections::HashMap;

use nalgebra::linalg::LU;
use nalgebra::{ComplexField, DMatrix, DVector, Dyn};

use crate::error::{Error, Result};

/// Handle to one (row, column) entry of the sparse matrix.
///
/// Obtained from [`SparseMatrix::get_element`] at setup and reused for the
/// lifetime of the analysis. Copyable and cheap; multiple devices may hold
/// the same handle and their contributions accumulate additively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixElement(usize);

impl MatrixElement {
    /// The discard element. Writes to any pair involving ground land here
    /// and are ignored, so device code never special-cases ground terminals.
    pub const TRASHCAN: MatrixElement = MatrixElement(0);
}

/// Sparse coefficient matrix over `f64` (DC/transient) or `Complex<f64>` (AC).
///
/// Rows and columns are 1-based unknown indices; index 0 is ground.
/// Factorization uses LU with partial (row) pivoting; a singular matrix is
/// reported as a recoverable [`Error::SingularMatrix`], never a panic.
#[derive(Debug)]
pub struct SparseMatrix<T: ComplexField + Copy> {
    size: usize,
    values: Vec<T>,
    coords: Vec<(usize, usize)>,
    index: HashMap<(usize, usize), MatrixElement>,
    // Assembly buffer reused across factorizations of the same pattern.
    dense: DMatrix<T>,
    lu: Option<LU<T, Dyn, Dyn>>,
}

impl<T: ComplexField + Copy> SparseMatrix<T> {
    /// Create an empty matrix for `size` unknowns (excluding ground).
    pub fn new(size: usize) -> Self {
        Self {
            size,
            values: vec![T::zero()],
            coords: vec![(0, 0)],
            index: HashMap::new(),
            dense: DMatrix::from_element(size, size, T::zero()),
            lu: None,
        }
    }

    /// Number of unknowns (excluding ground).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of distinct nonzero entries created so far.
    pub fn num_entries(&self) -> usize {
        self.values.len() - 1
    }

    /// Resolve the handle for `(row, col)`, creating the entry on first
    /// request. Idempotent: the same pair always returns the same handle.
    /// Any pair touching ground returns [`MatrixElement::TRASHCAN`].
    pub fn get_element(&mut self, row: usize, col: usize) -> MatrixElement {
        if row == 0 || col == 0 {
            return MatrixElement::TRASHCAN;
        }
        debug_assert!(
            row <= self.size && col <= self.size,
            "matrix element ({row}, {col}) outside system of size {}",
            self.size
        );
        if let Some(&elt) = self.index.get(&(row, col)) {
            return elt;
        }
        let elt = MatrixElement(self.values.len());
        self.values.push(T::zero());
        self.coords.push((row, col));
        self.index.insert((row, col), elt);
        // The sparsity pattern changed; any cached factorization is stale.
        self.lu = None;
        elt
    }

    /// Add `value` to the entry behind `elt`.
    pub fn add(&mut self, elt: MatrixElement, value: T) {
        self.values[elt.0] = self.values[elt.0] + value;
    }

    /// Subtract `value` from the entry behind `elt`.
    pub fn sub(&mut self, elt: MatrixElement, value: T) {
        self.values[elt.0] = self.values[elt.0] - value;
    }

    /// Read the accumulated value behind `elt`.
    pub fn value(&self, elt: MatrixElement) -> T {
        self.values[elt.0]
    }

    /// Zero every entry. Called by the iteration controller before each load
    /// pass; behaviors only ever accumulate.
    pub fn clear(&mut self) {
        for v in &mut self.values {
            *v = T::zero();
        }
    }

    /// Factorize the current values. Must be called after every change to the
    /// matrix values (every Newton iteration) and before [`Self::solve_into`].
    pub fn factor(&mut self) -> Result<()> {
        self.dense.fill(T::zero());
        for (k, &(row, col)) in self.coords.iter().enumerate().skip(1) {
            self.dense[(row - 1, col - 1)] = self.values[k];
        }
        let lu = self.dense.clone().lu();
        if !lu.is_invertible() {
            self.lu = None;
            return Err(Error::SingularMatrix);
        }
        self.lu = Some(lu);
        Ok(())
    }

    /// Solve `A x = rhs` with the last factorization.
    ///
    /// `rhs` and `solution` carry a ground slot at index 0; the ground slot
    /// of the solution is forced to zero.
    pub fn solve_into(&self, rhs: &DVector<T>, solution: &mut DVector<T>) -> Result<()> {
        if rhs.len() != self.size + 1 {
            return Err(Error::DimensionMismatch {
                expected: self.size + 1,
                actual: rhs.len(),
            });
        }
        if solution.len() != self.size + 1 {
            return Err(Error::DimensionMismatch {
                expected: self.size + 1,
                actual: solution.len(),
            });
        }
        let lu = self.lu.as_ref().ok_or(Error::NotFactored)?;
        let b = DVector::from_fn(self.size, |i, _| rhs[i + 1]);
        let x = lu.solve(&b).ok_or(Error::SingularMatrix)?;
        solution[0] = T::zero();
        for i in 0..self.size {
            solution[i + 1] = x[i];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_element_idempotent() {
        let mut m: SparseMatrix<f64> = SparseMatrix::new(3);
        let a = m.get_element(1, 2);
        let b = m.get_element(1, 2);
        assert_eq!(a, b);
        assert_eq!(m.num_entries(), 1);
    }

    #[test]
    fn test_ground_is_trashcan() {
        let mut m: SparseMatrix<f64> = SparseMatrix::new(2);
        let t = m.get_element(0, 1);
        assert_eq!(t, MatrixElement::TRASHCAN);
        m.add(t, 123.0);
        assert_eq!(m.num_entries(), 0);
    }

    #[test]
    fn test_accumulation() {
        let mut m: SparseMatrix<f64> = SparseMatrix::new(1);
        let e = m.get_element(1, 1);
        m.add(e, 2.0);
        m.add(e, 3.0);
        m.sub(e, 1.0);
        assert_eq!(m.value(e), 4.0);
        m.clear();
        assert_eq!(m.value(e), 0.0);
    }

    #[test]
    fn test_factor_and_solve() {
        // 2x + y = 5, x + 3y = 6 -> x = 1.8, y = 1.4
        let mut m: SparseMatrix<f64> = SparseMatrix::new(2);
        let e11 = m.get_element(1, 1);
        let e12 = m.get_element(1, 2);
        let e21 = m.get_element(2, 1);
        let e22 = m.get_element(2, 2);
        m.add(e11, 2.0);
        m.add(e12, 1.0);
        m.add(e21, 1.0);
        m.add(e22, 3.0);
        m.factor().unwrap();

        let rhs = DVector::from_vec(vec![0.0, 5.0, 6.0]);
        let mut x = DVector::zeros(3);
        m.solve_into(&rhs, &mut x).unwrap();

        assert!((x[1] - 1.8).abs() < 1e-12);
        assert!((x[2] - 1.4).abs() < 1e-12);
        assert_eq!(x[0], 0.0);
    }

    #[test]
    fn test_singular_reported() {
        let mut m: SparseMatrix<f64> = SparseMatrix::new(2);
        let e11 = m.get_element(1, 1);
        let e12 = m.get_element(1, 2);
        let e21 = m.get_element(2, 1);
        let e22 = m.get_element(2, 2);
        m.add(e11, 1.0);
        m.add(e12, 2.0);
        m.add(e21, 2.0);
        m.add(e22, 4.0);
        assert!(matches!(m.factor(), Err(Error::SingularMatrix)));
    }

    #[test]
    fn test_refactor_after_value_change() {
        let mut m: SparseMatrix<f64> = SparseMatrix::new(1);
        let e = m.get_element(1, 1);
        m.add(e, 2.0);
        m.factor().unwrap();

        let rhs = DVector::from_vec(vec![0.0, 4.0]);
        let mut x = DVector::zeros(2);
        m.solve_into(&rhs, &mut x).unwrap();
        assert!((x[1] - 2.0).abs() < 1e-12);

        m.clear();
        m.add(e, 4.0);
        m.factor().unwrap();
        m.solve_into(&rhs, &mut x).unwrap();
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_complex_solve() {
        use num_complex::Complex;

        let mut m: SparseMatrix<Complex<f64>> = SparseMatrix::new(1);
        let e = m.get_element(1, 1);
        m.add(e, Complex::new(0.0, 2.0));
        m.factor().unwrap();

        let rhs = DVector::from_vec(vec![Complex::new(0.0, 0.0), Complex::new(4.0, 0.0)]);
        let mut x = DVector::from_element(2, Complex::new(0.0, 0.0));
        m.solve_into(&rhs, &mut x).unwrap();
        // 2j * x = 4 -> x = -2j
        assert!((x[1] - Complex::new(0.0, -2.0)).norm() < 1e-12);
    }
}
