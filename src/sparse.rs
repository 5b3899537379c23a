//! A thin wrapper over `nalgebra-sparse`'s COO/CSR types, assembled from
//! local dense blocks the way a finite-element or as-rigid-as-possible
//! solver scatters per-vertex contributions into a global system. Triplets
//! with repeated `(row, col)` are summed on conversion to CSR, matching the
//! usual FEM assembly convention.
//!
//! The crate never needs to factor or invert this matrix — only to apply it
//! (`matvec`) and to read back the quadratic form `xᵀAx` — so CSR storage
//! built once from accumulated triplets is enough; no sparse solver is
//! pulled in.

use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix as NaCsrMatrix};

/// A sparse matrix under construction: an unordered bag of `(row, col, value)`
/// triplets that duplicate entries at the same coordinate.
#[derive(Debug, Clone)]
pub struct TripletMatrix {
    coo: CooMatrix<f64>,
}

impl TripletMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            coo: CooMatrix::new(rows, cols),
        }
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.coo.push(row, col, value);
    }

    pub fn to_csr(&self) -> CsrMatrix {
        CsrMatrix {
            inner: NaCsrMatrix::from(&self.coo),
        }
    }
}

/// Compressed-sparse-row matrix, built once via [`TripletMatrix::to_csr`] and
/// read-only from then on.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    inner: NaCsrMatrix<f64>,
}

impl CsrMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            inner: NaCsrMatrix::from(&CooMatrix::<f64>::new(rows, cols)),
        }
    }

    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    pub fn matvec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.inner.ncols());
        let mut y = DVector::zeros(self.inner.nrows());
        for (r, row) in self.inner.row_iter().enumerate() {
            let mut acc = 0.0;
            for (&c, &v) in row.col_indices().iter().zip(row.values()) {
                acc += v * x[c];
            }
            y[r] = acc;
        }
        y
    }

    /// `xᵀ A x`. Valid for any `A`, but only meaningful as an energy when `A`
    /// is symmetric positive semi-definite (true for `MᵀM` here).
    pub fn quadratic_form(&self, x: &DVector<f64>) -> f64 {
        x.dot(&self.matvec(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_triplets_are_summed() {
        let mut t = TripletMatrix::new(2, 2);
        t.add(0, 0, 1.0);
        t.add(0, 0, 2.0);
        t.add(1, 1, 5.0);
        let csr = t.to_csr();

        let x = DVector::from_vec(vec![1.0, 1.0]);
        let y = csr.matvec(&x);
        assert_eq!(y[0], 3.0);
        assert_eq!(y[1], 5.0);
    }

    #[test]
    fn quadratic_form_of_identity_is_squared_norm() {
        let mut t = TripletMatrix::new(3, 3);
        for i in 0..3 {
            t.add(i, i, 1.0);
        }
        let csr = t.to_csr();
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(csr.quadratic_form(&x), 14.0);
    }
}
