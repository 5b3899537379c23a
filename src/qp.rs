//! Quadratic programming over box constraints.
//!
//! Bounded biharmonic weights come out of minimizing `0.5 x^T Q x + c^T x`
//! subject to `lb <= x <= ub`. The production path for this is an external
//! QP library (active-set or interior-point); here we ship a trait so one can
//! be plugged in, plus a dependency-free projected-gradient solver that is
//! good enough to exercise the rest of the pipeline and to test against.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

pub trait QpSolver {
    /// Minimizes `0.5 x^T q x + c^T x` subject to `lb[i] <= x[i] <= ub[i]`.
    fn solve(
        &self,
        q: &DMatrix<f64>,
        c: &DVector<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
    ) -> Result<DVector<f64>>;
}

/// Projected gradient descent with a Barzilai-Borwein step size. `q` is
/// assumed symmetric positive semi-definite, which holds for the `L^T L`
/// matrices the weight solve builds.
#[derive(Debug, Clone, Copy)]
pub struct ProjectedGradientQp {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for ProjectedGradientQp {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            tolerance: 1e-10,
        }
    }
}

fn project(x: &DVector<f64>, lb: &DVector<f64>, ub: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        x.len(),
        x.iter()
            .zip(lb.iter())
            .zip(ub.iter())
            .map(|((&xi, &lo), &hi)| xi.clamp(lo, hi)),
    )
}

impl QpSolver for ProjectedGradientQp {
    fn solve(
        &self,
        q: &DMatrix<f64>,
        c: &DVector<f64>,
        lb: &DVector<f64>,
        ub: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let n = c.len();
        if q.nrows() != n || q.ncols() != n || lb.len() != n || ub.len() != n {
            return Err(Error::QpFailure("dimension mismatch".to_string()));
        }

        let lipschitz = q
            .row_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0_f64, f64::max)
            .max(1e-8);
        let mut step = 1.0 / lipschitz;

        let mut x = project(&DVector::from_element(n, 0.5), lb, ub);
        let mut grad = q * &x + c;
        let mut prev_x = x.clone();
        let mut prev_grad = grad.clone();

        for iter in 0..self.max_iterations {
            let candidate = project(&(&x - &grad * step), lb, ub);
            let delta = &candidate - &x;
            if delta.norm() < self.tolerance {
                x = candidate;
                break;
            }

            x = candidate;
            grad = q * &x + c;

            if iter > 0 {
                let s = &x - &prev_x;
                let y = &grad - &prev_grad;
                let sy = s.dot(&y);
                if sy.abs() > 1e-14 {
                    step = (s.dot(&s) / sy).abs().clamp(1e-12, 1e6);
                }
            }

            prev_x = x.clone();
            prev_grad = grad.clone();
        }

        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_minimum_of_identity_quadratic_is_zero() {
        let q = DMatrix::<f64>::identity(3, 3);
        let c = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let lb = DVector::from_element(3, -10.0);
        let ub = DVector::from_element(3, 10.0);

        let solver = ProjectedGradientQp::default();
        let x = solver.solve(&q, &c, &lb, &ub).unwrap();

        assert!((x - DVector::from_vec(vec![-1.0, 2.0, -0.5])).norm() < 1e-4);
    }

    #[test]
    fn box_constraints_clamp_the_solution() {
        let q = DMatrix::<f64>::identity(2, 2);
        let c = DVector::from_vec(vec![-5.0, -5.0]);
        let lb = DVector::from_element(2, 0.0);
        let ub = DVector::from_element(2, 1.0);

        let solver = ProjectedGradientQp::default();
        let x = solver.solve(&q, &c, &lb, &ub).unwrap();

        assert!((x - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-4);
    }
}
