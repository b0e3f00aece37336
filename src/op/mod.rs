use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};
use serde::Serialize;

use crate::Scalar;

pub mod closure;
pub mod steady;
pub mod theta;

/// A generic operator trait.
///
/// Op is a trait for operators that operate on an input vector `x` to produce an output vector `y`.
/// It defines the number of states (i.e. length of `x`) and the number of outputs (i.e. length of `y`),
/// as well as the scalar type used in the operator.
pub trait Op {
    type T: Scalar;

    /// Return the number of input states of the operator.
    fn nstates(&self) -> usize;

    /// Return the number of outputs of the operator.
    fn nout(&self) -> usize {
        self.nstates()
    }

    /// Return statistics about the operator (e.g. how many times it was called, how many times the jacobian was computed, etc.)
    fn statistics(&self) -> OpStatistics {
        OpStatistics::default()
    }
}

/// A nonlinear residual `R(x)` whose root is sought by a [crate::DiffSolver].
pub trait NonLinearOp: Op {
    /// Compute the operator `R(x)` and store the result in `y`.
    fn call_inplace(&self, x: &DVector<Self::T>, y: &mut DVector<Self::T>);

    /// Compute the jacobian `dR/dx` at `x` and store it in `y`.
    fn jacobian_inplace(&self, x: &DVector<Self::T>, y: &mut DMatrix<Self::T>);

    /// Compute the operator `R(x)` and return the result.
    fn call(&self, x: &DVector<Self::T>) -> DVector<Self::T> {
        let mut y = DVector::zeros(self.nout());
        self.call_inplace(x, &mut y);
        y
    }

    /// Compute the jacobian `dR/dx` at `x` and return it.
    fn jacobian(&self, x: &DVector<Self::T>) -> DMatrix<Self::T> {
        let mut y = DMatrix::zeros(self.nout(), self.nstates());
        self.jacobian_inplace(x, &mut y);
        y
    }
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct OpStatistics {
    pub number_of_calls: usize,
    pub number_of_jac_muls: usize,
    pub number_of_matrix_evals: usize,
}

impl OpStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_call(&mut self) {
        self.number_of_calls += 1;
    }

    pub fn increment_jac_mul(&mut self) {
        self.number_of_jac_muls += 1;
    }

    pub fn increment_matrix(&mut self) {
        self.number_of_matrix_evals += 1;
    }
}

/// Assemble a dense jacobian from its action on a vector, one column at a time.
///
/// `jac_mul(v, y)` must compute `y = J v`.
pub fn dense_jacobian_inplace<T: Scalar>(
    jac_mul: impl Fn(&DVector<T>, &mut DVector<T>),
    y: &mut DMatrix<T>,
) {
    let (nrows, ncols) = y.shape();
    let mut v = DVector::<T>::zeros(ncols);
    let mut col = DVector::<T>::zeros(nrows);
    for j in 0..ncols {
        v[j] = T::one();
        jac_mul(&v, &mut col);
        y.set_column(j, &col);
        v[j] = T::zero();
    }
}
