use faer::{linalg::solvers::FullPivLu, linalg::solvers::Solve, Col, Mat};
use nalgebra::{DMatrix, DVector};

use crate::{
    error::{DiffstepError, LinearSolverError},
    linear_solver_error,
    scalar::is_finite,
    Communicator, LinearSolver, Scalar,
};

use super::super::{check_matrix, check_rhs};

/// A [LinearSolver] that uses the full-pivot LU decomposition in the [`faer`](https://github.com/sarah-ek/faer-rs) library to solve the linear system.
pub struct LU<T>
where
    T: Scalar,
{
    comm: Communicator,
    prefix: Option<String>,
    initialized: bool,
    n: usize,
    lu: Option<FullPivLu<T>>,
}

impl<T: Scalar> LU<T> {
    pub fn new(comm: Communicator) -> Self {
        Self {
            comm,
            prefix: None,
            initialized: false,
            n: 0,
            lu: None,
        }
    }
}

impl<T> Default for LU<T>
where
    T: Scalar,
{
    fn default() -> Self {
        Self::new(Communicator::default())
    }
}

impl<T: Scalar> LinearSolver<T> for LU<T> {
    fn comm(&self) -> &Communicator {
        &self.comm
    }

    fn clear(&mut self) {
        self.lu = None;
        self.prefix = None;
        self.initialized = false;
    }

    fn init(&mut self, prefix: Option<&str>) {
        self.prefix = prefix.map(|p| p.to_string());
        self.initialized = true;
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_matrix(&mut self, a: &DMatrix<T>) -> Result<(), DiffstepError> {
        check_matrix(self.initialized, a)?;
        self.n = a.nrows();
        let matrix = Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)]);
        self.lu = Some(matrix.full_piv_lu());
        Ok(())
    }

    fn solve_in_place(&self, x: &mut DVector<T>) -> Result<(), DiffstepError> {
        let lu = self
            .lu
            .as_ref()
            .ok_or(linear_solver_error!(LuNotInitialized))?;
        check_rhs(self.n, x)?;
        let mut rhs = Col::from_fn(x.len(), |i| x[i]);
        lu.solve_in_place(rhs.as_mut());
        for i in 0..x.len() {
            x[i] = rhs[i];
        }
        if x.iter().all(|xi| is_finite(*xi)) {
            Ok(())
        } else {
            Err(linear_solver_error!(LuSolveFailed))
        }
    }
}
