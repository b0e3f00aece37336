use nalgebra::{DMatrix, DVector, Dyn};

use crate::{
    error::{DiffstepError, LinearSolverError},
    linear_solver_error,
    scalar::is_finite,
    Communicator, LinearSolver, Scalar,
};

use super::super::{check_matrix, check_rhs};

/// A [LinearSolver] that uses the LU decomposition in the [`nalgebra` library](https://nalgebra.org/) to solve the linear system.
#[derive(Clone)]
pub struct LU<T>
where
    T: Scalar,
{
    comm: Communicator,
    prefix: Option<String>,
    initialized: bool,
    n: usize,
    lu: Option<nalgebra::LU<T, Dyn, Dyn>>,
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
        self.lu = Some(a.clone().lu());
        Ok(())
    }

    fn solve_in_place(&self, x: &mut DVector<T>) -> Result<(), DiffstepError> {
        let lu = self
            .lu
            .as_ref()
            .ok_or(linear_solver_error!(LuNotInitialized))?;
        check_rhs(self.n, x)?;
        match lu.solve_mut(x) {
            true if x.iter().all(|xi| is_finite(*xi)) => Ok(()),
            _ => Err(linear_solver_error!(LuSolveFailed)),
        }
    }
}
