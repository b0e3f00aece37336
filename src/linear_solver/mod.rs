use ::nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::{error::DiffstepError, Communicator, Scalar};

pub mod faer;
pub mod nalgebra;

pub use self::faer::lu::LU as FaerLU;
pub use self::nalgebra::lu::LU as NalgebraLU;

/// A solver for the linear problem `Ax = b`, where `A` is typically the jacobian of a nonlinear residual.
///
/// A solver is constructed for a [Communicator] and must be initialised with [LinearSolver::init] before a
/// matrix can be set. The optional prefix given to `init` scopes any naming of the solver's internal options,
/// e.g. `"heat_"` when several systems are solved side by side.
pub trait LinearSolver<T: Scalar> {
    /// The process group the solver was built for.
    fn comm(&self) -> &Communicator;

    /// Release the factorisation and any internal data, returning the solver to its uninitialised state.
    fn clear(&mut self);

    /// Initialise the solver, optionally scoping its naming with `prefix`.
    fn init(&mut self, prefix: Option<&str>);

    /// The prefix given to the last call of [LinearSolver::init].
    fn prefix(&self) -> Option<&str>;

    fn is_initialized(&self) -> bool;

    /// Set (and factorise) the matrix `A`. Any previous matrix is discarded.
    fn set_matrix(&mut self, a: &DMatrix<T>) -> Result<(), DiffstepError>;

    /// Solve `Ax = b` in place, the right-hand side `b` is given in `x`.
    fn solve_in_place(&self, x: &mut DVector<T>) -> Result<(), DiffstepError>;

    /// Solve the problem `Ax = b` and return the solution `x`.
    fn solve(&self, b: &DVector<T>) -> Result<DVector<T>, DiffstepError> {
        let mut b = b.clone();
        self.solve_in_place(&mut b)?;
        Ok(b)
    }
}

/// The dense direct solvers available from [build].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverKind {
    #[default]
    NalgebraLu,
    FaerLu,
}

/// Build a linear solver of the given kind for the process group `comm`.
pub fn build<T: Scalar>(comm: Communicator, kind: LinearSolverKind) -> Box<dyn LinearSolver<T>> {
    match kind {
        LinearSolverKind::NalgebraLu => Box::new(NalgebraLU::new(comm)),
        LinearSolverKind::FaerLu => Box::new(FaerLU::new(comm)),
    }
}

/// Checks shared by the dense solvers before a matrix is factorised.
pub(crate) fn check_matrix<T: Scalar>(
    is_initialized: bool,
    a: &DMatrix<T>,
) -> Result<(), DiffstepError> {
    use crate::{error::LinearSolverError, linear_solver_error};
    if !is_initialized {
        return Err(linear_solver_error!(NotInitialized));
    }
    if !a.is_square() {
        return Err(linear_solver_error!(NotSquare {
            nrows: a.nrows(),
            ncols: a.ncols()
        }));
    }
    Ok(())
}

/// Checks shared by the dense solvers before a right-hand side is solved for.
pub(crate) fn check_rhs<T: Scalar>(n: usize, x: &DVector<T>) -> Result<(), DiffstepError> {
    use crate::{error::LinearSolverError, linear_solver_error};
    if x.len() != n {
        return Err(linear_solver_error!(RhsLengthMismatch {
            expected: n,
            got: x.len()
        }));
    }
    Ok(())
}
