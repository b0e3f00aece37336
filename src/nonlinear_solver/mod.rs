use std::{cell::RefCell, rc::Rc};

use serde::Serialize;

use crate::{error::DiffstepError, LinearSolver, NonLinearOp, System};

pub mod convergence;
pub mod newton;

use newton::{NewtonConfig, NewtonSolver};

/// Outcome of a successful nonlinear solve.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiffSolverStatus {
    /// Number of iterations taken.
    pub iterations: usize,
    /// Weighted norm of the final update.
    pub norm: f64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct NonLinearSolverStatistics {
    pub number_of_solves: usize,
    pub number_of_iterations: usize,
    pub number_of_linear_solver_setups: usize,
    pub number_of_nonlinear_solver_fails: usize,
}

/// A solver for the nonlinear problem `R(u) = 0` arising at one time step of a [System].
///
/// A solver is bound to one system for its whole lifetime; [DiffSolver::system] gives access to the bound system so
/// that drivers can check they are stepping the same system. The solver uses the current state of the system as
/// its initial guess and overwrites the state in place with the solution.
pub trait DiffSolver<S: System> {
    /// The system this solver is bound to.
    fn system(&self) -> &Rc<RefCell<S>>;

    /// Initialise internal data structures. Must be called before [DiffSolver::solve].
    fn init(&mut self);

    /// Reinitialise internal data structures, e.g. after the size of the system has changed.
    fn reinit(&mut self);

    fn is_initialized(&self) -> bool;

    /// Solve `R(u) = 0` for the residual `op`, using `linear_solver` for the linearised problems.
    ///
    /// # Panics
    ///
    /// Panics if called before [DiffSolver::init].
    fn solve(
        &mut self,
        op: &dyn NonLinearOp<T = S::T>,
        linear_solver: &mut dyn LinearSolver<S::T>,
    ) -> Result<DiffSolverStatus, DiffstepError>;

    fn statistics(&self) -> NonLinearSolverStatistics;
}

/// Build the default nonlinear solver (a [NewtonSolver]) for `system`.
pub fn build<S: System + 'static>(
    system: Rc<RefCell<S>>,
    config: &NewtonConfig,
) -> Box<dyn DiffSolver<S>> {
    Box::new(NewtonSolver::new(system, config.clone()))
}
