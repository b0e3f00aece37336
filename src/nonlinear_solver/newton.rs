use std::{cell::RefCell, rc::Rc};

use log::trace;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DiffstepError, NonLinearSolverError},
    non_linear_solver_error,
    scalar::{constant, to_f64},
    Convergence, ConvergenceStatus, DiffSolver, DiffSolverStatus, LinearSolver, NonLinearOp,
    NonLinearSolverStatistics, System,
};

/// Options of the [NewtonSolver].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub max_iter: usize,
    pub rtol: f64,
    pub atol: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iter: 20,
            rtol: 1e-6,
            atol: 1e-6,
        }
    }
}

/// Full Newton iteration on the residual of a time step.
///
/// The jacobian is recomputed and factorised every iteration. The iteration starts from the current state of
/// the bound system, and the converged iterate is written back into the system state. If the iteration fails
/// the system state is left untouched.
pub struct NewtonSolver<S: System> {
    system: Rc<RefCell<S>>,
    config: NewtonConfig,
    initialized: bool,
    jac: DMatrix<S::T>,
    dx: DVector<S::T>,
    statistics: NonLinearSolverStatistics,
}

impl<S: System> NewtonSolver<S> {
    pub fn new(system: Rc<RefCell<S>>, config: NewtonConfig) -> Self {
        Self {
            system,
            config,
            initialized: false,
            jac: DMatrix::zeros(0, 0),
            dx: DVector::zeros(0),
            statistics: NonLinearSolverStatistics::default(),
        }
    }

    pub fn config(&self) -> &NewtonConfig {
        &self.config
    }

    fn allocate(&mut self) {
        let n = self.system.borrow().nstates();
        self.jac = DMatrix::zeros(n, n);
        self.dx = DVector::zeros(n);
    }
}

fn linear_solve_failed(err: DiffstepError) -> DiffstepError {
    non_linear_solver_error!(LinearSolveFailed, err.to_string())
}

impl<S: System> DiffSolver<S> for NewtonSolver<S> {
    fn system(&self) -> &Rc<RefCell<S>> {
        &self.system
    }

    fn init(&mut self) {
        self.allocate();
        self.initialized = true;
    }

    fn reinit(&mut self) {
        self.allocate();
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn solve(
        &mut self,
        op: &dyn NonLinearOp<T = S::T>,
        linear_solver: &mut dyn LinearSolver<S::T>,
    ) -> Result<DiffSolverStatus, DiffstepError> {
        if !self.initialized {
            panic!("NewtonSolver::solve() called before NewtonSolver::init()");
        }
        let mut x = self.system.borrow().solution().clone();
        if x.len() != op.nstates() {
            panic!(
                "NewtonSolver::solve() called with a residual of size {}, but the system has {} states",
                op.nstates(),
                x.len()
            );
        }
        if self.dx.len() != x.len() {
            self.allocate();
        }
        self.statistics.number_of_solves += 1;

        let mut convergence = Convergence::new(
            constant::<S::T>(self.config.rtol),
            constant::<S::T>(self.config.atol),
            self.config.max_iter,
        );
        convergence.reset(&x);
        let mut niter = 0;
        let status = loop {
            op.jacobian_inplace(&x, &mut self.jac);
            if let Err(err) = linear_solver.set_matrix(&self.jac) {
                self.statistics.number_of_nonlinear_solver_fails += 1;
                return Err(linear_solve_failed(err));
            }
            self.statistics.number_of_linear_solver_setups += 1;

            op.call_inplace(&x, &mut self.dx);
            if let Err(err) = linear_solver.solve_in_place(&mut self.dx) {
                self.statistics.number_of_nonlinear_solver_fails += 1;
                return Err(linear_solve_failed(err));
            }
            x -= &self.dx;
            niter += 1;
            self.statistics.number_of_iterations += 1;

            let status = convergence.check_new_iteration(&self.dx);
            trace!(
                "Newton iteration {}, norm = {:.3e}",
                niter,
                convergence.last_norm().map(to_f64).unwrap_or(f64::NAN)
            );
            if status != ConvergenceStatus::Continue {
                break status;
            }
        };
        match status {
            ConvergenceStatus::Converged => {
                self.system.borrow_mut().solution_mut().copy_from(&x);
                Ok(DiffSolverStatus {
                    iterations: niter,
                    norm: convergence.last_norm().map(to_f64).unwrap_or(0.0),
                })
            }
            ConvergenceStatus::Diverged => {
                self.statistics.number_of_nonlinear_solver_fails += 1;
                Err(non_linear_solver_error!(NewtonDiverged))
            }
            _ => {
                self.statistics.number_of_nonlinear_solver_fails += 1;
                Err(non_linear_solver_error!(NewtonDidNotConverge))
            }
        }
    }

    fn statistics(&self) -> NonLinearSolverStatistics {
        self.statistics.clone()
    }
}
