use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};

use crate::{
    error::{DiffstepError, TimeSolverError},
    op::theta::{mass_matrix, ThetaResidual},
    scalar::{abs, constant, to_f64},
    solution_history::Snapshot,
    time_solver_error, DiffSolverStatus, NonLinearOp, ParameterVector, QoISet, SensitivityData,
    Scalar, System, TimeSolver, TimeSolverConfig,
};

use super::TimeSolverCore;

/// A time solver using the theta method,
///
/// $$
/// M \frac{u_{n} - u_{n-1}}{\Delta t_n} = \theta f(u_n, t_n) + (1 - \theta) f(u_{n-1}, t_{n-1}).
/// $$
///
/// `theta = 1` is implicit Euler and `theta = 1/2` Crank–Nicolson.
///
/// After every committed step the state is stored in the solution history at the new time index, with the
/// initial state stored at index 0 by [TimeSolver::init_data]. Adjoint sweeps walk back over these snapshots, so
/// a history that retains them (e.g. [crate::MemorySolutionHistory]) must be set before stepping if adjoints
/// are needed.
pub struct EulerSolver<S: System + 'static> {
    core: TimeSolverCore<S>,
    theta: S::T,
    time_index: usize,
    last_deltat: Option<S::T>,
    adjoint_index: usize,
    // adjoint solutions of the current sweep not yet committed by adjoint_advance_timestep
    pending_adjoints: Vec<(usize, DVector<S::T>)>,
    adjoints: BTreeMap<usize, Vec<(usize, DVector<S::T>)>>,
}

impl<S: System + 'static> EulerSolver<S> {
    pub fn new(system: Rc<RefCell<S>>, config: TimeSolverConfig, theta: f64) -> Self {
        Self {
            core: TimeSolverCore::new(system, config),
            theta: constant(theta),
            time_index: 0,
            last_deltat: None,
            adjoint_index: 0,
            pending_adjoints: Vec::new(),
            adjoints: BTreeMap::new(),
        }
    }

    pub fn theta(&self) -> S::T {
        self.theta
    }

    /// The number of committed steps.
    pub fn time_index(&self) -> usize {
        self.time_index
    }

    /// The time index the next adjoint step will be taken at.
    pub fn adjoint_index(&self) -> usize {
        self.adjoint_index
    }

    /// The adjoint solution `lambda_n` of QoI `qoi` at time index `index` from the last adjoint sweep.
    pub fn adjoint_at(&self, index: usize, qoi: usize) -> Option<&DVector<S::T>> {
        self.adjoints
            .get(&index)
            .and_then(|lambdas| lambdas.iter().find(|(i, _)| *i == qoi))
            .map(|(_, lambda)| lambda)
    }

    /// Step forward until the system time reaches `t_final`, shortening the last step to land on it.
    ///
    /// The step size of the system is restored after a shortened final step, whether or not that step succeeds.
    pub fn solve_to(&mut self, t_final: f64) -> Result<(), DiffstepError> {
        let t_final = constant::<S::T>(t_final);
        let time = self.core.system().borrow().time();
        if t_final < time {
            return Err(time_solver_error!(FinalTimeBeforeCurrentTime {
                t_final: to_f64(t_final),
                time: to_f64(time)
            }));
        }
        let one = S::T::one();
        let magnitude = if abs(t_final) > one { abs(t_final) } else { one };
        let troundoff = constant::<S::T>(10.0) * S::T::EPSILON * magnitude;
        loop {
            let (time, deltat) = {
                let system = self.core.system().borrow();
                (system.time(), system.deltat())
            };
            let remaining = t_final - time;
            if remaining <= troundoff {
                break;
            }
            let shortened = deltat > remaining;
            if shortened {
                self.core.system().borrow_mut().set_deltat(remaining);
            }
            let result = self.solve().and_then(|_| self.advance_timestep());
            if shortened {
                self.core.system().borrow_mut().set_deltat(deltat);
            }
            result?;
        }
        Ok(())
    }

    fn check_mode(&self, operation: &'static str, is_adjoint: bool) -> Result<(), DiffstepError> {
        if self.core.is_adjoint() != is_adjoint {
            return Err(time_solver_error!(AdjointModeMismatch {
                operation: operation,
                is_adjoint: self.core.is_adjoint()
            }));
        }
        Ok(())
    }

    /// The matrix `M / dt - theta df/du(u, t)` of the implicit part of a step, and `df/du(u, t)`.
    fn step_matrices(&self) -> (DMatrix<S::T>, DMatrix<S::T>) {
        let system = self.core.system().borrow();
        let n = system.nstates();
        let mut jac = DMatrix::zeros(n, n);
        system.rhs_jacobian_inplace(system.solution(), system.time(), &mut jac);
        let a = mass_matrix(system.mass(), n) / system.deltat() - &jac * self.theta;
        (a, jac)
    }

    /// Run the discrete adjoint of the theta method backwards over the stored trajectory for the QoIs `qois`.
    /// If `params` is given, the parameter sensitivities are accumulated into `sensitivities` on the way.
    fn adjoint_sweep(
        &mut self,
        qois: &QoISet,
        mut params: Option<(&ParameterVector, &mut SensitivityData<S::T>)>,
    ) -> Result<(usize, S::T), DiffstepError> {
        self.core.assert_bound();
        if self.time_index == 0 {
            return Err(time_solver_error!(NoForwardSteps));
        }
        // the sweep reads back every snapshot from the final index down to 0
        if let Some(index) = (0..=self.time_index)
            .rev()
            .find(|&index| !self.core.solution_history().contains(index))
        {
            return Err(time_solver_error!(HistoryMiss { index: index }));
        }
        let (indices, nqoi, nparams, final_state) = {
            let system = self.core.system().borrow();
            (
                qois.resolve(system.nqoi())?,
                system.nqoi(),
                system.nparams(),
                Snapshot::capture(&*system),
            )
        };
        if let Some((params, sensitivities)) = params.as_mut() {
            params.check(nparams)?;
            sensitivities.allocate(nqoi, params.len());
        }

        self.core.set_is_adjoint(true);
        self.adjoint_index = self.time_index;
        self.adjoints.clear();
        let result = self.run_adjoint_sweep(&indices, params);
        self.core.set_is_adjoint(false);
        final_state.restore(&mut self.core.system().borrow_mut());
        let (solves, residual) = result?;

        let mut system = self.core.system().borrow_mut();
        if let Some(lambdas) = self.adjoints.get(&self.time_index) {
            for (i, lambda) in lambdas {
                system.set_adjoint_solution(*i, lambda.clone());
            }
        }
        Ok((solves, residual))
    }

    fn run_adjoint_sweep(
        &mut self,
        indices: &[usize],
        mut params: Option<(&ParameterVector, &mut SensitivityData<S::T>)>,
    ) -> Result<(usize, S::T), DiffstepError> {
        let theta = self.theta;
        let one_minus_theta = S::T::one() - theta;
        let final_index = self.time_index;
        let mut solves = 0;
        let mut max_residual = S::T::zero();
        // (index, step size) of the last committed adjoint step
        let mut next: Option<(usize, S::T)> = None;
        loop {
            self.retrieve_timestep()?;
            let n = self.adjoint_index;
            let (x, t, nstates) = {
                let system = self.core.system().borrow();
                (system.solution().clone(), system.time(), system.nstates())
            };

            // parameter derivatives of the rhs at (u_n, t_n)
            let mut f_p = Vec::new();
            if let Some((params, sensitivities)) = params.as_mut() {
                let mut system = self.core.system().borrow_mut();
                for (k, j) in params.iter().enumerate() {
                    let mut y = DVector::zeros(nstates);
                    system.rhs_param_derivative(&x, t, j, &mut y);
                    f_p.push(y);
                    if n == final_index {
                        for &i in indices {
                            let q_p = system.qoi_param_derivative(i, &x, t, j);
                            let value = sensitivities.derivative(i, k) + q_p;
                            sensitivities.set_derivative(i, k, value);
                        }
                    }
                }
                // explicit part of step n + 1
                if let Some((next_index, _)) = next {
                    if one_minus_theta != S::T::zero() {
                        for (i, lambda) in &self.adjoints[&next_index] {
                            for (k, y) in f_p.iter().enumerate() {
                                let value = sensitivities.derivative(*i, k)
                                    + one_minus_theta * lambda.dot(y);
                                sensitivities.set_derivative(*i, k, value);
                            }
                        }
                    }
                }
            }
            if n == 0 {
                break;
            }

            // (M / dt_n - theta J_n)^T lambda_n = rhs_n
            let (a, jac) = self.step_matrices();
            let a_t = a.transpose();
            let coupling_t = match next {
                Some((_, next_deltat)) => {
                    let system = self.core.system().borrow();
                    let coupling = mass_matrix(system.mass(), nstates) / next_deltat
                        + &jac * one_minus_theta;
                    Some(coupling.transpose())
                }
                None => None,
            };
            let mut rhss = Vec::with_capacity(indices.len());
            for &i in indices {
                let rhs = match (&coupling_t, next) {
                    (Some(coupling_t), Some((next_index, _))) => {
                        let lambda_next = self.adjoints[&next_index]
                            .iter()
                            .find(|(qoi, _)| *qoi == i)
                            .map(|(_, lambda)| lambda)
                            .ok_or_else(|| {
                                time_solver_error!(
                                    Other,
                                    format!("missing adjoint solution of QoI {} at {}", i, next_index)
                                )
                            })?;
                        coupling_t * lambda_next
                    }
                    _ => {
                        let mut g = DVector::zeros(nstates);
                        self.core
                            .system()
                            .borrow()
                            .qoi_derivative(i, &x, t, &mut g);
                        g
                    }
                };
                rhss.push((i, rhs));
            }

            let linear_solver = match self.core.linear_solver_mut() {
                Some(linear_solver) => linear_solver,
                None => panic!("TimeSolver has no linear solver, call init() first"),
            };
            linear_solver.set_matrix(&a_t)?;
            let mut lambdas = Vec::with_capacity(indices.len());
            for (i, rhs) in rhss {
                let lambda = linear_solver.solve(&rhs)?;
                let residual = (&a_t * &lambda - &rhs).norm();
                if residual > max_residual {
                    max_residual = residual;
                }
                solves += 1;
                lambdas.push((i, lambda));
            }

            // implicit part of step n
            if let Some((_, sensitivities)) = params.as_mut() {
                for (i, lambda) in &lambdas {
                    for (k, y) in f_p.iter().enumerate() {
                        let value = sensitivities.derivative(*i, k) + theta * lambda.dot(y);
                        sensitivities.set_derivative(*i, k, value);
                    }
                }
            }

            let deltat = self.core.system().borrow().deltat();
            self.pending_adjoints = lambdas;
            self.adjoint_advance_timestep()?;
            next = Some((n, deltat));
        }
        Ok((solves, max_residual))
    }
}

impl<S: System + 'static> TimeSolver<S> for EulerSolver<S> {
    fn core(&self) -> &TimeSolverCore<S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimeSolverCore<S> {
        &mut self.core
    }

    fn residual(&self) -> Box<dyn NonLinearOp<T = S::T>> {
        Box::new(ThetaResidual::new(self.core.system().clone(), self.theta))
    }

    /// Initialise the solvers and store the initial state at time index 0.
    fn init_data(&mut self) -> Result<(), DiffstepError> {
        self.core.init_data();
        self.time_index = 0;
        self.last_deltat = None;
        self.adjoints.clear();
        self.core.store_solution(0);
        Ok(())
    }

    /// Solve the current step. If the nonlinear solver fails and `reduce_deltat_on_diffsolver_failure` is
    /// non-zero, the step is retried with half the step size, up to that many times.
    fn solve(&mut self) -> Result<DiffSolverStatus, DiffstepError> {
        self.check_mode("solve", false)?;
        let max_reductions = self.core.reduce_deltat_on_diffsolver_failure();
        let mut reductions = 0;
        loop {
            let op = self.residual();
            let err = match self.core.solve(op.as_ref()) {
                Ok(status) => return Ok(status),
                Err(err) => err,
            };
            if max_reductions == 0 || !err.is_convergence_failure() {
                return Err(err);
            }
            let deltat = self.core.system().borrow().deltat();
            if reductions == max_reductions {
                return Err(time_solver_error!(StepReductionFailed {
                    attempts: reductions,
                    deltat: to_f64(deltat)
                }));
            }
            reductions += 1;
            let half = deltat * constant::<S::T>(0.5);
            warn!(
                "nonlinear solve failed ({}), retrying with deltat = {}",
                err,
                to_f64(half)
            );
            self.core.system().borrow_mut().set_deltat(half);
        }
    }

    /// Advance the time by the step size just used, and store the new state in the history.
    fn advance_timestep(&mut self) -> Result<(), DiffstepError> {
        self.check_mode("advance_timestep", false)?;
        let (deltat, time) = {
            let mut system = self.core.system().borrow_mut();
            let deltat = system.deltat();
            let time = system.time() + deltat;
            system.set_time(time);
            (deltat, time)
        };
        self.last_deltat = Some(deltat);
        self.time_index += 1;
        self.core.store_solution(self.time_index);
        let system = self.core.system().borrow();
        if !self.core.quiet() && system.comm().is_root() {
            info!(
                "{}: step {} to t = {} with deltat = {}",
                system.name(),
                self.time_index,
                to_f64(time),
                to_f64(deltat)
            );
        }
        Ok(())
    }

    /// Record the adjoint solutions of the current adjoint step and move to the previous time index.
    fn adjoint_advance_timestep(&mut self) -> Result<(), DiffstepError> {
        self.check_mode("adjoint_advance_timestep", true)?;
        let lambdas = std::mem::take(&mut self.pending_adjoints);
        self.adjoints.insert(self.adjoint_index, lambdas);
        self.adjoint_index = self.adjoint_index.saturating_sub(1);
        Ok(())
    }

    /// Load the stored state at the current adjoint index into the system.
    fn retrieve_timestep(&mut self) -> Result<(), DiffstepError> {
        self.check_mode("retrieve_timestep", true)?;
        self.core.retrieve_solution(self.adjoint_index)
    }

    fn last_complete_deltat(&self) -> S::T {
        match self.last_deltat {
            Some(deltat) => deltat,
            None => self.core.last_complete_deltat(),
        }
    }

    /// Discrete adjoint of the theta method for QoIs evaluated at the final state.
    ///
    /// Walking back from the final time index `N`, solves
    ///
    /// $$
    /// (M / \Delta t_N - \theta J_N)^T \lambda_N = \partial Q / \partial u_N, \quad
    /// (M / \Delta t_n - \theta J_n)^T \lambda_n = (M / \Delta t_{n+1} + (1 - \theta) J_n)^T \lambda_{n+1}.
    /// $$
    ///
    /// The system is returned to its final forward state, with `lambda_N` set as its adjoint solution.
    fn adjoint_solve(&mut self, qois: &QoISet) -> Result<(usize, S::T), DiffstepError> {
        self.adjoint_sweep(qois, None)
    }

    /// Sensitivities of QoIs evaluated at the final state,
    ///
    /// $$
    /// \frac{dQ}{dp} = \frac{\partial Q}{\partial p}(u_N) + \sum_{n=1}^{N} \lambda_n^T \left[\theta \frac{\partial f}{\partial p}(u_n)
    ///   + (1 - \theta) \frac{\partial f}{\partial p}(u_{n-1})\right].
    /// $$
    fn integrate_adjoint_sensitivity(
        &mut self,
        qois: &QoISet,
        params: &ParameterVector,
        sensitivities: &mut SensitivityData<S::T>,
    ) -> Result<(), DiffstepError> {
        self.adjoint_sweep(qois, Some((params, sensitivities)))?;
        Ok(())
    }
}
