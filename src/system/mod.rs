use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};

use crate::{
    error::{DiffstepError, SystemError},
    linear_solver::{self, LinearSolverKind},
    scalar::{abs, constant},
    system_error, Communicator, Scalar,
};

pub mod builder;
pub mod ode_system;
pub mod qoi;

#[cfg(test)]
pub mod test_models;

pub use qoi::{ParameterVector, QoISet, SensitivityData};

/// Relative size of the parameter perturbation used for finite-difference parameter derivatives.
const PARAMETER_PERTURBATION: f64 = 1e-6;

/// A semi-discretised differential system `M du/dt = f(u, p, t)`.
///
/// The system owns the current state vector `u`, the current time, the current step size `deltat`,
/// the parameter vector `p`, a display name and a [Communicator]. Time solvers hold a shared
/// handle on a system and nonlinear solvers overwrite its state in place. A system may also define a
/// number of scalar quantities of interest (QoIs) `Q_i(u, p, t)`, for which it can compute steady-state
/// adjoints and parameter sensitivities.
///
/// The mass matrix `M` is optional (identity when absent) and may be singular, in which case the
/// zero rows of `M` are algebraic constraints.
pub trait System {
    type T: Scalar;

    /// Name of the system, used to scope solver naming.
    fn name(&self) -> &str;

    /// The process group the system is distributed over.
    fn comm(&self) -> &Communicator;

    /// Number of states, i.e. the length of the solution vector.
    fn nstates(&self) -> usize {
        self.solution().len()
    }

    /// The current state vector.
    fn solution(&self) -> &DVector<Self::T>;

    fn solution_mut(&mut self) -> &mut DVector<Self::T>;

    fn time(&self) -> Self::T;

    fn set_time(&mut self, t: Self::T);

    /// The current step size.
    fn deltat(&self) -> Self::T;

    fn set_deltat(&mut self, deltat: Self::T);

    fn params(&self) -> &DVector<Self::T>;

    fn params_mut(&mut self) -> &mut DVector<Self::T>;

    fn nparams(&self) -> usize {
        self.params().len()
    }

    /// Evaluate the right-hand side `y = f(x, p, t)`.
    fn rhs_inplace(&self, x: &DVector<Self::T>, t: Self::T, y: &mut DVector<Self::T>);

    /// Evaluate the jacobian of the right-hand side `y = df/dx(x, p, t)`.
    fn rhs_jacobian_inplace(&self, x: &DVector<Self::T>, t: Self::T, y: &mut DMatrix<Self::T>);

    /// The constant mass matrix `M`, `None` for the identity.
    fn mass(&self) -> Option<&DMatrix<Self::T>> {
        None
    }

    /// Number of quantities of interest defined on the system.
    fn nqoi(&self) -> usize;

    /// Evaluate QoI `index` at `(x, t)`.
    fn qoi(&self, index: usize, x: &DVector<Self::T>, t: Self::T) -> Self::T;

    /// Evaluate the gradient `y = dQ_index/dx(x, p, t)`.
    fn qoi_derivative(
        &self,
        index: usize,
        x: &DVector<Self::T>,
        t: Self::T,
        y: &mut DVector<Self::T>,
    );

    /// The adjoint solution last computed for QoI `index`, if any.
    fn adjoint_solution(&self, index: usize) -> Option<&DVector<Self::T>>;

    fn set_adjoint_solution(&mut self, index: usize, z: DVector<Self::T>);

    /// Compute `y = df/dp_j(x, p, t)` for parameter `j`.
    ///
    /// The default implementation uses central differences, perturbing `p_j` by
    /// `1e-6 * max(|p_j|, 1)` and restoring it exactly afterwards.
    fn rhs_param_derivative(
        &mut self,
        x: &DVector<Self::T>,
        t: Self::T,
        j: usize,
        y: &mut DVector<Self::T>,
    ) {
        finite_difference_rhs_param_derivative(self, x, t, j, y)
    }

    /// Compute `dQ_index/dp_j(x, p, t)` for parameter `j`, by default with central differences.
    fn qoi_param_derivative(
        &mut self,
        index: usize,
        x: &DVector<Self::T>,
        t: Self::T,
        j: usize,
    ) -> Self::T {
        let mut q_plus = Self::T::zero();
        let mut q_minus = Self::T::zero();
        let delta = perturb_parameter(
            self,
            j,
            |sys| q_plus = sys.qoi(index, x, t),
            |sys| q_minus = sys.qoi(index, x, t),
        );
        (q_plus - q_minus) / (delta + delta)
    }

    /// Steady-state adjoint solve.
    ///
    /// Treats the system as time independent, with residual `R(u) = -f(u, p, t)`, and for each QoI in
    /// `qois` solves `(dR/du)^T z = dQ/du` at the current state. The adjoint solutions are stored on
    /// the system (see [System::adjoint_solution]). Returns the number of linear solves performed and
    /// the largest residual norm `|(dR/du)^T z - dQ/du|` among them.
    fn adjoint_solve(&mut self, qois: &QoISet) -> Result<(usize, Self::T), DiffstepError> {
        let indices = qois.resolve(self.nqoi())?;
        let n = self.nstates();
        let x = self.solution().clone();
        let t = self.time();

        let mut jac = DMatrix::zeros(n, n);
        self.rhs_jacobian_inplace(&x, t, &mut jac);
        // (dR/du)^T = -J^T
        let adjoint_matrix = -jac.transpose();

        let mut linear_solver = linear_solver::build(*self.comm(), LinearSolverKind::default());
        linear_solver.init(None);
        linear_solver.set_matrix(&adjoint_matrix)?;

        let mut iterations = 0;
        let mut max_residual = Self::T::zero();
        let mut rhs = DVector::zeros(n);
        for i in indices {
            self.qoi_derivative(i, &x, t, &mut rhs);
            let z = linear_solver.solve(&rhs)?;
            let residual = (&adjoint_matrix * &z - &rhs).norm();
            if residual > max_residual {
                max_residual = residual;
            }
            iterations += 1;
            self.set_adjoint_solution(i, z);
        }
        Ok((iterations, max_residual))
    }

    /// Steady-state adjoint parameter sensitivities.
    ///
    /// Runs [System::adjoint_solve] for `qois`, then for each QoI `i` and each parameter at position `k`
    /// of `params` computes
    ///
    /// $$
    /// \frac{dQ_i}{dp_k} = \frac{\partial Q_i}{\partial p_k} - z_i^T \frac{\partial R}{\partial p_k}
    ///                  = \frac{\partial Q_i}{\partial p_k} + z_i^T \frac{\partial f}{\partial p_k}
    /// $$
    ///
    /// and writes it into `sensitivities`.
    fn adjoint_qoi_parameter_sensitivity(
        &mut self,
        qois: &QoISet,
        params: &ParameterVector,
        sensitivities: &mut SensitivityData<Self::T>,
    ) -> Result<(), DiffstepError> {
        let indices = qois.resolve(self.nqoi())?;
        params.check(self.nparams())?;
        self.adjoint_solve(qois)?;

        let x = self.solution().clone();
        let t = self.time();
        sensitivities.allocate(self.nqoi(), params.len());
        let mut f_p = DVector::zeros(self.nstates());
        for (k, j) in params.iter().enumerate() {
            self.rhs_param_derivative(&x, t, j, &mut f_p);
            for &i in indices.iter() {
                let q_p = self.qoi_param_derivative(i, &x, t, j);
                let z_f_p = self
                    .adjoint_solution(i)
                    .map(|z| z.dot(&f_p))
                    .ok_or_else(|| system_error!(Other, format!("no adjoint solution for QoI {}", i)))?;
                sensitivities.set_derivative(i, k, q_p + z_f_p);
            }
        }
        Ok(())
    }
}

/// Central-difference approximation of `df/dp_j`, see [System::rhs_param_derivative].
pub(crate) fn finite_difference_rhs_param_derivative<S: System + ?Sized>(
    system: &mut S,
    x: &DVector<S::T>,
    t: S::T,
    j: usize,
    y: &mut DVector<S::T>,
) {
    let n = y.len();
    let mut f_plus = DVector::zeros(n);
    let mut f_minus = DVector::zeros(n);
    let delta = perturb_parameter(
        system,
        j,
        |sys| sys.rhs_inplace(x, t, &mut f_plus),
        |sys| sys.rhs_inplace(x, t, &mut f_minus),
    );
    y.copy_from(&((f_plus - f_minus) / (delta + delta)));
}

/// Evaluate `plus` and `minus` with parameter `j` perturbed up and down, restoring the parameter
/// afterwards. Returns the perturbation size.
fn perturb_parameter<S: System + ?Sized>(
    system: &mut S,
    j: usize,
    plus: impl FnOnce(&S),
    minus: impl FnOnce(&S),
) -> S::T {
    let p = system.params()[j];
    let magnitude = if abs(p) > S::T::one() { abs(p) } else { S::T::one() };
    let delta = constant::<S::T>(PARAMETER_PERTURBATION) * magnitude;
    system.params_mut()[j] = p + delta;
    plus(&*system);
    system.params_mut()[j] = p - delta;
    minus(&*system);
    system.params_mut()[j] = p;
    delta
}

#[cfg(test)]
mod tests {
    use nalgebra::DVector;

    use super::test_models::exponential_decay::{exponential_decay_system, source_decay_system};
    use crate::{ParameterVector, QoISet, SensitivityData, System};

    #[test]
    fn finite_difference_parameter_derivatives() {
        // f = -k u, Q = u
        let mut sys = exponential_decay_system::<f64>(0.5, 2.0, 0.1);
        let x = DVector::from_vec(vec![3.0]);
        let mut y = DVector::zeros(1);
        sys.rhs_param_derivative(&x, 0.0, 0, &mut y);
        assert!((y[0] + 3.0).abs() < 1e-8);
        assert_eq!(sys.params()[0], 0.5);
        assert!(sys.qoi_param_derivative(0, &x, 0.0, 0).abs() < 1e-12);
    }

    #[test]
    fn steady_adjoint_solve() {
        // steady state of du/dt = -k u + s is u = s / k
        let (k, s) = (2.0, 3.0);
        let mut sys = source_decay_system::<f64>(k, s, 0.1);
        sys.solution_mut()[0] = s / k;
        let (iterations, residual) = sys.adjoint_solve(&QoISet::all()).unwrap();
        assert_eq!(iterations, 1);
        assert!(residual < 1e-12);
        // (dR/du)^T z = dQ/du  =>  k z = 1
        let z = sys.adjoint_solution(0).unwrap();
        assert!((z[0] - 1.0 / k).abs() < 1e-12);
    }

    #[test]
    fn steady_adjoint_sensitivity() {
        let (k, s) = (2.0, 3.0);
        let mut sys = source_decay_system::<f64>(k, s, 0.1);
        sys.solution_mut()[0] = s / k;
        let mut sens = SensitivityData::new();
        sys.adjoint_qoi_parameter_sensitivity(&QoISet::all(), &ParameterVector::all(2), &mut sens)
            .unwrap();
        // Q = s / k
        assert!((sens.derivative(0, 0) + s / (k * k)).abs() < 1e-6);
        assert!((sens.derivative(0, 1) - 1.0 / k).abs() < 1e-6);
    }

    #[test]
    fn adjoint_solve_rejects_unknown_qoi() {
        let mut sys = exponential_decay_system::<f64>(0.5, 2.0, 0.1);
        assert!(sys.adjoint_solve(&QoISet::from_indices([3])).is_err());
        let mut sens = SensitivityData::new();
        assert!(sys
            .adjoint_qoi_parameter_sensitivity(
                &QoISet::all(),
                &ParameterVector::new([7]),
                &mut sens
            )
            .is_err());
    }
}
