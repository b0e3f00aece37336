use std::{cell::RefCell, rc::Rc};

use nalgebra::{DMatrix, DVector};
use num_traits::{One, Zero};

use crate::{NonLinearOp, Op, OpStatistics, Scalar, System};

/// The residual of one step of the theta method applied to `M du/dt = f(u, p, t)`,
///
/// $$
/// R(u) = M \frac{u - u_{old}}{\Delta t} - \theta f(u, t + \Delta t) - (1 - \theta) f(u_{old}, t),
/// $$
///
/// with jacobian `dR/du = M / dt - theta df/du(u, t + dt)`. `M` is the identity if the system has no mass matrix.
/// `theta = 1` gives implicit Euler, `theta = 1/2` Crank–Nicolson.
///
/// The old state, old time and step size are taken from the system when the residual is created, so
/// the system state can be used as the initial guess of the nonlinear solve.
pub struct ThetaResidual<S: System> {
    system: Rc<RefCell<S>>,
    theta: S::T,
    deltat: S::T,
    t_new: S::T,
    u_old: DVector<S::T>,
    // (1 - theta) f(u_old, t)
    explicit_rhs: DVector<S::T>,
    statistics: RefCell<OpStatistics>,
}

impl<S: System> ThetaResidual<S> {
    pub fn new(system: Rc<RefCell<S>>, theta: S::T) -> Self {
        let (deltat, t_new, u_old, explicit_rhs) = {
            let sys = system.borrow();
            let t = sys.time();
            let deltat = sys.deltat();
            let u_old = sys.solution().clone();
            let mut explicit_rhs = DVector::zeros(u_old.len());
            if theta < S::T::one() {
                sys.rhs_inplace(&u_old, t, &mut explicit_rhs);
                explicit_rhs *= S::T::one() - theta;
            }
            (deltat, t + deltat, u_old, explicit_rhs)
        };
        Self {
            system,
            theta,
            deltat,
            t_new,
            u_old,
            explicit_rhs,
            statistics: RefCell::new(OpStatistics::default()),
        }
    }

    pub fn theta(&self) -> S::T {
        self.theta
    }

    pub fn deltat(&self) -> S::T {
        self.deltat
    }
}

/// `y = M x`, or `y = x` if there is no mass matrix.
pub(crate) fn mass_mul<T: Scalar>(mass: Option<&DMatrix<T>>, x: &DVector<T>) -> DVector<T> {
    match mass {
        Some(m) => m * x,
        None => x.clone(),
    }
}

/// `M`, or the identity of size `n` if there is no mass matrix.
pub(crate) fn mass_matrix<T: Scalar>(mass: Option<&DMatrix<T>>, n: usize) -> DMatrix<T> {
    match mass {
        Some(m) => m.clone(),
        None => DMatrix::identity(n, n),
    }
}

impl<S: System> Op for ThetaResidual<S> {
    type T = S::T;
    fn nstates(&self) -> usize {
        self.u_old.len()
    }
    fn statistics(&self) -> OpStatistics {
        self.statistics.borrow().clone()
    }
}

impl<S: System> NonLinearOp for ThetaResidual<S> {
    fn call_inplace(&self, x: &DVector<S::T>, y: &mut DVector<S::T>) {
        self.statistics.borrow_mut().increment_call();
        let sys = self.system.borrow();
        sys.rhs_inplace(x, self.t_new, y);
        *y *= -self.theta;
        *y -= &self.explicit_rhs;
        let du = mass_mul(sys.mass(), &(x - &self.u_old)) / self.deltat;
        *y += du;
    }

    fn jacobian_inplace(&self, x: &DVector<S::T>, y: &mut DMatrix<S::T>) {
        self.statistics.borrow_mut().increment_matrix();
        let sys = self.system.borrow();
        if self.theta > S::T::zero() {
            sys.rhs_jacobian_inplace(x, self.t_new, y);
            *y *= -self.theta;
        } else {
            y.fill(S::T::zero());
        }
        *y += mass_matrix(sys.mass(), x.len()) / self.deltat;
    }
}
