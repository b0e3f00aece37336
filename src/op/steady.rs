use std::{cell::RefCell, rc::Rc};

use nalgebra::{DMatrix, DVector};

use crate::{NonLinearOp, Op, OpStatistics, System};

/// The residual of a steady (time independent) system, `R(u) = -f(u, p, t)`, with jacobian `dR/du = -df/du`.
///
/// The time `t` is fixed to the system time when the residual is created.
pub struct SteadyResidual<S: System> {
    system: Rc<RefCell<S>>,
    t: S::T,
    statistics: RefCell<OpStatistics>,
}

impl<S: System> SteadyResidual<S> {
    pub fn new(system: Rc<RefCell<S>>) -> Self {
        let t = system.borrow().time();
        Self {
            system,
            t,
            statistics: RefCell::new(OpStatistics::default()),
        }
    }
}

impl<S: System> Op for SteadyResidual<S> {
    type T = S::T;
    fn nstates(&self) -> usize {
        self.system.borrow().nstates()
    }
    fn statistics(&self) -> OpStatistics {
        self.statistics.borrow().clone()
    }
}

impl<S: System> NonLinearOp for SteadyResidual<S> {
    fn call_inplace(&self, x: &DVector<S::T>, y: &mut DVector<S::T>) {
        self.statistics.borrow_mut().increment_call();
        self.system.borrow().rhs_inplace(x, self.t, y);
        y.neg_mut();
    }

    fn jacobian_inplace(&self, x: &DVector<S::T>, y: &mut DMatrix<S::T>) {
        self.statistics.borrow_mut().increment_matrix();
        self.system.borrow().rhs_jacobian_inplace(x, self.t, y);
        y.neg_mut();
    }
}
