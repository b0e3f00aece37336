use std::cell::RefCell;

use nalgebra::{DMatrix, DVector};
use num_traits::One;

use crate::{op::dense_jacobian_inplace, Communicator, OpStatistics, Scalar, System};

use super::finite_difference_rhs_param_derivative;

pub(crate) type RhsFn<T> = Box<dyn Fn(&DVector<T>, &DVector<T>, T, &mut DVector<T>)>;
pub(crate) type RhsJacFn<T> =
    Box<dyn Fn(&DVector<T>, &DVector<T>, T, &DVector<T>, &mut DVector<T>)>;
pub(crate) type QoiFn<T> = Box<dyn Fn(&DVector<T>, &DVector<T>, T) -> T>;
pub(crate) type QoiGradFn<T> = Box<dyn Fn(&DVector<T>, &DVector<T>, T, &mut DVector<T>)>;

pub(crate) struct Qoi<T: Scalar> {
    pub(crate) value: QoiFn<T>,
    pub(crate) gradient: QoiGradFn<T>,
}

/// A [System] defined by closures, usually created with [crate::OdeSystemBuilder].
///
/// The right-hand side is given as `f(x, p, t, y)` together with its jacobian action
/// `J(x, p, t) v`; the dense jacobian is assembled from the action column by column. If the
/// parameter-jacobian action `df/dp(x, p, t) v` is provided it is used for parameter derivatives,
/// otherwise these fall back to finite differences.
pub struct OdeSystem<T: Scalar> {
    pub(crate) name: String,
    pub(crate) comm: Communicator,
    pub(crate) solution: DVector<T>,
    pub(crate) time: T,
    pub(crate) deltat: T,
    pub(crate) params: DVector<T>,
    pub(crate) rhs: RhsFn<T>,
    pub(crate) rhs_jac: RhsJacFn<T>,
    pub(crate) rhs_sens: Option<RhsJacFn<T>>,
    pub(crate) mass: Option<DMatrix<T>>,
    pub(crate) qois: Vec<Qoi<T>>,
    pub(crate) adjoint_solutions: Vec<Option<DVector<T>>>,
    pub(crate) statistics: RefCell<OpStatistics>,
}

impl<T: Scalar> OdeSystem<T> {
    /// Statistics on the evaluations of the right-hand side and its jacobian.
    pub fn statistics(&self) -> OpStatistics {
        self.statistics.borrow().clone()
    }
}

impl<T: Scalar> System for OdeSystem<T> {
    type T = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn comm(&self) -> &Communicator {
        &self.comm
    }

    fn solution(&self) -> &DVector<T> {
        &self.solution
    }

    fn solution_mut(&mut self) -> &mut DVector<T> {
        &mut self.solution
    }

    fn time(&self) -> T {
        self.time
    }

    fn set_time(&mut self, t: T) {
        self.time = t;
    }

    fn deltat(&self) -> T {
        self.deltat
    }

    fn set_deltat(&mut self, deltat: T) {
        self.deltat = deltat;
    }

    fn params(&self) -> &DVector<T> {
        &self.params
    }

    fn params_mut(&mut self) -> &mut DVector<T> {
        &mut self.params
    }

    fn rhs_inplace(&self, x: &DVector<T>, t: T, y: &mut DVector<T>) {
        self.statistics.borrow_mut().increment_call();
        (self.rhs)(x, &self.params, t, y)
    }

    fn rhs_jacobian_inplace(&self, x: &DVector<T>, t: T, y: &mut DMatrix<T>) {
        self.statistics.borrow_mut().increment_matrix();
        dense_jacobian_inplace(
            |v, col| {
                self.statistics.borrow_mut().increment_jac_mul();
                (self.rhs_jac)(x, &self.params, t, v, col)
            },
            y,
        );
    }

    fn mass(&self) -> Option<&DMatrix<T>> {
        self.mass.as_ref()
    }

    fn nqoi(&self) -> usize {
        self.qois.len()
    }

    fn qoi(&self, index: usize, x: &DVector<T>, t: T) -> T {
        (self.qois[index].value)(x, &self.params, t)
    }

    fn qoi_derivative(&self, index: usize, x: &DVector<T>, t: T, y: &mut DVector<T>) {
        (self.qois[index].gradient)(x, &self.params, t, y)
    }

    fn adjoint_solution(&self, index: usize) -> Option<&DVector<T>> {
        self.adjoint_solutions.get(index).and_then(|z| z.as_ref())
    }

    fn set_adjoint_solution(&mut self, index: usize, z: DVector<T>) {
        if self.adjoint_solutions.len() <= index {
            self.adjoint_solutions.resize(index + 1, None);
        }
        self.adjoint_solutions[index] = Some(z);
    }

    fn rhs_param_derivative(&mut self, x: &DVector<T>, t: T, j: usize, y: &mut DVector<T>) {
        if let Some(rhs_sens) = self.rhs_sens.as_ref() {
            let mut v = DVector::zeros(self.params.len());
            v[j] = T::one();
            rhs_sens(x, &self.params, t, &v, y);
            return;
        }
        finite_difference_rhs_param_derivative(self, x, t, j, y)
    }
}
