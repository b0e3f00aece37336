use std::{cell::RefCell, marker::PhantomData};

use nalgebra::{DMatrix, DVector};

use crate::{NonLinearOp, Op, Scalar};

use super::{dense_jacobian_inplace, OpStatistics};

/// A [NonLinearOp] defined by a residual closure `F(x, y)` (computes `y = R(x)`) and a
/// jacobian action closure `G(x, v, y)` (computes `y = dR/dx(x) v`).
pub struct Closure<T, F, G>
where
    T: Scalar,
    F: Fn(&DVector<T>, &mut DVector<T>),
    G: Fn(&DVector<T>, &DVector<T>, &mut DVector<T>),
{
    func: F,
    jacobian_action: G,
    nstates: usize,
    nout: usize,
    statistics: RefCell<OpStatistics>,
    _phantom: PhantomData<T>,
}

impl<T, F, G> Closure<T, F, G>
where
    T: Scalar,
    F: Fn(&DVector<T>, &mut DVector<T>),
    G: Fn(&DVector<T>, &DVector<T>, &mut DVector<T>),
{
    pub fn new(func: F, jacobian_action: G, nstates: usize, nout: usize) -> Self {
        Self {
            func,
            jacobian_action,
            nstates,
            nout,
            statistics: RefCell::new(OpStatistics::default()),
            _phantom: PhantomData,
        }
    }
}

impl<T, F, G> Op for Closure<T, F, G>
where
    T: Scalar,
    F: Fn(&DVector<T>, &mut DVector<T>),
    G: Fn(&DVector<T>, &DVector<T>, &mut DVector<T>),
{
    type T = T;
    fn nstates(&self) -> usize {
        self.nstates
    }
    fn nout(&self) -> usize {
        self.nout
    }
    fn statistics(&self) -> OpStatistics {
        self.statistics.borrow().clone()
    }
}

impl<T, F, G> NonLinearOp for Closure<T, F, G>
where
    T: Scalar,
    F: Fn(&DVector<T>, &mut DVector<T>),
    G: Fn(&DVector<T>, &DVector<T>, &mut DVector<T>),
{
    fn call_inplace(&self, x: &DVector<T>, y: &mut DVector<T>) {
        self.statistics.borrow_mut().increment_call();
        (self.func)(x, y)
    }

    fn jacobian_inplace(&self, x: &DVector<T>, y: &mut DMatrix<T>) {
        self.statistics.borrow_mut().increment_matrix();
        dense_jacobian_inplace(
            |v, col| {
                self.statistics.borrow_mut().increment_jac_mul();
                (self.jacobian_action)(x, v, col)
            },
            y,
        );
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{DMatrix, DVector};

    use crate::{NonLinearOp, Op};

    use super::Closure;

    #[test]
    fn closure_counts_calls_and_builds_jacobian() {
        // R(x) = x * x - 4
        let op = Closure::new(
            |x: &DVector<f64>, y: &mut DVector<f64>| {
                y.copy_from(&x.component_mul(x));
                y.add_scalar_mut(-4.0);
            },
            |x: &DVector<f64>, v: &DVector<f64>, y: &mut DVector<f64>| {
                y.copy_from(&(x.component_mul(v) * 2.0));
            },
            2,
            2,
        );
        let x = DVector::from_vec(vec![1.0, 3.0]);
        assert_eq!(op.call(&x), DVector::from_vec(vec![-3.0, 5.0]));
        assert_eq!(
            op.jacobian(&x),
            DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 6.0]))
        );
        insta::assert_yaml_snapshot!(op.statistics(), @r###"
        number_of_calls: 1
        number_of_jac_muls: 2
        number_of_matrix_evals: 1
        "###);
    }
}
