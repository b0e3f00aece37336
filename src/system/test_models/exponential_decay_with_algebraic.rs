use nalgebra::{DMatrix, DVector};

use crate::{OdeSystem, OdeSystemBuilder, Scalar};

// exponential decay problem with algebraic constraint
// dy/dt = -ky
// 0 = z - y
// M = | 1 0 |
//     | 0 0 |
// Q = z
pub fn exponential_decay_with_algebraic_system<T: Scalar>(k: f64, deltat: f64) -> OdeSystem<T> {
    let mass = DMatrix::from_diagonal(&DVector::from_vec(vec![T::one(), T::zero()]));
    OdeSystemBuilder::<T>::new()
        .name("exponential_decay_with_algebraic")
        .deltat(deltat)
        .p([k])
        .rhs(
            |x, p, _t, y| {
                y[0] = -p[0] * x[0];
                y[1] = x[1] - x[0];
            },
            |_x, p, _t, v, y| {
                y[0] = -p[0] * v[0];
                y[1] = v[1] - v[0];
            },
        )
        .mass(mass)
        .init(|_p, _t| DVector::from_element(2, T::from_f64(1.0).unwrap()))
        .qoi(
            |x, _p, _t| x[1],
            |_x, _p, _t, y| {
                y[0] = T::zero();
                y[1] = T::one();
            },
        )
        .build()
        .unwrap()
}
