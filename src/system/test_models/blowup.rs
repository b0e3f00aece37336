use nalgebra::DVector;

use crate::{OdeSystem, OdeSystemBuilder, Scalar};

// quadratic blow-up problem
// dy/dt = y^2, y(0) = 1
// an implicit Euler step y - dt y^2 = y_old only has a real root if 4 dt y_old <= 1,
// so large steps make the nonlinear solve fail
pub fn blowup_system<T: Scalar>(deltat: f64) -> OdeSystem<T> {
    let two = T::from_f64(2.0).unwrap();
    OdeSystemBuilder::<T>::new()
        .name("blowup")
        .deltat(deltat)
        .rhs(
            |x, _p, _t, y| y[0] = x[0] * x[0],
            move |x, _p, _t, v, y| y[0] = two * x[0] * v[0],
        )
        .init(|_p, _t| DVector::from_element(1, T::from_f64(1.0).unwrap()))
        .qoi(|x, _p, _t| x[0], |_x, _p, _t, y| y[0] = T::from_f64(1.0).unwrap())
        .build()
        .unwrap()
}
