use nalgebra::DVector;

use crate::{OdeSystem, OdeSystemBuilder, Scalar};

// exponential decay problem
// dy/dt = -ky (p = [k]), y(0) = y0, Q = y
pub fn exponential_decay_system<T: Scalar>(k: f64, y0: f64, deltat: f64) -> OdeSystem<T> {
    OdeSystemBuilder::<T>::new()
        .name("exponential_decay")
        .deltat(deltat)
        .p([k])
        .rhs(
            |x, p, _t, y| y[0] = -p[0] * x[0],
            |_x, p, _t, v, y| y[0] = -p[0] * v[0],
        )
        // df/dp v = -y v
        .rhs_sens(|x, _p, _t, v, y| y[0] = -x[0] * v[0])
        .init(move |_p, _t| DVector::from_element(1, T::from_f64(y0).unwrap()))
        .qoi(|x, _p, _t| x[0], |_x, _p, _t, y| y[0] = T::one())
        .build()
        .unwrap()
}

// exponential decay towards a source term
// dy/dt = -ky + s (p = [k, s]), y(0) = 0, Q = y
// no parameter-jacobian given, so parameter derivatives use finite differences
pub fn source_decay_system<T: Scalar>(k: f64, s: f64, deltat: f64) -> OdeSystem<T> {
    OdeSystemBuilder::<T>::new()
        .name("source_decay")
        .deltat(deltat)
        .p([k, s])
        .rhs(
            |x, p, _t, y| y[0] = -p[0] * x[0] + p[1],
            |_x, p, _t, v, y| y[0] = -p[0] * v[0],
        )
        .init(|_p, _t| DVector::from_element(1, T::zero()))
        .qoi(|x, _p, _t| x[0], |_x, _p, _t, y| y[0] = T::one())
        .build()
        .unwrap()
}

/// `y_N` after `nsteps` steps of size `dt` of the theta method applied to `dy/dt = -ky`, `y(0) = 1`,
/// together with its derivative with respect to `k`.
pub fn theta_decay_solution(k: f64, dt: f64, theta: f64, nsteps: i32) -> (f64, f64) {
    let a = 1.0 - (1.0 - theta) * k * dt;
    let b = 1.0 + theta * k * dt;
    let r = a / b;
    let dr_dk = (-(1.0 - theta) * dt * b - a * theta * dt) / (b * b);
    let y = r.powi(nsteps);
    let dy_dk = f64::from(nsteps) * r.powi(nsteps - 1) * dr_dk;
    (y, dy_dk)
}
