use nalgebra::DVector;

use crate::{OdeSystem, OdeSystemBuilder, Scalar};

// second-difference stencil with homogeneous Dirichlet boundaries, y = (x_{i-1} - 2 x_i + x_{i+1}) / h^2
fn laplacian<T: Scalar>(x: &DVector<T>, h2: T, y: &mut DVector<T>) {
    let n = x.len();
    let two = T::from_f64(2.0).unwrap();
    for i in 0..n {
        let left = if i > 0 { x[i - 1] } else { T::zero() };
        let right = if i + 1 < n { x[i + 1] } else { T::zero() };
        y[i] = (left - two * x[i] + right) / h2;
    }
}

// heat equation on (0, 1) discretised with n interior points
// du/dt = D d^2u/dx^2 (p = [D]), u = 0 on the boundary
// u(x, 0) = sin(pi x)
// Q_0 = mean temperature, Q_1 = temperature at the first interior point
pub fn heat1d_system<T: Scalar>(n: usize, diffusivity: f64, deltat: f64) -> OdeSystem<T> {
    let h = 1.0 / (n as f64 + 1.0);
    let h2 = T::from_f64(h * h).unwrap();
    let inv_n = T::from_f64(1.0 / n as f64).unwrap();
    OdeSystemBuilder::<T>::new()
        .name("heat1d")
        .deltat(deltat)
        .p([diffusivity])
        .rhs(
            move |x, p, _t, y| {
                laplacian(x, h2, y);
                *y *= p[0];
            },
            move |_x, p, _t, v, y| {
                laplacian(v, h2, y);
                *y *= p[0];
            },
        )
        // df/dD v = v_0 L x
        .rhs_sens(move |x, _p, _t, v, y| {
            laplacian(x, h2, y);
            *y *= v[0];
        })
        .init(move |_p, _t| {
            DVector::from_fn(n, |i, _| {
                T::from_f64((std::f64::consts::PI * (i as f64 + 1.0) * h).sin()).unwrap()
            })
        })
        .qoi(
            move |x, _p, _t| x.sum() * inv_n,
            move |_x, _p, _t, y| y.fill(inv_n),
        )
        .qoi(
            |x, _p, _t| x[0],
            |_x, _p, _t, y| {
                y.fill(T::zero());
                y[0] = T::from_f64(1.0).unwrap();
            },
        )
        .build()
        .unwrap()
}
