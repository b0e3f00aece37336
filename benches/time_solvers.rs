use std::{cell::RefCell, rc::Rc};

use criterion::{criterion_group, criterion_main, Criterion};
use diffstep::{
    EulerSolver, LinearSolverKind, MemorySolutionHistory, OdeSystem, OdeSystemBuilder,
    ParameterVector, QoISet, SensitivityData, TimeSolver, TimeSolverConfig,
};
use nalgebra::DVector;

fn laplacian(x: &DVector<f64>, h2: f64, y: &mut DVector<f64>) {
    let n = x.len();
    for i in 0..n {
        let left = if i > 0 { x[i - 1] } else { 0.0 };
        let right = if i + 1 < n { x[i + 1] } else { 0.0 };
        y[i] = (left - 2.0 * x[i] + right) / h2;
    }
}

fn heat1d(n: usize, deltat: f64) -> OdeSystem<f64> {
    let h = 1.0 / (n as f64 + 1.0);
    let h2 = h * h;
    OdeSystemBuilder::<f64>::new()
        .name("heat1d")
        .deltat(deltat)
        .p([1.0])
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
        .rhs_sens(move |x, _p, _t, v, y| {
            laplacian(x, h2, y);
            *y *= v[0];
        })
        .init(move |_p, _t| {
            DVector::from_fn(n, |i, _| (std::f64::consts::PI * (i as f64 + 1.0) * h).sin())
        })
        .qoi(
            move |x, _p, _t| x.sum() / n as f64,
            move |_x, _p, _t, y| y.fill(1.0 / n as f64),
        )
        .build()
        .unwrap()
}

fn heat1d_solver(
    n: usize,
    theta: f64,
    linear_solver: LinearSolverKind,
) -> EulerSolver<OdeSystem<f64>> {
    let system = Rc::new(RefCell::new(heat1d(n, 0.01)));
    let config = TimeSolverConfig {
        linear_solver,
        ..Default::default()
    };
    let mut solver = EulerSolver::new(system, config, theta);
    solver.set_solution_history(&MemorySolutionHistory::<OdeSystem<f64>>::new());
    solver.init();
    solver.init_data().unwrap();
    solver
}

fn criterion_benchmark(c: &mut Criterion) {
    macro_rules! bench_forward {
        ($name:ident, $n:expr, $theta:expr, $linear_solver:expr) => {
            c.bench_function(stringify!($name), |b| {
                b.iter(|| {
                    let mut solver = heat1d_solver($n, $theta, $linear_solver);
                    solver.solve_to(0.1).unwrap();
                })
            });
        };
    }

    bench_forward!(
        nalgebra_implicit_euler_heat1d_10,
        10,
        1.0,
        LinearSolverKind::NalgebraLu
    );
    bench_forward!(
        nalgebra_implicit_euler_heat1d_100,
        100,
        1.0,
        LinearSolverKind::NalgebraLu
    );
    bench_forward!(
        faer_implicit_euler_heat1d_100,
        100,
        1.0,
        LinearSolverKind::FaerLu
    );
    bench_forward!(
        nalgebra_crank_nicolson_heat1d_100,
        100,
        0.5,
        LinearSolverKind::NalgebraLu
    );

    c.bench_function("nalgebra_adjoint_sensitivity_heat1d_100", |b| {
        let mut solver = heat1d_solver(100, 0.5, LinearSolverKind::NalgebraLu);
        solver.solve_to(0.1).unwrap();
        b.iter(|| {
            let mut sensitivities = SensitivityData::new();
            solver
                .integrate_adjoint_sensitivity(
                    &QoISet::all(),
                    &ParameterVector::all(1),
                    &mut sensitivities,
                )
                .unwrap();
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
