use std::cell::RefCell;

use nalgebra::{DMatrix, DVector};
use num_traits::{FromPrimitive, One, Zero};

use crate::{
    error::{DiffstepError, SystemError},
    scalar::to_f64,
    system_error, Communicator, OpStatistics, Scalar,
};

use super::ode_system::{OdeSystem, Qoi, RhsFn, RhsJacFn};

type InitFn<T> = Box<dyn Fn(&DVector<T>, T) -> DVector<T>>;

/// Builder for [OdeSystem]s. Use methods to set the equations and options and then call [Self::build] when done.
///
/// # Example
///
/// ```rust
/// use diffstep::{OdeSystemBuilder, System};
/// use nalgebra::DVector;
///
/// let system = OdeSystemBuilder::<f64>::new()
///     .name("decay")
///     .deltat(0.1)
///     .p([0.5])
///     .rhs(
///         // dy/dt = -ay
///         |x, p, _t, y| y[0] = -p[0] * x[0],
///         // Jv = -av
///         |_x, p, _t, v, y| y[0] = -p[0] * v[0],
///     )
///     // y(0) = 1
///     .init(|_p, _t| DVector::from_element(1, 1.0))
///     // Q = y
///     .qoi(|x, _p, _t| x[0], |_x, _p, _t, y| y[0] = 1.0)
///     .build()
///     .unwrap();
///
/// assert_eq!(system.nstates(), 1);
/// assert_eq!(system.name(), "decay");
/// ```
pub struct OdeSystemBuilder<T: Scalar = f64> {
    name: String,
    comm: Communicator,
    t0: T,
    deltat: T,
    p: Vec<T>,
    rhs: Option<(RhsFn<T>, RhsJacFn<T>)>,
    rhs_sens: Option<RhsJacFn<T>>,
    mass: Option<DMatrix<T>>,
    init: Option<InitFn<T>>,
    qois: Vec<Qoi<T>>,
}

impl Default for OdeSystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> OdeSystemBuilder<T> {
    /// Create a new builder with default parameters:
    /// - name = "system"
    /// - comm = [Communicator::serial]
    /// - t0 = 0.0
    /// - deltat = 1.0
    /// - p = []
    pub fn new() -> Self {
        Self {
            name: "system".to_string(),
            comm: Communicator::serial(),
            t0: T::zero(),
            deltat: T::one(),
            p: vec![],
            rhs: None,
            rhs_sens: None,
            mass: None,
            init: None,
            qois: vec![],
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn comm(mut self, comm: Communicator) -> Self {
        self.comm = comm;
        self
    }

    pub fn t0(mut self, t0: f64) -> Self {
        self.t0 = T::from_f64(t0).unwrap();
        self
    }

    /// Set the initial step size.
    pub fn deltat(mut self, deltat: f64) -> Self {
        self.deltat = T::from_f64(deltat).unwrap();
        self
    }

    pub fn p<P: IntoIterator<Item = f64>>(mut self, p: P) -> Self {
        self.p = p.into_iter().map(|x| T::from_f64(x).unwrap()).collect();
        self
    }

    /// Set the right-hand side of the ODE.
    ///
    /// # Arguments
    ///
    /// - `rhs`: Function of type Fn(x: &V, p: &V, t: T, y: &mut V) that computes the right-hand side of the ODE.
    /// - `rhs_jac`: Function of type Fn(x: &V, p: &V, t: T, v: &V, y: &mut V) that computes the multiplication of the jacobian of the right-hand side with the vector v.
    pub fn rhs<F, G>(mut self, rhs: F, rhs_jac: G) -> Self
    where
        F: Fn(&DVector<T>, &DVector<T>, T, &mut DVector<T>) + 'static,
        G: Fn(&DVector<T>, &DVector<T>, T, &DVector<T>, &mut DVector<T>) + 'static,
    {
        self.rhs = Some((Box::new(rhs), Box::new(rhs_jac)));
        self
    }

    /// Set the action of the parameter-jacobian of the right-hand side.
    ///
    /// # Arguments
    ///
    /// - `rhs_sens`: Function of type Fn(x: &V, p: &V, t: T, v: &V, y: &mut V) that computes `y = df/dp v`, where `v` has the length of the parameter vector.
    pub fn rhs_sens<H>(mut self, rhs_sens: H) -> Self
    where
        H: Fn(&DVector<T>, &DVector<T>, T, &DVector<T>, &mut DVector<T>) + 'static,
    {
        self.rhs_sens = Some(Box::new(rhs_sens));
        self
    }

    /// Set a constant mass matrix `M` for the system `M dy/dt = f(y, p, t)`.
    pub fn mass(mut self, mass: DMatrix<T>) -> Self {
        self.mass = Some(mass);
        self
    }

    /// Set the initial condition.
    ///
    /// # Arguments
    ///
    /// - `init`: Function of type Fn(p: &V, t: T) -> V that computes the initial state. Its length sets the number of states.
    pub fn init<I>(mut self, init: I) -> Self
    where
        I: Fn(&DVector<T>, T) -> DVector<T> + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }

    /// Add a quantity of interest. QoIs are numbered in the order they are added.
    ///
    /// # Arguments
    ///
    /// - `value`: Function of type Fn(x: &V, p: &V, t: T) -> T evaluating the QoI.
    /// - `gradient`: Function of type Fn(x: &V, p: &V, t: T, y: &mut V) computing the gradient of the QoI with respect to `x`.
    pub fn qoi<Q, D>(mut self, value: Q, gradient: D) -> Self
    where
        Q: Fn(&DVector<T>, &DVector<T>, T) -> T + 'static,
        D: Fn(&DVector<T>, &DVector<T>, T, &mut DVector<T>) + 'static,
    {
        self.qois.push(Qoi {
            value: Box::new(value),
            gradient: Box::new(gradient),
        });
        self
    }

    pub fn build(self) -> Result<OdeSystem<T>, DiffstepError> {
        let (rhs, rhs_jac) = self.rhs.ok_or(system_error!(MissingRhs))?;
        let init = self.init.ok_or(system_error!(MissingInit))?;
        if !(self.deltat > T::zero() && self.deltat < T::INFINITY) {
            return Err(system_error!(InvalidStepSize, to_f64(self.deltat)));
        }
        let params = DVector::from_vec(self.p);
        let solution = init(&params, self.t0);
        let nstates = solution.len();
        if nstates == 0 {
            return Err(system_error!(InitLengthMismatch {
                expected: 1,
                got: 0
            }));
        }
        if let Some(mass) = self.mass.as_ref() {
            if mass.nrows() != nstates || mass.ncols() != nstates {
                return Err(system_error!(MassShapeMismatch {
                    nrows: mass.nrows(),
                    ncols: mass.ncols(),
                    nstates: nstates
                }));
            }
        }
        Ok(OdeSystem {
            name: self.name,
            comm: self.comm,
            solution,
            time: self.t0,
            deltat: self.deltat,
            params,
            rhs,
            rhs_jac,
            rhs_sens: self.rhs_sens,
            mass: self.mass,
            qois: self.qois,
            adjoint_solutions: Vec::new(),
            statistics: RefCell::new(OpStatistics::default()),
        })
    }
}
