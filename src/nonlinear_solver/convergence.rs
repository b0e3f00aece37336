use nalgebra::{ComplexField, DVector};
use num_traits::One;

use crate::{
    scalar::{abs, constant, IndexType},
    Scalar,
};

/// Rate-based convergence test for Newton iterations.
///
/// The update `dy` of each iteration is measured in the weighted norm `|dy / (|y0| rtol + atol)|`, where `y0`
/// is the state the iteration started from. The iteration has converged once the estimated remaining error
/// `rate / (1 - rate) |dy|` drops below `tol = 0.5 sqrt(rtol)` (clamped to `[10 eps / rtol, 0.03]`).
#[derive(Clone, Debug)]
pub struct Convergence<T: Scalar> {
    rtol: T,
    atol: T,
    tol: T,
    max_iter: IndexType,
    iter: IndexType,
    scale: Option<DVector<T>>,
    old_norm: Option<T>,
    last_norm: Option<T>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    Diverged,
    Continue,
    MaximumIterations,
}

impl<T: Scalar> Convergence<T> {
    pub fn new(rtol: T, atol: T, max_iter: IndexType) -> Self {
        let minimum_tol = constant::<T>(10.0) * T::EPSILON / rtol;
        let maximum_tol = constant::<T>(0.03);
        let mut tol = constant::<T>(0.5) * ComplexField::sqrt(rtol);
        if tol > maximum_tol {
            tol = maximum_tol;
        }
        if tol < minimum_tol {
            tol = minimum_tol;
        }
        Self {
            rtol,
            atol,
            tol,
            max_iter,
            scale: None,
            old_norm: None,
            last_norm: None,
            iter: 0,
        }
    }

    pub fn tol(&self) -> T {
        self.tol
    }

    pub fn max_iter(&self) -> IndexType {
        self.max_iter
    }

    pub fn niter(&self) -> IndexType {
        self.iter
    }

    /// The weighted norm of the last update passed to [Self::check_new_iteration].
    pub fn last_norm(&self) -> Option<T> {
        self.last_norm
    }

    pub fn reset(&mut self, y: &DVector<T>) {
        self.scale = Some(y.map(|yi| abs(yi) * self.rtol + self.atol));
        self.iter = 0;
        self.old_norm = None;
        self.last_norm = None;
    }

    pub fn check_new_iteration(&mut self, dy: &DVector<T>) -> ConvergenceStatus {
        let scale = match self.scale.as_ref() {
            Some(scale) => scale,
            None => panic!("Convergence::check_new_iteration() called before Convergence::reset()"),
        };
        let norm = dy.component_div(scale).norm();
        self.last_norm = Some(norm);
        // if norm is zero then we are done
        if norm <= T::EPSILON {
            return ConvergenceStatus::Converged;
        }
        if let Some(old_norm) = self.old_norm {
            let rate = norm / old_norm;

            if rate > T::one() {
                return ConvergenceStatus::Diverged;
            }

            // if converged then break out of iteration successfully
            if rate / (T::one() - rate) * norm < self.tol {
                return ConvergenceStatus::Converged;
            }

            // if iteration is not going to converge in max_iter
            // (assuming the current rate), then abort
            let remaining = i32::try_from(self.max_iter - self.iter).unwrap_or(i32::MAX);
            if ComplexField::powi(rate, remaining) / (T::one() - rate) * norm > self.tol {
                return ConvergenceStatus::Diverged;
            }
        }
        self.iter += 1;
        self.old_norm = Some(norm);
        if self.iter >= self.max_iter {
            ConvergenceStatus::MaximumIterations
        } else {
            ConvergenceStatus::Continue
        }
    }
}
