use std::{cell::RefCell, rc::Rc};

use crate::{op::steady::SteadyResidual, NonLinearOp, System, TimeSolver, TimeSolverConfig};

use super::TimeSolverCore;

/// A time solver for problems with no time dependence.
///
/// Each solve finds the steady state `f(u, p, t) = 0` of the system. All stepping hooks are no-ops and adjoints
/// are the steady adjoints of the system.
pub struct SteadySolver<S: System + 'static> {
    core: TimeSolverCore<S>,
}

impl<S: System + 'static> SteadySolver<S> {
    pub fn new(system: Rc<RefCell<S>>, config: TimeSolverConfig) -> Self {
        Self {
            core: TimeSolverCore::new(system, config),
        }
    }
}

impl<S: System + 'static> TimeSolver<S> for SteadySolver<S> {
    fn core(&self) -> &TimeSolverCore<S> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TimeSolverCore<S> {
        &mut self.core
    }

    fn residual(&self) -> Box<dyn NonLinearOp<T = S::T>> {
        Box::new(SteadyResidual::new(self.core.system().clone()))
    }

    fn is_steady(&self) -> bool {
        true
    }
}
