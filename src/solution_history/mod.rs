use nalgebra::DVector;

use crate::{error::DiffstepError, System};

pub mod memory;
pub mod no_history;

pub use memory::MemorySolutionHistory;
pub use no_history::NoSolutionHistory;

/// A snapshot of a system at one time index: its state vector, time and step size.
pub struct Snapshot<S: System> {
    pub solution: DVector<S::T>,
    pub time: S::T,
    pub deltat: S::T,
}

impl<S: System> Clone for Snapshot<S> {
    fn clone(&self) -> Self {
        Self {
            solution: self.solution.clone(),
            time: self.time,
            deltat: self.deltat,
        }
    }
}

impl<S: System> Snapshot<S> {
    pub fn capture(system: &S) -> Self {
        Self {
            solution: system.solution().clone(),
            time: system.time(),
            deltat: system.deltat(),
        }
    }

    pub fn restore(&self, system: &mut S) {
        system.solution_mut().copy_from(&self.solution);
        system.set_time(self.time);
        system.set_deltat(self.deltat);
    }
}

/// A record of the trajectory of a [System], keyed by time index.
///
/// Time solvers store a snapshot after every committed step and retrieve them in reverse order during adjoint
/// sweeps. A history handed to a time solver is always copied with [SolutionHistory::clone_box], so the solver
/// never shares history state with its caller.
pub trait SolutionHistory<S: System> {
    /// Capture the current state of `system` against `index`, replacing any earlier snapshot at that index.
    fn store(&mut self, index: usize, system: &S);

    /// Overwrite the state of `system` with the snapshot stored at `index`.
    fn retrieve(&self, index: usize, system: &mut S) -> Result<(), DiffstepError>;

    fn contains(&self, index: usize) -> bool;

    /// Number of stored snapshots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// An independent deep copy of this history.
    fn clone_box(&self) -> Box<dyn SolutionHistory<S>>;
}

impl<S: System> Clone for Box<dyn SolutionHistory<S>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
