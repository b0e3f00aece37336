use crate::{error::DiffstepError, SolutionHistory, System};

/// A [SolutionHistory] that records nothing.
///
/// Storing is a no-op and retrieving always succeeds without touching the system, so a time solver with this history
/// can only step forwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSolutionHistory;

impl<S: System> SolutionHistory<S> for NoSolutionHistory {
    fn store(&mut self, _index: usize, _system: &S) {}

    fn retrieve(&self, _index: usize, _system: &mut S) -> Result<(), DiffstepError> {
        Ok(())
    }

    fn contains(&self, _index: usize) -> bool {
        false
    }

    fn len(&self) -> usize {
        0
    }

    fn clear(&mut self) {}

    fn clone_box(&self) -> Box<dyn SolutionHistory<S>> {
        Box::new(*self)
    }
}
