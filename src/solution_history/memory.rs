use std::collections::BTreeMap;

use log::debug;

use crate::{
    error::{DiffstepError, TimeSolverError},
    time_solver_error, SolutionHistory, System,
};

use super::Snapshot;

/// A [SolutionHistory] that keeps every snapshot in memory.
pub struct MemorySolutionHistory<S: System> {
    snapshots: BTreeMap<usize, Snapshot<S>>,
}

impl<S: System> MemorySolutionHistory<S> {
    pub fn new() -> Self {
        Self {
            snapshots: BTreeMap::new(),
        }
    }

    /// The snapshot stored at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Snapshot<S>> {
        self.snapshots.get(&index)
    }

    /// The largest stored index.
    pub fn last_index(&self) -> Option<usize> {
        self.snapshots.keys().next_back().copied()
    }
}

impl<S: System> Default for MemorySolutionHistory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: System> Clone for MemorySolutionHistory<S> {
    fn clone(&self) -> Self {
        Self {
            snapshots: self.snapshots.clone(),
        }
    }
}

impl<S: System + 'static> SolutionHistory<S> for MemorySolutionHistory<S> {
    fn store(&mut self, index: usize, system: &S) {
        debug!("storing snapshot {} of {}", index, system.name());
        self.snapshots.insert(index, Snapshot::capture(system));
    }

    fn retrieve(&self, index: usize, system: &mut S) -> Result<(), DiffstepError> {
        let snapshot = self
            .snapshots
            .get(&index)
            .ok_or(time_solver_error!(HistoryMiss { index: index }))?;
        debug!("retrieving snapshot {} of {}", index, system.name());
        snapshot.restore(system);
        Ok(())
    }

    fn contains(&self, index: usize) -> bool {
        self.snapshots.contains_key(&index)
    }

    fn len(&self) -> usize {
        self.snapshots.len()
    }

    fn clear(&mut self) {
        self.snapshots.clear();
    }

    fn clone_box(&self) -> Box<dyn SolutionHistory<S>> {
        Box::new(self.clone())
    }
}
