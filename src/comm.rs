use serde::{Deserialize, Serialize};

/// A handle on the group of processes a [crate::System] is distributed over.
///
/// Linear solvers are constructed from the communicator of the system they will solve for.
/// Diffstep itself only runs serially, so the default communicator is a single process of rank 0,
/// but solvers are free to use the rank and size to partition their work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Communicator {
    rank: usize,
    size: usize,
}

impl Communicator {
    /// A communicator containing only the current process.
    pub fn serial() -> Self {
        Self { rank: 0, size: 1 }
    }

    /// Create a communicator for process `rank` out of `size` processes.
    ///
    /// # Panics
    ///
    /// Panics if `rank >= size`.
    pub fn new(rank: usize, size: usize) -> Self {
        assert!(
            rank < size,
            "Communicator rank {} out of range for size {}",
            rank,
            size
        );
        Self { rank, size }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// True on the process responsible for reporting (rank 0).
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }
}

impl Default for Communicator {
    fn default() -> Self {
        Self::serial()
    }
}
