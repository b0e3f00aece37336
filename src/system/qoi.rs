use std::collections::BTreeSet;

use num_traits::Zero;

use crate::{
    error::{DiffstepError, SystemError},
    system_error, Scalar,
};

/// A set of quantity-of-interest (QoI) indices.
///
/// An empty-constructed set ([QoISet::all]) refers to every QoI of the system it is applied to,
/// so it can be created without knowing how many QoIs a system defines.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QoISet {
    indices: Option<BTreeSet<usize>>,
}

impl QoISet {
    /// The set of all QoIs of a system.
    pub fn all() -> Self {
        Self { indices: None }
    }

    /// A set containing exactly the given indices.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            indices: Some(indices.into_iter().collect()),
        }
    }

    /// Add a QoI to the set. Adding to an "all" set is a no-op.
    pub fn add_index(&mut self, index: usize) {
        if let Some(indices) = self.indices.as_mut() {
            indices.insert(index);
        }
    }

    /// Remove a QoI from an explicit set.
    pub fn remove_index(&mut self, index: usize) {
        if let Some(indices) = self.indices.as_mut() {
            indices.remove(&index);
        }
    }

    pub fn has_index(&self, index: usize) -> bool {
        match &self.indices {
            None => true,
            Some(indices) => indices.contains(&index),
        }
    }

    /// Resolve the set against a system with `nqoi` QoIs, returning the selected indices in
    /// increasing order.
    pub fn resolve(&self, nqoi: usize) -> Result<Vec<usize>, DiffstepError> {
        match &self.indices {
            None => Ok((0..nqoi).collect()),
            Some(indices) => {
                if let Some(&index) = indices.iter().find(|&&i| i >= nqoi) {
                    return Err(system_error!(QoiIndexOutOfRange { index: index, nqoi: nqoi }));
                }
                Ok(indices.iter().copied().collect())
            }
        }
    }

    /// Number of QoIs selected from a system with `nqoi` QoIs.
    pub fn size(&self, nqoi: usize) -> usize {
        match &self.indices {
            None => nqoi,
            Some(indices) => indices.iter().filter(|&&i| i < nqoi).count(),
        }
    }
}

/// An ordered selection of the parameters of a system, given as indices into the
/// system parameter vector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterVector {
    indices: Vec<usize>,
}

impl ParameterVector {
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            indices: indices.into_iter().collect(),
        }
    }

    /// Every parameter of a system with `nparams` parameters, in order.
    pub fn all(nparams: usize) -> Self {
        Self::new(0..nparams)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The system parameter index at position `k`.
    pub fn get(&self, k: usize) -> Option<usize> {
        self.indices.get(k).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn push(&mut self, index: usize) {
        self.indices.push(index);
    }

    /// Check that every index refers to a parameter of a system with `nparams` parameters.
    pub fn check(&self, nparams: usize) -> Result<(), DiffstepError> {
        match self.indices.iter().find(|&&i| i >= nparams) {
            Some(&index) => Err(system_error!(ParameterIndexOutOfRange {
                index: index,
                nparams: nparams
            })),
            None => Ok(()),
        }
    }
}

/// Sensitivities `dQ_i/dp_k` of QoIs with respect to parameters.
///
/// Rows are indexed by QoI index, columns by position in the [ParameterVector] the
/// sensitivities were computed for.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensitivityData<T: Scalar> {
    values: Vec<Vec<T>>,
}

impl<T: Scalar> SensitivityData<T> {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Size the table for `nqoi` QoIs and `nparams` parameters, zeroing every entry.
    pub fn allocate(&mut self, nqoi: usize, nparams: usize) {
        self.values = vec![vec![T::zero(); nparams]; nqoi];
    }

    pub fn nqoi(&self) -> usize {
        self.values.len()
    }

    pub fn nparams(&self) -> usize {
        self.values.first().map(|row| row.len()).unwrap_or(0)
    }

    /// `dQ_qoi/dp` for the parameter at position `param` of the parameter vector.
    ///
    /// # Panics
    ///
    /// Panics if the entry was not allocated.
    pub fn derivative(&self, qoi: usize, param: usize) -> T {
        self.values[qoi][param]
    }

    pub fn set_derivative(&mut self, qoi: usize, param: usize, value: T) {
        self.values[qoi][param] = value;
    }

    pub fn get(&self, qoi: usize, param: usize) -> Option<T> {
        self.values.get(qoi).and_then(|row| row.get(param)).copied()
    }
}
