use serde::{Deserialize, Serialize};

use crate::{LinearSolverKind, NewtonConfig};

/// The command-line option that scopes solver naming by system name.
pub const SOLVER_SYSTEM_NAMES_OPTION: &str = "--solver-system-names";

/// Options of a time solver and the solvers it builds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSolverConfig {
    /// Suppress per-step logging.
    pub quiet: bool,
    /// How many times a step may be retried with a halved step size after the nonlinear solver fails.
    pub reduce_deltat_on_diffsolver_failure: u32,
    /// Scope the naming of the linear solver with `"<system name>_"`.
    pub solver_system_names: bool,
    pub newton: NewtonConfig,
    pub linear_solver: LinearSolverKind,
}

impl Default for TimeSolverConfig {
    fn default() -> Self {
        Self {
            quiet: true,
            reduce_deltat_on_diffsolver_failure: 0,
            solver_system_names: false,
            newton: NewtonConfig::default(),
            linear_solver: LinearSolverKind::default(),
        }
    }
}

impl TimeSolverConfig {
    /// Default options, with [Self::solver_system_names] set if `--solver-system-names` appears in `args`.
    /// All other arguments are ignored.
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        let solver_system_names = args
            .into_iter()
            .any(|arg| arg.as_ref() == SOLVER_SYSTEM_NAMES_OPTION);
        Self {
            solver_system_names,
            ..Default::default()
        }
    }

    /// The prefix passed to the linear solver's `init` for a system called `system_name`.
    pub fn solver_prefix(&self, system_name: &str) -> Option<String> {
        if self.solver_system_names {
            Some(format!("{}_", system_name))
        } else {
            None
        }
    }
}
