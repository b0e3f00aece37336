pub mod comm;
pub mod error;
pub mod linear_solver;
pub mod nonlinear_solver;
pub mod op;
pub mod scalar;
pub mod solution_history;
pub mod system;
pub mod time_solver;

pub use comm::Communicator;
pub use error::{
    DiffstepError, LinearSolverError, NonLinearSolverError, SystemError, TimeSolverError,
};
pub use linear_solver::{FaerLU, LinearSolver, LinearSolverKind, NalgebraLU};
pub use nonlinear_solver::{
    convergence::{Convergence, ConvergenceStatus},
    newton::{NewtonConfig, NewtonSolver},
    DiffSolver, DiffSolverStatus, NonLinearSolverStatistics,
};
pub use op::{NonLinearOp, Op, OpStatistics};
pub use scalar::{IndexType, Scalar};
pub use solution_history::{MemorySolutionHistory, NoSolutionHistory, Snapshot, SolutionHistory};
pub use system::{
    builder::OdeSystemBuilder, ode_system::OdeSystem, ParameterVector, QoISet, SensitivityData,
    System,
};
pub use time_solver::{
    config::TimeSolverConfig, euler::EulerSolver, steady::SteadySolver, TimeSolver,
    TimeSolverCore,
};
