use thiserror::Error;

/// Custom error type for Diffstep
///
/// This error type is used to wrap all possible errors that can occur when using Diffstep
#[derive(Error, Debug)]
pub enum DiffstepError {
    #[error("Linear solver error: {0}")]
    LinearSolverError(#[from] LinearSolverError),
    #[error("Non-linear solver error: {0}")]
    NonLinearSolverError(#[from] NonLinearSolverError),
    #[error("Time solver error: {0}")]
    TimeSolverError(#[from] TimeSolverError),
    #[error("System error: {0}")]
    SystemError(#[from] SystemError),
    #[error("Other error: {0}")]
    Other(String),
}

impl DiffstepError {
    /// True if this error is a convergence failure of the nonlinear solver, i.e. the kind of
    /// failure a time-stepping scheme may recover from by retrying with a smaller step.
    pub fn is_convergence_failure(&self) -> bool {
        matches!(self, DiffstepError::NonLinearSolverError(_))
    }
}

/// Possible errors that can occur when solving a linear problem
#[derive(Error, Debug)]
pub enum LinearSolverError {
    #[error("Linear solver not initialised, call init() first")]
    NotInitialized,
    #[error("LU not initialized")]
    LuNotInitialized,
    #[error("LU solve failed")]
    LuSolveFailed,
    #[error("Matrix is {nrows}x{ncols}, expected a square matrix")]
    NotSquare { nrows: usize, ncols: usize },
    #[error("Right-hand side has length {got}, expected {expected}")]
    RhsLengthMismatch { expected: usize, got: usize },
    #[error("Other error: {0}")]
    Other(String),
}

/// Possible errors that can occur when solving a non-linear problem
#[derive(Error, Debug)]
pub enum NonLinearSolverError {
    #[error("Newton did not converge")]
    NewtonDidNotConverge,
    #[error("Newton diverged")]
    NewtonDiverged,
    #[error("Linear solve failed during Newton iteration: {0}")]
    LinearSolveFailed(String),
    #[error("Other error: {0}")]
    Other(String),
}

/// Possible errors that can occur while stepping a system through time
#[derive(Error, Debug)]
pub enum TimeSolverError {
    #[error("No snapshot stored for time index {index}")]
    HistoryMiss { index: usize },
    #[error("Nonlinear solve did not succeed after {attempts} step size reductions (deltat = {deltat})")]
    StepReductionFailed { attempts: u32, deltat: f64 },
    #[error("Operation `{operation}` is not allowed while is_adjoint = {is_adjoint}")]
    AdjointModeMismatch {
        operation: &'static str,
        is_adjoint: bool,
    },
    #[error("No forward steps have been completed, nothing to sweep backwards over")]
    NoForwardSteps,
    #[error("Final time = {t_final} is before the current time = {time}")]
    FinalTimeBeforeCurrentTime { t_final: f64, time: f64 },
    #[error("Other error: {0}")]
    Other(String),
}

/// Possible errors raised when building or querying a system
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("System has no right-hand side, call rhs() on the builder")]
    MissingRhs,
    #[error("System has no initial condition, call init() on the builder")]
    MissingInit,
    #[error("Initial condition has length {got}, expected {expected}")]
    InitLengthMismatch { expected: usize, got: usize },
    #[error("Mass matrix is {nrows}x{ncols}, expected {nstates}x{nstates}")]
    MassShapeMismatch {
        nrows: usize,
        ncols: usize,
        nstates: usize,
    },
    #[error("Step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),
    #[error("QoI index {index} out of range, system has {nqoi} QoIs")]
    QoiIndexOutOfRange { index: usize, nqoi: usize },
    #[error("Parameter index {index} out of range, system has {nparams} parameters")]
    ParameterIndexOutOfRange { index: usize, nparams: usize },
    #[error("Other error: {0}")]
    Other(String),
}

#[macro_export]
macro_rules! linear_solver_error {
    ($variant:ident) => {
        DiffstepError::from(LinearSolverError::$variant)
    };
    ($variant:ident { $($field:ident : $value:expr),* $(,)? }) => {
        DiffstepError::from(LinearSolverError::$variant { $($field: $value),* })
    };
    ($variant:ident, $($arg:tt)*) => {
        DiffstepError::from(LinearSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! non_linear_solver_error {
    ($variant:ident) => {
        DiffstepError::from(NonLinearSolverError::$variant)
    };
    ($variant:ident, $($arg:tt)*) => {
        DiffstepError::from(NonLinearSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! time_solver_error {
    ($variant:ident) => {
        DiffstepError::from(TimeSolverError::$variant)
    };
    ($variant:ident { $($field:ident : $value:expr),* $(,)? }) => {
        DiffstepError::from(TimeSolverError::$variant { $($field: $value),* })
    };
    ($variant:ident, $($arg:tt)*) => {
        DiffstepError::from(TimeSolverError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! system_error {
    ($variant:ident) => {
        DiffstepError::from(SystemError::$variant)
    };
    ($variant:ident { $($field:ident : $value:expr),* $(,)? }) => {
        DiffstepError::from(SystemError::$variant { $($field: $value),* })
    };
    ($variant:ident, $($arg:tt)*) => {
        DiffstepError::from(SystemError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! other_error {
    ($msg:expr) => {
        DiffstepError::Other($msg.to_string())
    };
}
