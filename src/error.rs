//! Error types for gsimplex

use thiserror::Error;

use crate::runtime::DeviceFamily;
use crate::solver::SolverState;

/// Result type alias using gsimplex's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or solving a constraint system
///
/// Infeasibility is not an error: `Solver::solve` reports it as `Ok(false)`.
#[derive(Error, Debug)]
pub enum Error {
    /// Constraint row does not have one coefficient per nonbasic variable
    #[error("Invalid constraint size: expected {expected} coefficients, got {got}")]
    ConstraintWidth {
        /// Number of nonbasic variables
        expected: usize,
        /// Number of coefficients supplied
        got: usize,
    },

    /// The tableau already holds the maximum number of constraint rows
    #[error("Unable to add more constraints: tableau capacity of {capacity} rows reached")]
    CapacityExceeded {
        /// Maximum number of rows
        capacity: usize,
    },

    /// Invalid argument provided to an operation
    #[error("Invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// The argument name
        arg: &'static str,
        /// Reason for invalidity
        reason: String,
    },

    /// The selected backend or device family cannot be used in this build
    #[error("Unsupported backend {family:?}: {reason}")]
    UnsupportedBackend {
        /// Requested device family
        family: DeviceFamily,
        /// Why it cannot be used
        reason: String,
    },

    /// Operation is not meaningful for this backend's storage
    #[error("Unsupported operation '{operation}': {reason}")]
    Unsupported {
        /// The operation being attempted
        operation: &'static str,
        /// Description of the limitation
        reason: &'static str,
    },

    /// Variable, row or column index out of bounds
    #[error("Index {index} out of bounds for size {size}")]
    IndexOutOfBounds {
        /// The invalid index
        index: usize,
        /// Valid exclusive upper limit
        size: usize,
    },

    /// The solver has already terminated and its state is frozen
    #[error("Solver is in terminal state {state:?}")]
    SolverFinished {
        /// State at the time of the call
        state: SolverState,
    },

    /// The configured pivot limit was reached before a verdict
    #[error("Iteration limit of {limit} pivots reached without a verdict")]
    IterationLimit {
        /// Configured limit
        limit: usize,
    },

    /// A kernel entry point is missing from its source artifact
    #[error("Kernel '{entry}' not found in source '{source_name}'")]
    KernelNotFound {
        /// Source artifact name
        source_name: &'static str,
        /// Entry point name
        entry: &'static str,
    },

    /// A kernel launch was rejected or failed
    #[error("Kernel '{kernel}' launch failed: {reason}")]
    KernelLaunch {
        /// Entry point name
        kernel: &'static str,
        /// Failure description
        reason: String,
    },

    /// Backend-specific error (allocation, transfer, device loss)
    #[error("Backend error: {0}")]
    Backend(String),

    /// CUDA driver error
    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cudarc::driver::DriverError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an unsupported-operation error
    pub fn unsupported(operation: &'static str, reason: &'static str) -> Self {
        Self::Unsupported { operation, reason }
    }

    /// Create an unsupported-backend error
    pub fn unsupported_backend(family: DeviceFamily, reason: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            family,
            reason: reason.into(),
        }
    }

    /// Create a kernel launch error
    pub fn launch(kernel: &'static str, reason: impl Into<String>) -> Self {
        Self::KernelLaunch {
            kernel,
            reason: reason.into(),
        }
    }

    /// Check an index against an exclusive upper limit
    pub(crate) fn check_index(index: usize, size: usize) -> Result<()> {
        if index < size {
            Ok(())
        } else {
            Err(Self::IndexOutOfBounds { index, size })
        }
    }

    /// Returns `true` for errors caused by how the solver was configured
    /// rather than by a failure while running it.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConstraintWidth { .. }
                | Self::CapacityExceeded { .. }
                | Self::InvalidArgument { .. }
                | Self::UnsupportedBackend { .. }
        )
    }
}
