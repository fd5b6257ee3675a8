//! Solver configuration

use crate::bounds::DEFAULT_EPSILON;
use crate::error::{Error, Result};

/// Tunables shared by both backends
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
    /// Tolerance of the broken-variable test
    pub epsilon: f32,
    /// Abort with [`Error::IterationLimit`] after this many pivots.
    /// `None` runs until a verdict; an adversarial system can cycle forever.
    pub max_iterations: Option<usize>,
    /// Cap on the workgroup size the parallel backend uses, rounded down to a
    /// power of two. `None` uses the device maximum (at most 256).
    pub max_workgroup_size: Option<u32>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            max_iterations: None,
            max_workgroup_size: None,
        }
    }
}

impl SolverConfig {
    /// Set the broken-variable tolerance
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Limit the number of pivots
    pub fn with_max_iterations(mut self, limit: usize) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Cap the parallel backend's workgroup size
    pub fn with_max_workgroup_size(mut self, size: u32) -> Self {
        self.max_workgroup_size = Some(size);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0) {
            return Err(Error::InvalidArgument {
                arg: "epsilon",
                reason: format!("must be finite and non-negative, got {}", self.epsilon),
            });
        }
        if self.max_workgroup_size == Some(0) {
            return Err(Error::InvalidArgument {
                arg: "max_workgroup_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
