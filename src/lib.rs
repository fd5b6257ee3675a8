//! # gsimplex
//!
//! **General simplex feasibility solver with sequential and kernel-dispatched
//! parallel backends.**
//!
//! gsimplex decides whether a system of linear equalities over bounded
//! variables is satisfiable and, if it is, produces an assignment within every
//! bound. Each constraint row defines a slack variable `s<j>` as a linear
//! combination of the problem variables `x<i>`; bounds on slacks express the
//! inequalities.
//!
//! ## Backends
//!
//! - **Sequential**: dense host tableau and nested loops
//! - **Parallel**: the same four operations (check bounds, find suitable,
//!   pivot, update assignment) as kernel launches on a device, driven through
//!   the [`KernelManager`](runtime::KernelManager) contract
//!
//! Both backends pick the lowest-index broken variable and the lowest-index
//! suitable variable, so they follow the same pivot sequence.
//!
//! ## Quick Start
//!
//! ```rust
//! use gsimplex::prelude::*;
//!
//! # fn main() -> gsimplex::error::Result<()> {
//! // s0 = x0 + x1 >= 2, s1 = 2x0 - x1 >= 0, s2 = -x0 + 2x1 >= 1
//! let mut solver = Solver::new(3, 2, BackendSelector::Sequential)?;
//! solver.add_constraint(&[1.0, 1.0])?;
//! solver.add_constraint(&[2.0, -1.0])?;
//! solver.add_constraint(&[-1.0, 2.0])?;
//! solver.set_bounds(2, Some(2.0), None)?;
//! solver.set_bounds(4, Some(1.0), None)?;
//!
//! assert!(solver.solve()?);
//! let x = solver.solution()?;
//! assert!((x[0] - 1.0).abs() < 1e-5 && (x[1] - 1.0).abs() < 1e-5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `rayon` (default): row-parallel 2-D launches on the host device
//! - `wgpu`: WebGPU kernel manager (WGSL kernels)
//! - `cuda`: CUDA kernel manager (PTX compiled by `build.rs`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bounds;
pub mod error;
pub mod runtime;
pub mod solver;
pub mod tableau;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bounds::{Bounds, Role};
    pub use crate::error::{Error, Result};
    pub use crate::runtime::{
        DeviceFamily, HostDeviceConfig, HostKernelManager, KernelManager,
    };
    pub use crate::solver::{
        BackendSelector, DeviceSelector, PivotStep, SolveObserver, Solver, SolverConfig,
        SolverState,
    };

    #[cfg(feature = "cuda")]
    pub use crate::runtime::cuda::CudaKernelManager;

    #[cfg(feature = "wgpu")]
    pub use crate::runtime::wgpu::WgpuKernelManager;
}
