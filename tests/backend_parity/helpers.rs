//! Shared helpers for backend parity tests: outcome assertions, backend locks, manager creation.

use crate::common::{Outcome, Problem, assert_allclose_f32};
#[cfg(feature = "cuda")]
use crate::common::create_cuda_manager;
#[cfg(feature = "wgpu")]
use crate::common::create_wgpu_manager;
#[cfg(any(feature = "cuda", feature = "wgpu"))]
use std::sync::{Mutex, OnceLock};

#[cfg(any(feature = "cuda", feature = "wgpu"))]
use gsimplex::prelude::*;

#[cfg(feature = "cuda")]
static CUDA_BACKEND_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
#[cfg(feature = "wgpu")]
static WGPU_BACKEND_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Workgroup sizes the host device is exercised with
pub const HOST_WORKGROUP_SIZES: [u32; 4] = [2, 4, 8, 256];

/// Same verdict and the same pivot sequence
pub fn assert_same_path(reference: &Outcome, other: &Outcome, case: &str) {
    assert_eq!(reference.sat, other.sat, "{case}: verdict differs");
    assert_eq!(reference.pivots, other.pivots, "{case}: pivot sequence differs");
}

/// Same path and, for SAT outcomes, solution values within tolerance
pub fn assert_outcome_parity(reference: &Outcome, other: &Outcome, case: &str) {
    assert_same_path(reference, other, case);
    if reference.sat {
        assert_allclose_f32(&other.solution, &reference.solution, 1e-5, 1e-5, case);
    }
}

/// Solve `problem` on a device manager
#[cfg(any(feature = "cuda", feature = "wgpu"))]
pub fn device_outcome<K: KernelManager>(problem: &Problem, manager: K) -> Outcome {
    let mut solver = Solver::with_kernel_manager(
        problem.num_rows(),
        problem.num_cols,
        manager,
        SolverConfig::default(),
    )
    .unwrap();
    problem.load(&mut solver);
    crate::common::run(solver)
}

#[cfg(feature = "cuda")]
pub fn with_cuda_backend<F>(mut f: F)
where
    F: FnMut(CudaKernelManager),
{
    let _guard = CUDA_BACKEND_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(manager) = create_cuda_manager() else {
        println!("No GPU available, skipping test");
        return;
    };
    f(manager);
}

#[cfg(feature = "wgpu")]
pub fn with_wgpu_backend<F>(mut f: F)
where
    F: FnMut(WgpuKernelManager),
{
    let _guard = WGPU_BACKEND_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(manager) = create_wgpu_manager() else {
        println!("No GPU available, skipping test");
        return;
    };
    f(manager);
}

/// Label for a problem on a backend
pub fn case_name(problem: &Problem, backend: &str) -> String {
    format!("{}_{}", problem.name, backend)
}
