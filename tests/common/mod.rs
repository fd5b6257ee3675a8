//! Common test utilities
#![allow(dead_code)]

use gsimplex::prelude::*;

/// A feasibility problem: constraint rows plus slack bounds
#[derive(Clone, Debug)]
pub struct Problem {
    pub name: String,
    pub num_cols: usize,
    pub rows: Vec<Vec<f32>>,
    /// `(var, lower, upper)` applied after the rows are added
    pub bounds: Vec<(usize, Option<f32>, Option<f32>)>,
}

impl Problem {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Add every row and bound to `solver`
    pub fn load(&self, solver: &mut Solver) {
        for row in &self.rows {
            solver.add_constraint(row).unwrap();
        }
        for &(var, lower, upper) in &self.bounds {
            solver.set_bounds(var, lower, upper).unwrap();
        }
    }
}

/// Outcome of one solve, comparable across backends
#[derive(Clone, Debug)]
pub struct Outcome {
    pub sat: bool,
    pub pivots: Vec<(usize, usize)>,
    pub solution: Vec<f32>,
}

/// `s0 = x0 + x1 >= 2, s1 = 2x0 - x1 >= 0, s2 = -x0 + 2x1 >= 1` (SAT)
pub fn scenario_a() -> Problem {
    Problem {
        name: "A".into(),
        num_cols: 2,
        rows: vec![vec![1.0, 1.0], vec![2.0, -1.0], vec![-1.0, 2.0]],
        bounds: vec![(2, Some(2.0), None), (4, Some(1.0), None)],
    }
}

/// `x0 >= 6, x1 >= 6, x0 + x1 <= 11` (UNSAT)
pub fn scenario_b() -> Problem {
    Problem {
        name: "B".into(),
        num_cols: 2,
        rows: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        bounds: vec![
            (2, Some(6.0), None),
            (3, Some(6.0), None),
            (4, Some(0.0), Some(11.0)),
        ],
    }
}

/// Three variables, `s0` in `[0, 2]`, `s1 >= 8` (SAT)
pub fn scenario_c() -> Problem {
    Problem {
        name: "C".into(),
        num_cols: 3,
        rows: vec![vec![1.0, 0.5, 0.5], vec![1.5, 2.0, 1.0]],
        bounds: vec![(3, Some(0.0), Some(2.0)), (4, Some(8.0), None)],
    }
}

/// Three variables, three lower-bounded slacks (SAT)
pub fn scenario_d() -> Problem {
    Problem {
        name: "D".into(),
        num_cols: 3,
        rows: vec![
            vec![4.0, 3.0, 2.0],
            vec![4.0, 7.0, 2.0],
            vec![9.0, 6.0, 2.0],
        ],
        bounds: vec![
            (3, Some(7.0), None),
            (4, Some(3.0), None),
            (5, Some(10.0), None),
        ],
    }
}

/// Deterministic dense problem with mixed-sign integer coefficients and a mix
/// of one- and two-sided slack bounds.
pub fn generated(num_rows: usize, num_cols: usize, seed: usize) -> Problem {
    let rows = (0..num_rows)
        .map(|i| {
            (0..num_cols)
                .map(|j| ((i * 7 + j * 13 + seed * 5) % 11) as f32 - 5.0)
                .collect()
        })
        .collect();
    let bounds = (0..num_rows)
        .map(|i| {
            let lower = ((i * 3 + seed) % 7) as f32 - 2.0;
            let upper = ((i + seed) % 3 == 0).then(|| lower + ((i + seed) % 5 + 1) as f32);
            (num_cols + i, Some(lower), upper)
        })
        .collect();
    Problem {
        name: format!("generated({num_rows}x{num_cols}, seed {seed})"),
        num_cols,
        rows,
        bounds,
    }
}

/// Sequential solver sized for `problem`
pub fn sequential_solver(problem: &Problem) -> Solver {
    let mut solver =
        Solver::new(problem.num_rows(), problem.num_cols, BackendSelector::Sequential).unwrap();
    problem.load(&mut solver);
    solver
}

/// Parallel solver on the host device with workgroup size `wg`
pub fn host_solver(problem: &Problem, wg: u32) -> Solver {
    let manager = HostKernelManager::new(HostDeviceConfig {
        max_workgroup_size: wg,
        compute_units: 2,
    });
    let mut solver = Solver::with_kernel_manager(
        problem.num_rows(),
        problem.num_cols,
        manager,
        SolverConfig::default(),
    )
    .unwrap();
    problem.load(&mut solver);
    solver
}

/// Solve and collect the comparable outcome
pub fn run(mut solver: Solver) -> Outcome {
    let sat = solver.solve().unwrap();
    Outcome {
        sat,
        pivots: solver
            .pivot_history()
            .iter()
            .map(|step| (step.leaving, step.entering))
            .collect(),
        solution: solver.solution().unwrap(),
    }
}

/// Check every bound of a SAT solver's variables within `tol`
pub fn assert_within_bounds(solver: &Solver, problem: &Problem, tol: f32) {
    for &(var, lower, upper) in &problem.bounds {
        let a = solver.assignment(var).unwrap();
        if let Some(lo) = lower {
            assert!(a >= lo - tol, "{}: var {} = {} < {}", problem.name, var, a, lo);
        }
        if let Some(hi) = upper {
            assert!(a <= hi + tol, "{}: var {} = {} > {}", problem.name, var, a, hi);
        }
    }
}

/// Create a CUDA kernel manager, returning None if CUDA is unavailable
#[cfg(feature = "cuda")]
pub fn create_cuda_manager() -> Option<CudaKernelManager> {
    CudaKernelManager::new(0).ok()
}

/// Create a WebGPU kernel manager, returning None if WebGPU is unavailable
#[cfg(feature = "wgpu")]
pub fn create_wgpu_manager() -> Option<WgpuKernelManager> {
    WgpuKernelManager::new(0).ok()
}

/// Assert two f32 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}
