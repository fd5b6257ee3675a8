use crate::common::*;
use crate::helpers::*;

const SHAPES: [(usize, usize); 6] = [(3, 2), (4, 3), (5, 9), (6, 20), (8, 5), (10, 17)];
const SEEDS: usize = 6;

#[test]
fn test_generated_host_parity() {
    for (rows, cols) in SHAPES {
        for seed in 0..SEEDS {
            let problem = generated(rows, cols, seed);
            let reference = run(sequential_solver(&problem));
            for wg in HOST_WORKGROUP_SIZES {
                let outcome = run(host_solver(&problem, wg));
                let case = case_name(&problem, &format!("host{wg}"));
                assert_outcome_parity(&reference, &outcome, &case);
            }
        }
    }
}

#[test]
fn test_generated_sat_solutions_satisfy_bounds() {
    for (rows, cols) in SHAPES {
        for seed in 0..SEEDS {
            let problem = generated(rows, cols, seed);
            for mut solver in [sequential_solver(&problem), host_solver(&problem, 8)] {
                if solver.solve().unwrap() {
                    assert_within_bounds(&solver, &problem, 1e-4);
                }
            }
        }
    }
}

#[cfg(feature = "wgpu")]
#[test]
fn test_generated_wgpu_verdicts() {
    with_wgpu_backend(|manager| {
        for (rows, cols) in SHAPES {
            let problem = generated(rows, cols, 0);
            let reference = run(sequential_solver(&problem));
            let outcome = device_outcome(&problem, manager.clone());
            assert_eq!(reference.sat, outcome.sat, "{}", case_name(&problem, "wgpu"));
        }
    });
}

#[cfg(feature = "cuda")]
#[test]
fn test_generated_cuda_parity() {
    with_cuda_backend(|manager| {
        for (rows, cols) in SHAPES {
            for seed in 0..SEEDS {
                let problem = generated(rows, cols, seed);
                let reference = run(sequential_solver(&problem));
                let outcome = device_outcome(&problem, manager.clone());
                assert_same_path(&reference, &outcome, &case_name(&problem, "cuda"));
            }
        }
    });
}
