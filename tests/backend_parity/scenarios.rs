use crate::common::*;
use crate::helpers::*;

fn scenarios() -> Vec<Problem> {
    vec![scenario_a(), scenario_b(), scenario_c(), scenario_d()]
}

#[test]
fn test_scenarios_host_parity() {
    for problem in scenarios() {
        let reference = run(sequential_solver(&problem));
        for wg in HOST_WORKGROUP_SIZES {
            let outcome = run(host_solver(&problem, wg));
            let case = case_name(&problem, &format!("host{wg}"));
            assert_outcome_parity(&reference, &outcome, &case);
        }
    }
}

#[test]
fn test_scenario_paths() {
    let expected = [
        ("A", true, vec![(2, 0), (4, 1)]),
        ("B", false, vec![(2, 0), (3, 1)]),
        ("C", true, vec![(4, 0), (3, 1)]),
        ("D", true, vec![(3, 0)]),
    ];
    for (problem, (name, sat, pivots)) in scenarios().into_iter().zip(expected) {
        assert_eq!(problem.name, name);
        for outcome in [run(sequential_solver(&problem)), run(host_solver(&problem, 4))] {
            assert_eq!(outcome.sat, sat, "{name}");
            assert_eq!(outcome.pivots, pivots, "{name}");
        }
    }
}

#[cfg(feature = "wgpu")]
#[test]
fn test_scenarios_wgpu_parity() {
    with_wgpu_backend(|manager| {
        for problem in scenarios() {
            let reference = run(sequential_solver(&problem));
            let outcome = device_outcome(&problem, manager.clone());
            assert_same_path(&reference, &outcome, &case_name(&problem, "wgpu"));
            if reference.sat {
                assert_allclose_f32(
                    &outcome.solution,
                    &reference.solution,
                    1e-4,
                    1e-4,
                    &problem.name,
                );
            }
        }
    });
}

#[cfg(feature = "cuda")]
#[test]
fn test_scenarios_cuda_parity() {
    with_cuda_backend(|manager| {
        for problem in scenarios() {
            let reference = run(sequential_solver(&problem));
            let outcome = device_outcome(&problem, manager.clone());
            assert_outcome_parity(&reference, &outcome, &case_name(&problem, "cuda"));
        }
    });
}
