//! Pivot state machine and backend selection
//!
//! A [`Solver`] owns the tableau, the index bookkeeping and one [`Backend`].
//! Each iteration asks the backend for the lowest broken basic variable, the
//! lowest suitable nonbasic variable to correct it, pivots the pair and
//! recomputes every basic assignment:
//!
//! ```text
//! check_bounds ──none──> SAT
//!      │
//! find_suitable ──none──> UNSAT
//!      │
//!    pivot ──> update_assignment ──> check_bounds ...
//! ```

pub mod config;
mod parallel;
pub mod rules;
mod sequential;


use tracing::{debug, info};

pub use config::SolverConfig;
pub use parallel::ParallelBackend;
pub use sequential::SequentialBackend;

use crate::bounds::{Bounds, Role};
use crate::error::{Error, Result};
use crate::runtime::{DeviceFamily, HostKernelManager, KernelManager};
use crate::tableau::{IndexMap, Tableau};

// ============================================================================
// Selection
// ============================================================================

/// Lifecycle of a solver
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SolverState {
    /// Accepting constraints and bounds
    Building,
    /// Terminated: satisfiable
    Sat,
    /// Terminated: unsatisfiable
    Unsat,
    /// A backend error or the iteration limit stopped the solve
    Aborted,
}

impl SolverState {
    /// Whether the state accepts no further mutation
    pub fn is_finished(&self) -> bool {
        !matches!(self, SolverState::Building)
    }
}

/// Device used by the parallel backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceSelector {
    /// Device family, picks the kernel source
    pub family: DeviceFamily,
    /// Platform index; every shipped family has a single platform `0`
    pub platform: usize,
    /// Device index within the platform
    pub device: usize,
}

impl DeviceSelector {
    /// First device of a family
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            platform: 0,
            device: 0,
        }
    }

    /// The in-process host device
    pub fn host() -> Self {
        Self::new(DeviceFamily::Host)
    }

    /// Select a device index
    pub fn with_device(mut self, device: usize) -> Self {
        self.device = device;
        self
    }
}

/// Which backend a solver runs on; fixed for the solver's lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendSelector {
    /// Host arrays and nested loops
    Sequential,
    /// Kernel launches on the selected device
    Parallel(DeviceSelector),
}

// ============================================================================
// Backend contract
// ============================================================================

/// The four solver operations plus storage access
///
/// Backends share the solver's [`Tableau`] and [`IndexMap`]; a backend that
/// mirrors the tableau elsewhere receives the host copy in [`Backend::prepare`]
/// and answers [`Backend::tableau_entry`] from its own copy afterwards.
pub trait Backend: Send {
    /// Short description for logs
    fn name(&self) -> String;

    /// Bounds storage
    fn bounds(&self) -> &dyn Bounds;

    /// Mutable bounds storage
    fn bounds_mut(&mut self) -> &mut dyn Bounds;

    /// Called once before the first iteration
    fn prepare(&mut self, tableau: &Tableau, map: &IndexMap) -> Result<()>;

    /// Lowest-index broken basic variable
    fn check_bounds(&mut self, map: &IndexMap) -> Result<Option<usize>>;

    /// Lowest-index suitable nonbasic variable for `broken`; applies the
    /// assignment correction when one is found
    fn find_suitable(
        &mut self,
        tableau: &Tableau,
        map: &IndexMap,
        broken: usize,
    ) -> Result<Option<usize>>;

    /// Gauss-Jordan pivot exchanging basic `leaving` and nonbasic `entering`
    fn pivot(
        &mut self,
        tableau: &mut Tableau,
        map: &mut IndexMap,
        leaving: usize,
        entering: usize,
    ) -> Result<()>;

    /// Recompute every occupied row's basic assignment
    fn update_assignment(&mut self, tableau: &Tableau, map: &IndexMap) -> Result<()>;

    /// Current coefficient at `(row, col)`
    fn tableau_entry(&self, tableau: &Tableau, row: usize, col: usize) -> Result<f32>;
}

// ============================================================================
// Diagnostics
// ============================================================================

/// One completed pivot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PivotStep {
    /// Zero-based iteration number
    pub iteration: usize,
    /// Basic variable that became nonbasic
    pub leaving: usize,
    /// Nonbasic variable that became basic
    pub entering: usize,
}

/// Hook notified as the solve progresses; every method defaults to a no-op
pub trait SolveObserver: Send {
    /// A broken variable was selected
    fn on_broken(&mut self, _iteration: usize, _var: usize) {}

    /// A pivot completed; `map` is the bookkeeping after the swap
    fn on_pivot(&mut self, _step: &PivotStep, _map: &IndexMap) {}

    /// The solve reached a verdict after `iterations` pivots
    fn on_verdict(&mut self, _sat: bool, _iterations: usize) {}
}

// ============================================================================
// Solver
// ============================================================================

/// General simplex feasibility solver
pub struct Solver {
    tableau: Tableau,
    map: IndexMap,
    backend: Box<dyn Backend>,
    config: SolverConfig,
    state: SolverState,
    history: Vec<PivotStep>,
    observer: Option<Box<dyn SolveObserver>>,
}

impl Solver {
    /// Create a solver with room for `max_rows` constraints over `num_cols`
    /// problem variables.
    pub fn new(max_rows: usize, num_cols: usize, selector: BackendSelector) -> Result<Self> {
        Self::with_config(max_rows, num_cols, selector, SolverConfig::default())
    }

    /// Create a solver with explicit configuration
    pub fn with_config(
        max_rows: usize,
        num_cols: usize,
        selector: BackendSelector,
        config: SolverConfig,
    ) -> Result<Self> {
        check_dimensions(max_rows, num_cols)?;
        config.validate()?;

        let backend: Box<dyn Backend> = match selector {
            BackendSelector::Sequential => Box::new(SequentialBackend::new(
                max_rows,
                num_cols,
                config.epsilon,
            )),
            BackendSelector::Parallel(device) => open_device(max_rows, num_cols, device, &config)?,
        };
        Ok(Self::assemble(max_rows, num_cols, backend, config))
    }

    /// Create a parallel solver on a caller-supplied kernel manager
    pub fn with_kernel_manager<K: KernelManager>(
        max_rows: usize,
        num_cols: usize,
        manager: K,
        config: SolverConfig,
    ) -> Result<Self> {
        check_dimensions(max_rows, num_cols)?;
        config.validate()?;
        let backend = ParallelBackend::new(manager, max_rows, num_cols, &config)?;
        Ok(Self::assemble(max_rows, num_cols, Box::new(backend), config))
    }

    fn assemble(
        max_rows: usize,
        num_cols: usize,
        backend: Box<dyn Backend>,
        config: SolverConfig,
    ) -> Self {
        debug!(max_rows, num_cols, backend = %backend.name(), "solver created");
        Self {
            tableau: Tableau::new(max_rows, num_cols),
            map: IndexMap::new(max_rows, num_cols),
            backend,
            config,
            state: SolverState::Building,
            history: Vec::new(),
            observer: None,
        }
    }

    // ------------------------------------------------------------------------
    // Building
    // ------------------------------------------------------------------------

    /// Append a constraint row: slack `s<j>` equals the dot product of
    /// `coeffs` with the problem variables.
    pub fn add_constraint(&mut self, coeffs: &[f32]) -> Result<()> {
        self.ensure_building()?;
        let row = self.tableau.add_row(coeffs)?;
        debug!(row, "constraint added");
        Ok(())
    }

    /// Set both bounds of a variable; `None` is unbounded
    pub fn set_bounds(&mut self, var: usize, lower: Option<f32>, upper: Option<f32>) -> Result<()> {
        self.ensure_building()?;
        self.backend.bounds_mut().set_bounds(var, lower, upper)
    }

    /// Set the lower bound of a variable
    pub fn set_lower(&mut self, var: usize, lower: Option<f32>) -> Result<()> {
        self.ensure_building()?;
        self.backend.bounds_mut().set_lower(var, lower)
    }

    /// Set the upper bound of a variable
    pub fn set_upper(&mut self, var: usize, upper: Option<f32>) -> Result<()> {
        self.ensure_building()?;
        self.backend.bounds_mut().set_upper(var, upper)
    }

    /// Install a progress observer
    pub fn set_observer(&mut self, observer: Box<dyn SolveObserver>) {
        self.observer = Some(observer);
    }

    fn ensure_building(&self) -> Result<()> {
        if self.state.is_finished() {
            return Err(Error::SolverFinished { state: self.state });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Solving
    // ------------------------------------------------------------------------

    /// Run the simplex loop. Returns `Ok(true)` when satisfiable.
    ///
    /// A second call after a verdict returns the same verdict without
    /// iterating. Errors leave the solver [`SolverState::Aborted`].
    pub fn solve(&mut self) -> Result<bool> {
        match self.state {
            SolverState::Sat => return Ok(true),
            SolverState::Unsat => return Ok(false),
            SolverState::Aborted => return Err(Error::SolverFinished { state: self.state }),
            SolverState::Building => {}
        }

        info!(
            rows = self.tableau.num_rows(),
            cols = self.tableau.num_cols(),
            backend = %self.backend.name(),
            "solve started"
        );
        match self.run() {
            Ok(sat) => {
                self.state = if sat {
                    SolverState::Sat
                } else {
                    SolverState::Unsat
                };
                info!(sat, iterations = self.history.len(), "solve finished");
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_verdict(sat, self.history.len());
                }
                Ok(sat)
            }
            Err(err) => {
                self.state = SolverState::Aborted;
                tracing::warn!(error = %err, "solve aborted");
                Err(err)
            }
        }
    }

    fn run(&mut self) -> Result<bool> {
        self.backend.prepare(&self.tableau, &self.map)?;

        let mut iteration = 0;
        loop {
            let Some(broken) = self.backend.check_bounds(&self.map)? else {
                return Ok(true);
            };
            if let Some(limit) = self.config.max_iterations {
                if iteration >= limit {
                    return Err(Error::IterationLimit { limit });
                }
            }
            debug!(iteration, broken, "broken variable");
            if let Some(observer) = self.observer.as_mut() {
                observer.on_broken(iteration, broken);
            }

            let Some(entering) = self
                .backend
                .find_suitable(&self.tableau, &self.map, broken)?
            else {
                debug!(iteration, broken, "no suitable variable");
                return Ok(false);
            };

            self.backend
                .pivot(&mut self.tableau, &mut self.map, broken, entering)?;
            let step = PivotStep {
                iteration,
                leaving: broken,
                entering,
            };
            debug!(iteration, leaving = broken, entering, "pivot");
            self.history.push(step);
            if let Some(observer) = self.observer.as_mut() {
                observer.on_pivot(&step, &self.map);
            }

            self.backend.update_assignment(&self.tableau, &self.map)?;
            iteration += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Assignments of the problem variables `x0..x<n-1>`
    pub fn solution(&self) -> Result<Vec<f32>> {
        self.backend.bounds().assignments(self.tableau.num_cols())
    }

    /// Current assignment of any variable
    pub fn assignment(&self, var: usize) -> Result<f32> {
        self.backend.bounds().assignment(var)
    }

    /// Current role of any variable
    pub fn role(&self, var: usize) -> Result<Role> {
        self.backend.bounds().role(var)
    }

    /// `Some(true)` after SAT, `Some(false)` after UNSAT, else `None`
    pub fn verdict(&self) -> Option<bool> {
        match self.state {
            SolverState::Sat => Some(true),
            SolverState::Unsat => Some(false),
            _ => None,
        }
    }

    /// Lifecycle state
    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Number of constraints added
    pub fn num_rows(&self) -> usize {
        self.tableau.num_rows()
    }

    /// Constraint capacity
    pub fn max_rows(&self) -> usize {
        self.tableau.max_rows()
    }

    /// Number of problem variables
    pub fn num_cols(&self) -> usize {
        self.tableau.num_cols()
    }

    /// Total variables: problem variables plus one slack per row of capacity
    pub fn num_vars(&self) -> usize {
        self.tableau.num_cols() + self.tableau.max_rows()
    }

    /// Backend description
    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    /// Configuration the solver was built with
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Current coefficient at a physical `(row, col)` position
    pub fn tableau_entry(&self, row: usize, col: usize) -> Result<f32> {
        Error::check_index(row, self.tableau.max_rows())?;
        Error::check_index(col, self.tableau.num_cols())?;
        self.backend.tableau_entry(&self.tableau, row, col)
    }

    /// Pivots performed so far
    pub fn pivot_history(&self) -> &[PivotStep] {
        &self.history
    }

    /// Variable/position bookkeeping
    pub fn index_map(&self) -> &IndexMap {
        &self.map
    }

    /// Text dump of the occupied tableau with variable names and assignments
    ///
    /// ```text
    ///      [x0=0] [x1=0]
    /// [s0=0] 1 1
    /// [s1=0] 2 -1
    /// ```
    pub fn render_tableau(&self) -> Result<String> {
        let num_cols = self.tableau.num_cols();
        let bounds = self.backend.bounds();
        let mut out = String::from("     ");

        let labels = (0..num_cols).map(|c| self.map.col_var(c));
        let header: Vec<String> = labels
            .map(|var| Ok(format!("[{}={}]", var_name(var, num_cols), bounds.assignment(var)?)))
            .collect::<Result<_>>()?;
        out.push_str(&header.join(" "));
        out.push('\n');

        for row in 0..self.tableau.num_rows() {
            let var = self.map.row_var(row);
            out.push_str(&format!("[{}={}]", var_name(var, num_cols), bounds.assignment(var)?));
            for col in 0..num_cols {
                out.push_str(&format!(" {}", self.tableau_entry(row, col)?));
            }
            out.push('\n');
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("backend", &self.backend.name())
            .field("rows", &self.tableau.num_rows())
            .field("max_rows", &self.tableau.max_rows())
            .field("cols", &self.tableau.num_cols())
            .field("state", &self.state)
            .field("pivots", &self.history.len())
            .finish()
    }
}

/// `x<i>` for problem variables, `s<j>` for slacks
pub fn var_name(var: usize, num_cols: usize) -> String {
    if var >= num_cols {
        format!("s{}", var - num_cols)
    } else {
        format!("x{var}")
    }
}

fn check_dimensions(max_rows: usize, num_cols: usize) -> Result<()> {
    if max_rows == 0 {
        return Err(Error::InvalidArgument {
            arg: "max_rows",
            reason: "a solver needs room for at least one constraint".to_string(),
        });
    }
    if num_cols == 0 {
        return Err(Error::InvalidArgument {
            arg: "num_cols",
            reason: "a solver needs at least one problem variable".to_string(),
        });
    }
    if max_rows + num_cols > u32::MAX as usize {
        return Err(Error::InvalidArgument {
            arg: "max_rows",
            reason: "variable ids must fit in 32 bits".to_string(),
        });
    }
    Ok(())
}

fn open_device(
    max_rows: usize,
    num_cols: usize,
    device: DeviceSelector,
    config: &SolverConfig,
) -> Result<Box<dyn Backend>> {
    if device.platform != 0 {
        return Err(Error::unsupported_backend(
            device.family,
            format!("platform {} does not exist", device.platform),
        ));
    }
    match device.family {
        DeviceFamily::Host => {
            if device.device != 0 {
                return Err(Error::unsupported_backend(
                    device.family,
                    format!("host device {} does not exist", device.device),
                ));
            }
            let manager = HostKernelManager::default();
            Ok(Box::new(ParallelBackend::new(
                manager, max_rows, num_cols, config,
            )?))
        }
        #[cfg(feature = "wgpu")]
        DeviceFamily::WebGpu => {
            let manager = crate::runtime::wgpu::WgpuKernelManager::new(device.device)?;
            Ok(Box::new(ParallelBackend::new(
                manager, max_rows, num_cols, config,
            )?))
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceFamily::WebGpu => Err(Error::unsupported_backend(
            device.family,
            "built without the `wgpu` feature",
        )),
        #[cfg(feature = "cuda")]
        DeviceFamily::Cuda => {
            let manager = crate::runtime::cuda::CudaKernelManager::new(device.device)?;
            Ok(Box::new(ParallelBackend::new(
                manager, max_rows, num_cols, config,
            )?))
        }
        #[cfg(not(feature = "cuda"))]
        DeviceFamily::Cuda => Err(Error::unsupported_backend(
            device.family,
            "built without the `cuda` feature",
        )),
        DeviceFamily::OpenCl => Err(Error::unsupported_backend(
            device.family,
            "no OpenCL runtime is available",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a(config: SolverConfig) -> Solver {
        let mut solver = Solver::with_config(3, 2, BackendSelector::Sequential, config).unwrap();
        solver.add_constraint(&[1.0, 1.0]).unwrap();
        solver.add_constraint(&[2.0, -1.0]).unwrap();
        solver.add_constraint(&[-1.0, 2.0]).unwrap();
        solver.set_bounds(2, Some(2.0), None).unwrap();
        solver.set_bounds(4, Some(1.0), None).unwrap();
        solver
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let err = Solver::new(0, 2, BackendSelector::Sequential).unwrap_err();
        assert!(err.is_config());
        let err = Solver::new(2, 0, BackendSelector::Sequential).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_verdict_cached() {
        let mut solver = scenario_a(SolverConfig::default());
        assert_eq!(solver.verdict(), None);
        assert!(solver.solve().unwrap());
        let pivots = solver.pivot_history().len();
        assert_eq!(pivots, 2);
        assert!(solver.solve().unwrap());
        assert_eq!(solver.pivot_history().len(), pivots);
        assert_eq!(solver.verdict(), Some(true));
        assert_eq!(solver.state(), SolverState::Sat);
    }

    #[test]
    fn test_mutation_after_verdict_rejected() {
        let mut solver = scenario_a(SolverConfig::default());
        solver.solve().unwrap();
        assert!(matches!(
            solver.add_constraint(&[1.0, 1.0]),
            Err(Error::SolverFinished {
                state: SolverState::Sat
            })
        ));
        assert!(solver.set_bounds(0, None, None).is_err());
        assert!(solver.set_lower(0, None).is_err());
        assert!(solver.set_upper(0, None).is_err());
    }

    #[test]
    fn test_iteration_limit_aborts() {
        let mut solver = scenario_a(SolverConfig::default().with_max_iterations(1));
        assert!(matches!(
            solver.solve(),
            Err(Error::IterationLimit { limit: 1 })
        ));
        assert_eq!(solver.state(), SolverState::Aborted);
        assert_eq!(solver.pivot_history().len(), 1);
        // stopped on the next broken variable, before any correction
        let assigns: Vec<f32> = (0..5).map(|v| solver.assignment(v).unwrap()).collect();
        assert_eq!(assigns, vec![2.0, 0.0, 2.0, 4.0, -2.0]);
        assert!(matches!(
            solver.solve(),
            Err(Error::SolverFinished {
                state: SolverState::Aborted
            })
        ));
    }

    #[test]
    fn test_zero_iteration_limit_leaves_assignments() {
        let mut solver = scenario_a(SolverConfig::default().with_max_iterations(0));
        assert!(matches!(
            solver.solve(),
            Err(Error::IterationLimit { limit: 0 })
        ));
        assert!(solver.pivot_history().is_empty());
        for var in 0..5 {
            assert_eq!(solver.assignment(var).unwrap(), 0.0);
        }
    }

    #[test]
    fn test_render_tableau_names() {
        let solver = scenario_a(SolverConfig::default());
        let text = solver.render_tableau().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "     [x0=0] [x1=0]");
        assert_eq!(lines[1], "[s0=0] 1 1");
        assert_eq!(lines[2], "[s1=0] 2 -1");
        assert_eq!(lines[3], "[s2=0] -1 2");
    }

    #[test]
    fn test_var_names() {
        assert_eq!(var_name(1, 3), "x1");
        assert_eq!(var_name(3, 3), "s0");
        assert_eq!(var_name(5, 3), "s2");
    }

    #[test]
    fn test_parallel_platform_and_device_checked() {
        let selector = DeviceSelector {
            family: DeviceFamily::Host,
            platform: 1,
            device: 0,
        };
        let err = Solver::new(2, 2, BackendSelector::Parallel(selector)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedBackend { .. }));
        let selector = DeviceSelector::host().with_device(3);
        assert!(Solver::new(2, 2, BackendSelector::Parallel(selector)).is_err());
    }
}
