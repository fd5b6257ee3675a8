//! Parallel backend: the four solver operations as kernel launches
//!
//! All state lives in device buffers allocated at construction. Per iteration
//! only the index maps, two role flags and a handful of scalars cross the
//! host/device boundary.
//!
//! # Launch plan
//!
//! | Operation           | Launches                                                      |
//! |---------------------|---------------------------------------------------------------|
//! | `check_bounds`      | one per chunk of `compute_units * wg` variables, until a hit  |
//! | `find_suitable`     | same, then one single-item `find_suitable_complete`           |
//! | `pivot`             | inner (2-D), row, column; host writes `1 / alpha`             |
//! | `update_assignment` | per row: partial sums, folds while > wg remain, completion    |

use tracing::{debug, trace};

use super::config::SolverConfig;
use super::Backend;
use crate::bounds::{Bounds, DeviceBounds, Role};
use crate::error::{Error, Result};
use crate::runtime::kernels::{self as names, MAX_WORKGROUP_SIZE, floor_pow2};
use crate::runtime::{
    DeviceBuffer, DeviceInfo, KernelArg, KernelId, KernelManager, KernelSource, LaunchSize,
};
use crate::tableau::{IndexMap, Tableau};

/// Compiled entry points of the general simplex source
struct Kernels {
    check_bounds: KernelId,
    find_suitable: KernelId,
    find_suitable_complete: KernelId,
    pivot_inner: KernelId,
    pivot_row: KernelId,
    pivot_column: KernelId,
    update_assignment: KernelId,
    reduce_partial_sums: KernelId,
    update_assignment_complete: KernelId,
}

impl Kernels {
    /// Compile every entry point; on failure the ones already compiled are released
    fn compile<K: KernelManager>(manager: &K, source: &KernelSource) -> Result<Self> {
        let mut ids = [KernelId::new(0); names::ALL_KERNELS.len()];
        for (i, entry) in names::ALL_KERNELS.into_iter().enumerate() {
            match manager.compile(source, entry) {
                Ok(id) => ids[i] = id,
                Err(e) => {
                    ids[..i].iter().for_each(|&id| manager.release_kernel(id));
                    return Err(e);
                }
            }
        }
        let [
            check_bounds,
            find_suitable,
            find_suitable_complete,
            pivot_inner,
            pivot_row,
            pivot_column,
            update_assignment,
            reduce_partial_sums,
            update_assignment_complete,
        ] = ids;
        Ok(Self {
            check_bounds,
            find_suitable,
            find_suitable_complete,
            pivot_inner,
            pivot_row,
            pivot_column,
            update_assignment,
            reduce_partial_sums,
            update_assignment_complete,
        })
    }

    fn ids(&self) -> [KernelId; 9] {
        [
            self.check_bounds,
            self.find_suitable,
            self.find_suitable_complete,
            self.pivot_inner,
            self.pivot_row,
            self.pivot_column,
            self.update_assignment,
            self.reduce_partial_sums,
            self.update_assignment_complete,
        ]
    }
}

/// Backend dispatching every operation to a [`KernelManager`]
pub struct ParallelBackend<K: KernelManager> {
    manager: K,
    info: DeviceInfo,
    kernels: Kernels,
    bounds: DeviceBounds<K>,
    tableau: DeviceBuffer<K>,
    col_to_var: DeviceBuffer<K>,
    row_to_var: DeviceBuffer<K>,
    var_to_tableau: DeviceBuffer<K>,
    output: DeviceBuffer<K>,
    partials: [DeviceBuffer<K>; 2],
    workgroup_size: u32,
    tile: u32,
    chunk: u32,
    num_vars: usize,
    num_rows: usize,
    num_cols: usize,
    epsilon: f32,
    prepared: bool,
}

impl<K: KernelManager> ParallelBackend<K> {
    /// Compile the kernels and allocate every device buffer
    pub fn new(manager: K, max_rows: usize, num_cols: usize, config: &SolverConfig) -> Result<Self> {
        let info = manager.device_info();
        if info.max_workgroup_size == 0 {
            return Err(Error::unsupported_backend(
                info.family,
                format!("device '{}' reports a zero workgroup size", info.name),
            ));
        }

        let cap = config.max_workgroup_size.unwrap_or(MAX_WORKGROUP_SIZE);
        let workgroup_size = floor_pow2(info.max_workgroup_size.min(MAX_WORKGROUP_SIZE).min(cap));
        let mut tile = 1u32;
        while (tile * 2) * (tile * 2) <= workgroup_size {
            tile *= 2;
        }
        let chunk = info.compute_units.max(1) * workgroup_size;

        let source = KernelSource::general_simplex(info.family);
        let kernels = Kernels::compile(&manager, &source)?;

        let map = IndexMap::new(max_rows, num_cols);
        let groups = num_cols.div_ceil(workgroup_size as usize);
        let backend = Self {
            bounds: DeviceBounds::new(&manager, max_rows, num_cols)?,
            tableau: DeviceBuffer::zeroed::<f32>(&manager, max_rows * num_cols)?,
            col_to_var: DeviceBuffer::from_slice(&manager, map.col_to_var())?,
            row_to_var: DeviceBuffer::from_slice(&manager, map.row_to_var())?,
            var_to_tableau: DeviceBuffer::from_slice(&manager, map.var_to_tableau())?,
            output: DeviceBuffer::zeroed::<u32>(&manager, 1)?,
            partials: [
                DeviceBuffer::zeroed::<f32>(&manager, groups)?,
                DeviceBuffer::zeroed::<f32>(&manager, groups)?,
            ],
            manager,
            kernels,
            workgroup_size,
            tile,
            chunk,
            num_vars: max_rows + num_cols,
            num_rows: 0,
            num_cols,
            epsilon: config.epsilon,
            prepared: false,
            info,
        };
        debug!(
            device = %backend.info.name,
            source = source.name,
            workgroup_size,
            chunk,
            "parallel backend ready"
        );
        Ok(backend)
    }

    /// Workgroup size used by every 1-D launch
    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Variables covered by one `check_bounds` / `find_suitable` launch
    pub fn chunk_size(&self) -> u32 {
        self.chunk
    }

    /// Device the backend runs on
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Kernel manager handle
    pub fn manager(&self) -> &K {
        &self.manager
    }

    fn bind(&self, kernel: KernelId, args: &[(usize, KernelArg)]) -> Result<()> {
        for &(index, arg) in args {
            self.manager.set_arg(kernel, index, arg)?;
        }
        Ok(())
    }

    fn run(&self, kernel: KernelId, entry: &'static str, size: LaunchSize) -> Result<()> {
        trace!(kernel = entry, global = ?size.global, local = ?size.local, "launch");
        self.manager.launch(kernel, size)
    }

    fn upload_maps(&self, map: &IndexMap) -> Result<()> {
        self.col_to_var.write(0, map.col_to_var())?;
        self.row_to_var.write(0, map.row_to_var())?;
        self.var_to_tableau.write(0, map.var_to_tableau())
    }

    fn bind_invariants(&self) -> Result<()> {
        use KernelArg::{Buffer as B, F32, U32};

        let k = &self.kernels;
        let b = &self.bounds;
        let num_vars = U32(self.num_vars as u32);
        let num_rows = U32(self.num_rows as u32);
        let num_cols = U32(self.num_cols as u32);

        self.bind(
            k.check_bounds,
            &[
                (0, num_vars),
                (2, F32(self.epsilon)),
                (3, B(b.lower_buffer().id())),
                (4, B(b.upper_buffer().id())),
                (5, B(b.bounded_buffer().id())),
                (6, B(b.assignment_buffer().id())),
                (7, B(b.flag_buffer().id())),
                (8, self.output.arg()),
            ],
        )?;
        self.bind(
            k.find_suitable,
            &[
                (0, num_vars),
                (1, num_cols),
                (4, self.tableau.arg()),
                (5, B(b.lower_buffer().id())),
                (6, B(b.upper_buffer().id())),
                (7, B(b.bounded_buffer().id())),
                (8, B(b.assignment_buffer().id())),
                (9, B(b.flag_buffer().id())),
                (10, self.var_to_tableau.arg()),
                (11, self.output.arg()),
            ],
        )?;
        self.bind(
            k.find_suitable_complete,
            &[
                (0, num_cols),
                (3, self.tableau.arg()),
                (4, B(b.lower_buffer().id())),
                (5, B(b.upper_buffer().id())),
                (6, B(b.bounded_buffer().id())),
                (7, B(b.assignment_buffer().id())),
                (8, self.var_to_tableau.arg()),
            ],
        )?;
        self.bind(
            k.pivot_inner,
            &[(3, num_rows), (4, num_cols), (5, self.tableau.arg())],
        )?;
        self.bind(k.pivot_row, &[(3, num_cols), (4, self.tableau.arg())])?;
        self.bind(
            k.pivot_column,
            &[(3, num_rows), (4, num_cols), (5, self.tableau.arg())],
        )?;
        self.bind(
            k.update_assignment,
            &[
                (0, num_cols),
                (2, self.tableau.arg()),
                (3, B(b.assignment_buffer().id())),
                (4, self.col_to_var.arg()),
                (5, self.partials[0].arg()),
            ],
        )?;
        self.bind(
            k.update_assignment_complete,
            &[(3, B(b.assignment_buffer().id()))],
        )
    }

    /// Run a chunked scan kernel until a chunk reports a hit
    fn scan(&self, kernel: KernelId, entry: &'static str, offset_arg: usize) -> Result<Option<usize>> {
        let sentinel = self.num_vars as u32;
        self.output.set(0, sentinel)?;
        let mut offset = 0usize;
        while offset < self.num_vars {
            self.manager
                .set_arg(kernel, offset_arg, KernelArg::U32(offset as u32))?;
            self.run(kernel, entry, LaunchSize::linear(self.chunk, self.workgroup_size))?;
            let hit: u32 = self.output.get(0)?;
            if hit < sentinel {
                return Ok(Some(hit as usize));
            }
            offset += self.chunk as usize;
        }
        Ok(None)
    }

    fn ensure_prepared(&self) -> Result<()> {
        if !self.prepared {
            return Err(Error::Internal(
                "parallel backend used before prepare".to_string(),
            ));
        }
        Ok(())
    }
}

impl<K: KernelManager> Backend for ParallelBackend<K> {
    fn name(&self) -> String {
        format!("parallel ({})", self.info.name)
    }

    fn bounds(&self) -> &dyn Bounds {
        &self.bounds
    }

    fn bounds_mut(&mut self) -> &mut dyn Bounds {
        &mut self.bounds
    }

    fn prepare(&mut self, tableau: &Tableau, map: &IndexMap) -> Result<()> {
        self.num_rows = tableau.num_rows();
        self.tableau.write(0, tableau.as_slice())?;
        self.upload_maps(map)?;
        self.bind_invariants()?;
        self.prepared = true;
        debug!(rows = self.num_rows, cols = self.num_cols, "tableau uploaded");
        Ok(())
    }

    fn check_bounds(&mut self, _map: &IndexMap) -> Result<Option<usize>> {
        self.ensure_prepared()?;
        self.scan(self.kernels.check_bounds, names::CHECK_BOUNDS, 1)
    }

    fn find_suitable(
        &mut self,
        _tableau: &Tableau,
        _map: &IndexMap,
        broken: usize,
    ) -> Result<Option<usize>> {
        self.ensure_prepared()?;
        let k = &self.kernels;
        self.manager
            .set_arg(k.find_suitable, 2, KernelArg::U32(broken as u32))?;
        let Some(suitable) = self.scan(k.find_suitable, names::FIND_SUITABLE, 3)? else {
            return Ok(None);
        };

        self.bind(
            k.find_suitable_complete,
            &[
                (1, KernelArg::U32(broken as u32)),
                (2, KernelArg::U32(suitable as u32)),
            ],
        )?;
        self.run(
            k.find_suitable_complete,
            names::FIND_SUITABLE_COMPLETE,
            LaunchSize::linear(1, 1),
        )?;
        Ok(Some(suitable))
    }

    fn pivot(
        &mut self,
        _tableau: &mut Tableau,
        map: &mut IndexMap,
        leaving: usize,
        entering: usize,
    ) -> Result<()> {
        self.ensure_prepared()?;
        let row = map.position(leaving);
        let col = map.position(entering);
        let pivot = row * self.num_cols + col;
        let alpha: f32 = self.tableau.get(pivot)?;
        if alpha == 0.0 {
            return Err(Error::Internal(format!(
                "zero pivot element at ({row}, {col})"
            )));
        }

        let k = &self.kernels;
        let shared = [
            (0, KernelArg::F32(alpha)),
            (1, KernelArg::U32(row as u32)),
            (2, KernelArg::U32(col as u32)),
        ];
        self.bind(k.pivot_inner, &shared)?;
        self.bind(k.pivot_row, &shared)?;
        self.bind(k.pivot_column, &shared)?;

        let (rows, cols) = (self.num_rows as u32, self.num_cols as u32);
        let wg = self.workgroup_size;
        self.run(
            k.pivot_inner,
            names::PIVOT_UPDATE_INNER,
            LaunchSize::planar((cols, rows), (self.tile, self.tile)),
        )?;
        self.run(
            k.pivot_row,
            names::PIVOT_UPDATE_ROW,
            LaunchSize::linear(cols, wg),
        )?;
        self.run(
            k.pivot_column,
            names::PIVOT_UPDATE_COLUMN,
            LaunchSize::linear(rows, wg),
        )?;
        self.tableau.set(pivot, 1.0f32 / alpha)?;

        map.swap(leaving, entering);
        self.upload_maps(map)?;
        self.bounds.set_role(leaving, Role::Nonbasic)?;
        self.bounds.set_role(entering, Role::Basic)?;
        trace!(row, col, alpha, "pivot applied");
        Ok(())
    }

    fn update_assignment(&mut self, _tableau: &Tableau, map: &IndexMap) -> Result<()> {
        self.ensure_prepared()?;
        let k = &self.kernels;
        let wg = self.workgroup_size;
        let groups = (self.num_cols as u32).div_ceil(wg);

        for row in 0..self.num_rows {
            self.manager
                .set_arg(k.update_assignment, 1, KernelArg::U32(row as u32))?;
            self.run(
                k.update_assignment,
                names::UPDATE_ASSIGNMENT,
                LaunchSize::linear(groups * wg, wg),
            )?;

            let mut count = groups;
            let mut src = 0usize;
            while count > wg {
                let next = count.div_ceil(wg);
                self.bind(
                    k.reduce_partial_sums,
                    &[
                        (0, KernelArg::U32(count)),
                        (1, self.partials[src].arg()),
                        (2, self.partials[1 - src].arg()),
                    ],
                )?;
                self.run(
                    k.reduce_partial_sums,
                    names::REDUCE_PARTIAL_SUMS,
                    LaunchSize::linear(next * wg, wg),
                )?;
                src = 1 - src;
                count = next;
            }

            self.bind(
                k.update_assignment_complete,
                &[
                    (0, KernelArg::U32(count)),
                    (1, KernelArg::U32(map.row_var(row) as u32)),
                    (2, self.partials[src].arg()),
                ],
            )?;
            self.run(
                k.update_assignment_complete,
                names::UPDATE_ASSIGNMENT_COMPLETE,
                LaunchSize::linear(wg, wg),
            )?;
        }
        Ok(())
    }

    fn tableau_entry(&self, tableau: &Tableau, row: usize, col: usize) -> Result<f32> {
        if !self.prepared {
            return tableau.get(row, col);
        }
        Error::check_index(row, tableau.max_rows())?;
        Error::check_index(col, self.num_cols)?;
        self.tableau.get(row * self.num_cols + col)
    }
}

impl<K: KernelManager> Drop for ParallelBackend<K> {
    fn drop(&mut self) {
        for id in self.kernels.ids() {
            self.manager.release_kernel(id);
        }
    }
}
