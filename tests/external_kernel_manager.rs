//! Simulates an external crate supplying its own kernel manager.
//!
//! The manager below forwards to the host device and records every launch, so
//! the test also pins down how the parallel backend drives its kernels.

mod common;

use std::sync::Arc;

use common::*;
use gsimplex::error::Result;
use gsimplex::prelude::*;
use gsimplex::runtime::kernels as names;
use gsimplex::runtime::{BufferId, DeviceInfo, KernelArg, KernelId, KernelSource, LaunchSize};
use parking_lot::Mutex;

#[derive(Clone, Default)]
struct RecordingManager {
    inner: HostKernelManager,
    entries: Arc<Mutex<Vec<&'static str>>>,
    launches: Arc<Mutex<Vec<(&'static str, LaunchSize)>>>,
}

impl KernelManager for RecordingManager {
    fn device_info(&self) -> DeviceInfo {
        let mut info = self.inner.device_info();
        info.name = "recording".to_string();
        info
    }

    fn allocate(&self, size_bytes: usize) -> Result<BufferId> {
        self.inner.allocate(size_bytes)
    }

    fn release(&self, buffer: BufferId) {
        self.inner.release(buffer)
    }

    fn compile(&self, source: &KernelSource, entry: &'static str) -> Result<KernelId> {
        let id = self.inner.compile(source, entry)?;
        let mut entries = self.entries.lock();
        if entries.len() <= id.raw() {
            entries.resize(id.raw() + 1, "");
        }
        entries[id.raw()] = entry;
        Ok(id)
    }

    fn release_kernel(&self, kernel: KernelId) {
        self.inner.release_kernel(kernel)
    }

    fn set_arg(&self, kernel: KernelId, index: usize, arg: KernelArg) -> Result<()> {
        self.inner.set_arg(kernel, index, arg)
    }

    fn launch(&self, kernel: KernelId, size: LaunchSize) -> Result<()> {
        let entry = self.entries.lock()[kernel.raw()];
        self.launches.lock().push((entry, size));
        self.inner.launch(kernel, size)
    }

    fn copy_to_device(&self, buffer: BufferId, byte_offset: usize, data: &[u8]) -> Result<()> {
        self.inner.copy_to_device(buffer, byte_offset, data)
    }

    fn copy_from_device(
        &self,
        buffer: BufferId,
        byte_offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        self.inner.copy_from_device(buffer, byte_offset, out)
    }
}

#[test]
fn test_external_manager_solves() {
    let manager = RecordingManager::default();
    let mut solver =
        Solver::with_kernel_manager(3, 2, manager.clone(), SolverConfig::default()).unwrap();
    scenario_a().load(&mut solver);

    assert!(solver.solve().unwrap());
    assert_allclose_f32(&solver.solution().unwrap(), &[1.0, 1.0], 1e-5, 1e-5, "A");
    assert!(solver.backend_name().contains("recording"));

    let entries = manager.entries.lock().clone();
    for entry in names::ALL_KERNELS {
        assert!(entries.contains(&entry), "{entry} not compiled");
    }

    let launches = manager.launches.lock().clone();
    let count = |entry: &str| launches.iter().filter(|(e, _)| *e == entry).count();
    // two pivots, three kernels each, then one assignment update per row
    assert_eq!(count(names::PIVOT_UPDATE_INNER), 2);
    assert_eq!(count(names::PIVOT_UPDATE_ROW), 2);
    assert_eq!(count(names::PIVOT_UPDATE_COLUMN), 2);
    assert_eq!(count(names::UPDATE_ASSIGNMENT), 6);
    assert_eq!(count(names::UPDATE_ASSIGNMENT_COMPLETE), 6);
    assert_eq!(count(names::FIND_SUITABLE_COMPLETE), 2);

    for (entry, size) in &launches {
        assert!(size.workgroup_items() <= 256, "{entry}: {:?}", size);
    }
}

#[test]
fn test_buffers_released_with_solver() {
    let manager = RecordingManager::default();
    {
        let mut solver =
            Solver::with_kernel_manager(3, 2, manager.clone(), SolverConfig::default()).unwrap();
        scenario_b().load(&mut solver);
        assert!(!solver.solve().unwrap());
        assert!(manager.inner.live_buffers() > 0);
        assert_eq!(manager.inner.live_kernels(), names::ALL_KERNELS.len());
    }
    assert_eq!(manager.inner.live_buffers(), 0);
    assert_eq!(manager.inner.live_kernels(), 0);
}

#[test]
fn test_manager_reused_across_solvers() {
    let manager = HostKernelManager::default();
    for _ in 0..100 {
        let mut solver =
            Solver::with_kernel_manager(3, 2, manager.clone(), SolverConfig::default()).unwrap();
        scenario_a().load(&mut solver);
        assert!(solver.solve().unwrap());
    }
    assert_eq!(manager.live_buffers(), 0);
    assert_eq!(manager.live_kernels(), 0);
}
