//! WebGPU kernel manager (requires `wgpu` feature)
//!
//! Runs the general simplex kernels as WGSL compute shaders on any adapter
//! wgpu can open (Vulkan, Metal, DX12). Every call blocks on the queue, so the
//! manager behaves like the host device from the solver's point of view.
//!
//! # Argument passing
//!
//! Buffer arguments bind as read-write storage buffers in argument order.
//! Scalar arguments are packed into a small uniform block bound after them;
//! floats travel as their bit pattern.

mod device;
mod pipeline;
mod wgsl;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use smallvec::SmallVec;
use wgpu::{Buffer, BufferUsages, Device, Queue};

use self::device::AdapterInfo;
use self::pipeline::PipelineCache;
use super::kernels as names;
use super::{
    BufferId, DeviceFamily, DeviceInfo, KernelArg, KernelId, KernelManager, KernelSource,
    LaunchSize,
};
use crate::error::{Error, Result};

/// WebGPU does not report a compute unit count; chunked scans assume this many.
const ESTIMATED_COMPUTE_UNITS: u32 = 32;

/// Kernel manager backed by a wgpu device and queue
#[derive(Clone)]
pub struct WgpuKernelManager {
    inner: Arc<Inner>,
}

struct Inner {
    device: Arc<Device>,
    queue: Arc<Queue>,
    adapter: AdapterInfo,
    max_workgroup_size: u32,
    max_groups_per_dim: u32,
    pipelines: PipelineCache,
    buffers: Mutex<HashMap<u64, Arc<Buffer>>>,
    kernels: Mutex<HashMap<usize, WgpuKernel>>,
    next_id: AtomicU64,
}

struct WgpuKernel {
    entry: &'static str,
    scalars: usize,
    args: SmallVec<[Option<KernelArg>; 12]>,
}

impl WgpuKernelManager {
    /// Open the WebGPU adapter at `index` in enumeration order
    pub fn new(index: usize) -> Result<Self> {
        let (device, queue, adapter) = device::open_device(index)?;
        let limits = device.limits();
        let max_workgroup_size = limits
            .max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x)
            .min(names::MAX_WORKGROUP_SIZE);
        let max_groups_per_dim = limits.max_compute_workgroups_per_dimension;

        tracing::debug!(
            adapter = %adapter.name,
            backend = ?adapter.backend,
            max_workgroup_size,
            "opened WebGPU device"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                pipelines: PipelineCache::new(device.clone()),
                device,
                queue,
                adapter,
                max_workgroup_size,
                max_groups_per_dim,
                buffers: Mutex::new(HashMap::new()),
                kernels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    fn buffer(&self, id: BufferId) -> Result<Arc<Buffer>> {
        self.inner
            .buffers
            .lock()
            .get(&id.raw())
            .cloned()
            .ok_or_else(|| Error::Backend(format!("unknown WebGPU buffer {}", id.raw())))
    }

    fn wait(&self, submission: wgpu::SubmissionIndex) -> Result<()> {
        self.inner
            .device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: Some(Duration::from_secs(60)),
            })
            .map_err(|e| Error::Backend(format!("GPU poll failed: {e}")))?;
        Ok(())
    }

    fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) -> Result<()> {
        let submission = self.inner.queue.submit(std::iter::once(encoder.finish()));
        self.wait(submission)
    }

    /// Transfers must be word aligned and stay inside the buffer
    fn check_transfer(
        buffer: &Buffer,
        id: BufferId,
        byte_offset: usize,
        len: usize,
    ) -> Result<()> {
        let size = buffer.size();
        if byte_offset % 4 != 0 || len % 4 != 0 || (byte_offset + len) as u64 > size {
            return Err(Error::Backend(format!(
                "transfer of {} bytes at offset {} outside WebGPU buffer {} of {} bytes",
                len,
                byte_offset,
                id.raw(),
                size
            )));
        }
        Ok(())
    }

    /// Read a mapped staging buffer back to the host (blocking)
    fn read_staging(&self, staging: &Buffer, out: &mut [u8]) -> Result<()> {
        let slice = staging.slice(..);

        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.inner
            .device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(Duration::from_secs(60)),
            })
            .map_err(|e| Error::Backend(format!("GPU poll failed during buffer read: {e}")))?;

        let map_result = receiver.recv().map_err(|_| {
            Error::Backend("map_async callback was not invoked during buffer read".into())
        })?;
        map_result.map_err(|e| Error::Backend(format!("map_async failed during buffer read: {e}")))?;

        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(&data[..out.len()]);
        }

        staging.unmap();
        Ok(())
    }
}

impl fmt::Debug for WgpuKernelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuKernelManager")
            .field("adapter", &self.inner.adapter.name)
            .field("backend", &self.inner.adapter.backend)
            .field("max_workgroup_size", &self.inner.max_workgroup_size)
            .finish_non_exhaustive()
    }
}

impl KernelManager for WgpuKernelManager {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: DeviceFamily::WebGpu,
            name: format!("{} ({:?})", self.inner.adapter.name, self.inner.adapter.backend),
            max_workgroup_size: self.inner.max_workgroup_size,
            compute_units: ESTIMATED_COMPUTE_UNITS,
        }
    }

    fn allocate(&self, size_bytes: usize) -> Result<BufferId> {
        let size = (size_bytes.max(4).div_ceil(4) * 4) as u64;
        let buffer = self.inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("general_simplex_buffer"),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.buffers.lock().insert(id, Arc::new(buffer));
        tracing::trace!(buffer = id, size_bytes, "wgpu allocate");
        Ok(BufferId::new(id))
    }

    fn release(&self, buffer: BufferId) {
        if let Some(buffer) = self.inner.buffers.lock().remove(&buffer.raw()) {
            buffer.destroy();
        }
    }

    fn compile(&self, source: &KernelSource, entry: &'static str) -> Result<KernelId> {
        if source.family != DeviceFamily::WebGpu {
            return Err(Error::unsupported_backend(
                source.family,
                format!("WebGPU device cannot run '{}'", source.name),
            ));
        }
        if !wgsl::has_entry(entry) {
            return Err(Error::KernelNotFound {
                source_name: source.name,
                entry,
            });
        }
        let scalars = names::scalar_count(entry).unwrap_or(0);
        let buffers = names::buffer_count(entry).unwrap_or(0);

        // Validate the layout now; pipelines are built per workgroup size at launch
        self.inner.pipelines.layout_for(entry)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) as usize;
        self.inner.kernels.lock().insert(
            id,
            WgpuKernel {
                entry,
                scalars,
                args: SmallVec::from_elem(None, scalars + buffers),
            },
        );
        Ok(KernelId::new(id))
    }

    fn release_kernel(&self, kernel: KernelId) {
        self.inner.kernels.lock().remove(&kernel.raw());
    }

    fn set_arg(&self, kernel: KernelId, index: usize, arg: KernelArg) -> Result<()> {
        let mut kernels = self.inner.kernels.lock();
        let kernel = kernels
            .get_mut(&kernel.raw())
            .ok_or_else(|| Error::Backend(format!("unknown kernel id {}", kernel.raw())))?;
        let arity = kernel.args.len();
        let slot = kernel.args.get_mut(index).ok_or(Error::IndexOutOfBounds {
            index,
            size: arity,
        })?;
        *slot = Some(arg);
        Ok(())
    }

    fn launch(&self, kernel: KernelId, size: LaunchSize) -> Result<()> {
        let (entry, params, buffer_ids) = {
            let kernels = self.inner.kernels.lock();
            let kernel = kernels
                .get(&kernel.raw())
                .ok_or_else(|| Error::Backend(format!("unknown kernel id {}", kernel.raw())))?;

            let mut params = [0u32; wgsl::PARAM_WORDS];
            let mut buffer_ids: SmallVec<[BufferId; 8]> = SmallVec::new();
            for (i, arg) in kernel.args.iter().enumerate() {
                let arg = arg
                    .ok_or_else(|| Error::launch(kernel.entry, format!("argument {i} unset")))?;
                match (i < kernel.scalars, arg) {
                    (true, KernelArg::Buffer(_)) => {
                        return Err(Error::launch(
                            kernel.entry,
                            format!("argument {i} must be a scalar"),
                        ));
                    }
                    (true, scalar) => params[i] = scalar.scalar_bits().unwrap_or(0),
                    (false, KernelArg::Buffer(id)) => buffer_ids.push(id),
                    (false, _) => {
                        return Err(Error::launch(
                            kernel.entry,
                            format!("argument {i} must be a buffer"),
                        ));
                    }
                }
            }
            (kernel.entry, params, buffer_ids)
        };

        size.validate(entry, self.inner.max_workgroup_size)?;
        if size.local[2] != 1 {
            return Err(Error::launch(entry, "WGSL kernels are at most two-dimensional"));
        }
        let groups = size.groups();
        if groups.iter().any(|&g| g > self.inner.max_groups_per_dim) {
            return Err(Error::launch(
                entry,
                format!(
                    "{:?} workgroups exceed the per-dimension limit {}",
                    groups, self.inner.max_groups_per_dim
                ),
            ));
        }

        let buffers = buffer_ids
            .iter()
            .map(|&id| self.buffer(id))
            .collect::<Result<SmallVec<[Arc<Buffer>; 8]>>>()?;

        let pipeline = self
            .inner
            .pipelines
            .get_or_create_pipeline(entry, [size.local[0], size.local[1]])?;
        let layout = self.inner.pipelines.layout_for(entry)?;

        let params_buffer = self.inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("general_simplex_params"),
            size: (wgsl::PARAM_WORDS * 4) as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.inner
            .queue
            .write_buffer(&params_buffer, 0, bytemuck::cast_slice(&params));

        let mut bindings: SmallVec<[&Buffer; 9]> = buffers.iter().map(|b| b.as_ref()).collect();
        bindings.push(&params_buffer);
        let bind_group = self.inner.pipelines.create_bind_group(&layout, &bindings);

        tracing::trace!(kernel = entry, global = ?size.global, local = ?size.local, "wgpu launch");
        let mut encoder = self
            .inner
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(entry) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(entry),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, Some(&bind_group), &[]);
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        }
        self.submit_and_wait(encoder)
    }

    fn copy_to_device(&self, buffer: BufferId, byte_offset: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let target = self.buffer(buffer)?;
        Self::check_transfer(&target, buffer, byte_offset, data.len())?;
        self.inner
            .queue
            .write_buffer(&target, byte_offset as u64, data);
        let submission = self.inner.queue.submit(std::iter::empty());
        self.wait(submission)
    }

    fn copy_from_device(
        &self,
        buffer: BufferId,
        byte_offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let source = self.buffer(buffer)?;
        Self::check_transfer(&source, buffer, byte_offset, out.len())?;

        let staging = self.inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("general_simplex_staging"),
            size: out.len() as u64,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .inner
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("general_simplex_readback"),
            });
        encoder.copy_buffer_to_buffer(&source, byte_offset as u64, &staging, 0, out.len() as u64);
        self.submit_and_wait(encoder)?;
        self.read_staging(&staging, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DeviceBuffer;

    fn manager() -> Option<WgpuKernelManager> {
        match WgpuKernelManager::new(0) {
            Ok(m) => Some(m),
            Err(e) => {
                println!("No GPU available, skipping test: {}", e);
                None
            }
        }
    }

    fn source() -> KernelSource {
        KernelSource::general_simplex(DeviceFamily::WebGpu)
    }

    #[test]
    fn test_buffer_roundtrip() {
        let Some(m) = manager() else { return };
        let buf = DeviceBuffer::from_slice(&m, &[1.0f32, 2.0, 3.0]).unwrap();
        buf.set(1, 5.0f32).unwrap();
        let mut out = [0.0f32; 3];
        buf.read(0, &mut out).unwrap();
        assert_eq!(out, [1.0, 5.0, 3.0]);
    }

    #[test]
    fn test_compile_rejects_foreign_source() {
        let Some(m) = manager() else { return };
        let host = KernelSource::general_simplex(DeviceFamily::Host);
        assert!(m.compile(&host, names::CHECK_BOUNDS).is_err());
        assert!(matches!(
            m.compile(&source(), "no_such_kernel"),
            Err(Error::KernelNotFound { .. })
        ));
    }

    #[test]
    fn test_reduce_partial_sums() {
        let Some(m) = manager() else { return };
        let input = DeviceBuffer::from_slice(&m, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let output = DeviceBuffer::zeroed::<f32>(&m, 2).unwrap();
        let k = m.compile(&source(), names::REDUCE_PARTIAL_SUMS).unwrap();
        m.set_arg(k, 0, KernelArg::U32(6)).unwrap();
        m.set_arg(k, 1, input.arg()).unwrap();
        m.set_arg(k, 2, output.arg()).unwrap();
        m.launch(k, LaunchSize::linear(8, 4)).unwrap();
        let mut out = [0.0f32; 2];
        output.read(0, &mut out).unwrap();
        assert_eq!(out, [10.0, 11.0]);
    }

    #[test]
    fn test_pivot_row_kernel() {
        let Some(m) = manager() else { return };
        let tableau = DeviceBuffer::from_slice(&m, &[2.0f32, 1.0, 1.0, 3.0]).unwrap();
        let k = m.compile(&source(), names::PIVOT_UPDATE_ROW).unwrap();
        m.set_arg(k, 0, KernelArg::F32(2.0)).unwrap();
        m.set_arg(k, 1, KernelArg::U32(0)).unwrap();
        m.set_arg(k, 2, KernelArg::U32(0)).unwrap();
        m.set_arg(k, 3, KernelArg::U32(2)).unwrap();
        m.set_arg(k, 4, tableau.arg()).unwrap();
        m.launch(k, LaunchSize::linear(2, 2)).unwrap();
        let mut out = [0.0f32; 4];
        tableau.read(0, &mut out).unwrap();
        assert_eq!(out, [2.0, -0.5, 1.0, 3.0]);
    }
}
