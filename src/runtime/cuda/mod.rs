//! CUDA kernel manager (requires `cuda` feature)
//!
//! Launches the general simplex PTX kernels through cudarc. Buffers are raw
//! device allocations made with the driver API; every launch and copy
//! synchronizes the stream before returning.

mod loader;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cudarc::driver::PushKernelArg;
use cudarc::driver::safe::{CudaContext, CudaFunction, CudaModule, CudaStream, LaunchConfig};
use cudarc::driver::sys::{CUdevice_attribute, CUresult};
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::kernels as names;
use super::{
    BufferId, DeviceFamily, DeviceInfo, KernelArg, KernelId, KernelManager, KernelSource,
    LaunchSize,
};
use crate::error::{Error, Result};

/// Kernel manager bound to one CUDA device
#[derive(Clone)]
pub struct CudaKernelManager {
    inner: Arc<Inner>,
}

struct Inner {
    index: usize,
    context: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    max_threads_per_block: u32,
    multiprocessors: u32,
    module: Mutex<Option<Arc<CudaModule>>>,
    kernels: Mutex<HashMap<usize, CudaKernel>>,
    next_kernel: AtomicUsize,
    /// Device pointer -> allocation size in bytes
    buffers: Mutex<HashMap<u64, usize>>,
}

struct CudaKernel {
    entry: &'static str,
    func: CudaFunction,
    scalars: usize,
    args: SmallVec<[Option<KernelArg>; 12]>,
}

/// A resolved launch argument
enum RawArg {
    U32(u32),
    F32(f32),
    Ptr(u64),
}

fn check(result: CUresult, what: &str) -> Result<()> {
    if result != CUresult::CUDA_SUCCESS {
        return Err(Error::Backend(format!("CUDA {} failed ({:?})", what, result)));
    }
    Ok(())
}

impl CudaKernelManager {
    /// Open CUDA device `index`
    pub fn new(index: usize) -> Result<Self> {
        let context = CudaContext::new(index).map_err(|e| {
            Error::unsupported_backend(
                DeviceFamily::Cuda,
                format!("failed to create CUDA context for device {}: {:?}", index, e),
            )
        })?;
        let stream = context.default_stream();

        let device = cudarc::driver::result::device::get(index as i32)?;
        let max_threads = unsafe {
            cudarc::driver::result::device::get_attribute(
                device,
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
            )
        }?;
        let multiprocessors = unsafe {
            cudarc::driver::result::device::get_attribute(
                device,
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT,
            )
        }?;

        let max_threads_per_block = (max_threads.max(1) as u32).min(names::MAX_WORKGROUP_SIZE);
        tracing::debug!(
            device = index,
            max_threads_per_block,
            multiprocessors,
            "opened CUDA device"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                context,
                stream,
                max_threads_per_block,
                multiprocessors: multiprocessors.max(1) as u32,
                module: Mutex::new(None),
                kernels: Mutex::new(HashMap::new()),
                next_kernel: AtomicUsize::new(0),
                buffers: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn module(&self) -> Result<Arc<CudaModule>> {
        let mut module = self.inner.module.lock();
        if let Some(module) = module.as_ref() {
            return Ok(module.clone());
        }
        let loaded = loader::load_module(&self.inner.context)?;
        *module = Some(loaded.clone());
        Ok(loaded)
    }

    fn buffer_size(&self, id: BufferId) -> Result<usize> {
        self.inner
            .buffers
            .lock()
            .get(&id.raw())
            .copied()
            .ok_or_else(|| Error::Backend(format!("unknown CUDA buffer {:#x}", id.raw())))
    }

    fn check_transfer(&self, id: BufferId, byte_offset: usize, len: usize) -> Result<()> {
        let size = self.buffer_size(id)?;
        if byte_offset + len > size {
            return Err(Error::Backend(format!(
                "transfer of {} bytes at offset {} outside CUDA buffer of {} bytes",
                len, byte_offset, size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for CudaKernelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaKernelManager")
            .field("device", &self.inner.index)
            .field("max_threads_per_block", &self.inner.max_threads_per_block)
            .field("multiprocessors", &self.inner.multiprocessors)
            .finish_non_exhaustive()
    }
}

impl KernelManager for CudaKernelManager {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: DeviceFamily::Cuda,
            name: format!("cuda:{}", self.inner.index),
            max_workgroup_size: self.inner.max_threads_per_block,
            compute_units: self.inner.multiprocessors,
        }
    }

    fn allocate(&self, size_bytes: usize) -> Result<BufferId> {
        let size = size_bytes.max(4);
        self.inner.context.bind_to_thread()?;
        let mut ptr: u64 = 0;
        unsafe {
            check(cudarc::driver::sys::cuMemAlloc_v2(&mut ptr, size), "allocation")?;
            // Freshly allocated buffers read as zero, like the other devices
            check(
                cudarc::driver::sys::cuMemsetD8_v2(ptr, 0, size),
                "buffer clear",
            )?;
        }
        self.inner.buffers.lock().insert(ptr, size);
        tracing::trace!(buffer = ptr, size_bytes, "cuda allocate");
        Ok(BufferId::new(ptr))
    }

    fn release(&self, buffer: BufferId) {
        if self.inner.buffers.lock().remove(&buffer.raw()).is_none() {
            return;
        }
        if self.inner.context.bind_to_thread().is_err() {
            return;
        }
        let result = unsafe { cudarc::driver::sys::cuMemFree_v2(buffer.raw()) };
        if result != CUresult::CUDA_SUCCESS {
            tracing::warn!(buffer = buffer.raw(), ?result, "cuMemFree failed");
        }
    }

    fn compile(&self, source: &KernelSource, entry: &'static str) -> Result<KernelId> {
        if source.family != DeviceFamily::Cuda {
            return Err(Error::unsupported_backend(
                source.family,
                format!("CUDA device cannot run '{}'", source.name),
            ));
        }
        let (Some(scalars), Some(buffers)) = (names::scalar_count(entry), names::buffer_count(entry))
        else {
            return Err(Error::KernelNotFound {
                source_name: source.name,
                entry,
            });
        };
        let module = self.module()?;
        let func = loader::get_kernel_function(&module, source.name, entry)?;

        let id = self.inner.next_kernel.fetch_add(1, Ordering::Relaxed);
        self.inner.kernels.lock().insert(
            id,
            CudaKernel {
                entry,
                func,
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
        let kernels = self.inner.kernels.lock();
        let kernel = kernels
            .get(&kernel.raw())
            .ok_or_else(|| Error::Backend(format!("unknown kernel id {}", kernel.raw())))?;
        size.validate(kernel.entry, self.inner.max_threads_per_block)?;

        let mut raw: SmallVec<[RawArg; 12]> = SmallVec::new();
        for (i, arg) in kernel.args.iter().enumerate() {
            let arg = arg.ok_or_else(|| Error::launch(kernel.entry, format!("argument {i} unset")))?;
            let value = match (i < kernel.scalars, arg) {
                (true, KernelArg::U32(v)) => RawArg::U32(v),
                (true, KernelArg::F32(v)) => RawArg::F32(v),
                (false, KernelArg::Buffer(id)) => {
                    self.buffer_size(id)?;
                    RawArg::Ptr(id.raw())
                }
                (true, _) => {
                    return Err(Error::launch(
                        kernel.entry,
                        format!("argument {i} must be a scalar"),
                    ));
                }
                (false, _) => {
                    return Err(Error::launch(
                        kernel.entry,
                        format!("argument {i} must be a buffer"),
                    ));
                }
            };
            raw.push(value);
        }

        let cfg = LaunchConfig {
            grid_dim: (size.groups()[0], size.groups()[1], size.groups()[2]),
            block_dim: (size.local[0], size.local[1], size.local[2]),
            shared_mem_bytes: 0,
        };

        tracing::trace!(kernel = kernel.entry, global = ?size.global, local = ?size.local, "cuda launch");
        self.inner.context.bind_to_thread()?;
        let mut builder = self.inner.stream.launch_builder(&kernel.func);
        for value in &raw {
            match value {
                RawArg::U32(v) => builder.arg(v),
                RawArg::F32(v) => builder.arg(v),
                RawArg::Ptr(p) => builder.arg(p),
            };
        }
        unsafe { builder.launch(cfg) }
            .map_err(|e| Error::launch(kernel.entry, format!("{:?}", e)))?;
        self.inner.stream.synchronize()?;
        Ok(())
    }

    fn copy_to_device(&self, buffer: BufferId, byte_offset: usize, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_transfer(buffer, byte_offset, data.len())?;
        self.inner.context.bind_to_thread()?;
        self.inner.stream.synchronize()?;
        unsafe {
            check(
                cudarc::driver::sys::cuMemcpyHtoD_v2(
                    buffer.raw() + byte_offset as u64,
                    data.as_ptr() as *const std::ffi::c_void,
                    data.len(),
                ),
                "host-to-device copy",
            )
        }
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
        self.check_transfer(buffer, byte_offset, out.len())?;
        self.inner.context.bind_to_thread()?;
        self.inner.stream.synchronize()?;
        unsafe {
            check(
                cudarc::driver::sys::cuMemcpyDtoH_v2(
                    out.as_mut_ptr() as *mut std::ffi::c_void,
                    buffer.raw() + byte_offset as u64,
                    out.len(),
                ),
                "device-to-host copy",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DeviceBuffer;

    fn manager() -> Option<CudaKernelManager> {
        match CudaKernelManager::new(0) {
            Ok(m) => Some(m),
            Err(e) => {
                println!("No GPU available, skipping test: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_buffer_roundtrip() {
        let Some(m) = manager() else { return };
        let buf = DeviceBuffer::from_slice(&m, &[1u32, 2, 3]).unwrap();
        buf.set(2, 9u32).unwrap();
        let mut out = [0u32; 3];
        buf.read(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 9]);
    }

    #[test]
    fn test_reduce_partial_sums() {
        let Some(m) = manager() else { return };
        let source = KernelSource::general_simplex(DeviceFamily::Cuda);
        let input = DeviceBuffer::from_slice(&m, &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let output = DeviceBuffer::zeroed::<f32>(&m, 2).unwrap();
        let k = m.compile(&source, names::REDUCE_PARTIAL_SUMS).unwrap();
        m.set_arg(k, 0, KernelArg::U32(6)).unwrap();
        m.set_arg(k, 1, input.arg()).unwrap();
        m.set_arg(k, 2, output.arg()).unwrap();
        m.launch(k, LaunchSize::linear(8, 4)).unwrap();
        let mut out = [0.0f32; 2];
        output.read(0, &mut out).unwrap();
        assert_eq!(out, [10.0, 11.0]);
    }
}
