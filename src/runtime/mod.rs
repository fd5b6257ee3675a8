//! Kernel-management runtimes for the parallel backend
//!
//! The parallel backend never talks to a device directly. Every allocation,
//! transfer and launch goes through a [`KernelManager`], the collaborator
//! contract this module defines.
//!
//! # Architecture
//!
//! ```text
//! KernelManager (device owner)
//! ├── DeviceInfo   (family, launch width, compute units)
//! ├── BufferId     (device allocation, wrapped by RAII DeviceBuffer)
//! ├── KernelId     (compiled entry point from a named KernelSource)
//! └── KernelArg    (positional scalar or buffer binding)
//! ```
//!
//! Implementations:
//!
//! | Family   | Manager              | Feature |
//! |----------|----------------------|---------|
//! | Host     | `HostKernelManager`  | always  |
//! | WebGPU   | `WgpuKernelManager`  | `wgpu`  |
//! | CUDA     | `CudaKernelManager`  | `cuda`  |

pub mod host;
pub mod kernels;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "wgpu")]
pub mod wgpu;

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

pub use host::{HostDeviceConfig, HostKernelManager};

/// Device family, used to pick a kernel source artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// In-process host device executing the built-in host kernels
    Host,
    /// NVIDIA CUDA devices (PTX kernels)
    Cuda,
    /// WebGPU adapters (WGSL kernels)
    WebGpu,
    /// OpenCL-style devices (no runtime in this build)
    OpenCl,
}

impl DeviceFamily {
    /// Short lowercase name used in logs and device names
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Host => "host",
            DeviceFamily::Cuda => "cuda",
            DeviceFamily::WebGpu => "wgpu",
            DeviceFamily::OpenCl => "opencl",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities reported by a kernel manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device family
    pub family: DeviceFamily,
    /// Human-readable device name
    pub name: String,
    /// Maximum number of work items in one workgroup
    pub max_workgroup_size: u32,
    /// Number of compute units (SMs, CUs, host workers)
    pub compute_units: u32,
}

/// Handle to a device allocation owned by a kernel manager
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    /// Wrap a manager-specific buffer identifier
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Manager-specific identifier
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Handle to a compiled kernel entry point
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelId(usize);

impl KernelId {
    /// Wrap a manager-specific kernel identifier
    pub fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Manager-specific identifier
    #[inline]
    pub fn raw(&self) -> usize {
        self.0
    }
}

/// Positional kernel argument
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelArg {
    /// Unsigned 32-bit scalar
    U32(u32),
    /// 32-bit float scalar
    F32(f32),
    /// Device buffer
    Buffer(BufferId),
}

impl KernelArg {
    /// Bit pattern of a scalar argument, `None` for buffers
    pub fn scalar_bits(&self) -> Option<u32> {
        match self {
            KernelArg::U32(v) => Some(*v),
            KernelArg::F32(v) => Some(v.to_bits()),
            KernelArg::Buffer(_) => None,
        }
    }

    /// Buffer handle of a buffer argument
    pub fn buffer(&self) -> Option<BufferId> {
        match self {
            KernelArg::Buffer(id) => Some(*id),
            _ => None,
        }
    }
}

/// Named kernel source artifact for a device family
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelSource {
    /// Artifact name, e.g. `general_simplex.cu`
    pub name: &'static str,
    /// Family the artifact targets
    pub family: DeviceFamily,
}

impl KernelSource {
    /// The general simplex kernel source for a device family
    pub fn general_simplex(family: DeviceFamily) -> Self {
        let name = match family {
            DeviceFamily::Host => "general_simplex.host",
            DeviceFamily::Cuda => "general_simplex.cu",
            DeviceFamily::WebGpu => "general_simplex.wgsl",
            DeviceFamily::OpenCl => "general_simplex.cl",
        };
        Self { name, family }
    }
}

/// Global and local (workgroup) size triples of a launch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchSize {
    /// Total work items requested per dimension
    pub global: [u32; 3],
    /// Work items per workgroup per dimension
    pub local: [u32; 3],
}

impl LaunchSize {
    /// One-dimensional launch
    pub fn linear(global: u32, local: u32) -> Self {
        Self {
            global: [global, 1, 1],
            local: [local, 1, 1],
        }
    }

    /// Two-dimensional launch, `x` fastest
    pub fn planar(global: (u32, u32), local: (u32, u32)) -> Self {
        Self {
            global: [global.0, global.1, 1],
            local: [local.0, local.1, 1],
        }
    }

    /// Number of workgroups per dimension (global rounded up to the local size)
    pub fn groups(&self) -> [u32; 3] {
        [
            self.global[0].div_ceil(self.local[0].max(1)),
            self.global[1].div_ceil(self.local[1].max(1)),
            self.global[2].div_ceil(self.local[2].max(1)),
        ]
    }

    /// Work items per workgroup
    pub fn workgroup_items(&self) -> u64 {
        self.local.iter().map(|&l| l as u64).product()
    }

    /// Reject empty dimensions and workgroups wider than the device allows
    pub fn validate(&self, kernel: &'static str, max_workgroup_size: u32) -> Result<()> {
        if self.local.contains(&0) || self.global.contains(&0) {
            return Err(Error::launch(
                kernel,
                format!("empty launch dimension: {:?}", self),
            ));
        }
        if self.workgroup_items() > max_workgroup_size as u64 {
            return Err(Error::launch(
                kernel,
                format!(
                    "workgroup of {} items exceeds device limit {}",
                    self.workgroup_items(),
                    max_workgroup_size
                ),
            ));
        }
        Ok(())
    }
}

/// Collaborator contract for device and kernel management
///
/// Managers are cheap handles (`Clone` shares the same device), and every
/// call blocks until the device has finished the requested work. Buffers are
/// addressed in bytes; all solver data is 4-byte words.
pub trait KernelManager: Clone + Send + Sync + 'static {
    /// Device capabilities
    fn device_info(&self) -> DeviceInfo;

    /// Allocate a zero-filled buffer of at least `size_bytes`
    fn allocate(&self, size_bytes: usize) -> Result<BufferId>;

    /// Allocate a buffer initialised from host bytes
    fn allocate_from_host(&self, data: &[u8]) -> Result<BufferId> {
        let id = self.allocate(data.len())?;
        self.copy_to_device(id, 0, data)?;
        Ok(id)
    }

    /// Release a buffer; unknown ids are ignored
    fn release(&self, buffer: BufferId);

    /// Compile (or fetch from cache) an entry point of a kernel source
    fn compile(&self, source: &KernelSource, entry: &'static str) -> Result<KernelId>;

    /// Release a compiled kernel and its bound arguments; unknown ids are ignored
    fn release_kernel(&self, kernel: KernelId);

    /// Bind a positional argument of a compiled kernel
    fn set_arg(&self, kernel: KernelId, index: usize, arg: KernelArg) -> Result<()>;

    /// Launch a kernel with its currently bound arguments and wait for it
    fn launch(&self, kernel: KernelId, size: LaunchSize) -> Result<()>;

    /// Blocking host-to-device copy at a byte offset
    fn copy_to_device(&self, buffer: BufferId, byte_offset: usize, data: &[u8]) -> Result<()>;

    /// Blocking device-to-host copy from a byte offset
    fn copy_from_device(&self, buffer: BufferId, byte_offset: usize, out: &mut [u8])
    -> Result<()>;
}

/// Device allocation released when dropped
pub struct DeviceBuffer<K: KernelManager> {
    manager: K,
    id: BufferId,
    len: usize,
}

impl<K: KernelManager> DeviceBuffer<K> {
    /// Allocate `len` zeroed elements of `T`
    pub fn zeroed<T: Pod>(manager: &K, len: usize) -> Result<Self> {
        let bytes = (len * std::mem::size_of::<T>()).max(4);
        let id = manager.allocate(bytes)?;
        Ok(Self {
            manager: manager.clone(),
            id,
            len,
        })
    }

    /// Allocate and upload a host slice
    pub fn from_slice<T: Pod>(manager: &K, data: &[T]) -> Result<Self> {
        if data.is_empty() {
            return Self::zeroed::<T>(manager, 0);
        }
        let id = manager.allocate_from_host(bytemuck::cast_slice(data))?;
        Ok(Self {
            manager: manager.clone(),
            id,
            len: data.len(),
        })
    }

    /// Buffer handle for argument binding
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Number of elements the buffer was created for
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer was created empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffer as a kernel argument
    #[inline]
    pub fn arg(&self) -> KernelArg {
        KernelArg::Buffer(self.id)
    }

    /// Upload `data` starting at element `offset`
    pub fn write<T: Pod>(&self, offset: usize, data: &[T]) -> Result<()> {
        self.check_range(offset, data.len())?;
        self.manager.copy_to_device(
            self.id,
            offset * std::mem::size_of::<T>(),
            bytemuck::cast_slice(data),
        )
    }

    /// Download into `out` starting at element `offset`
    pub fn read<T: Pod>(&self, offset: usize, out: &mut [T]) -> Result<()> {
        self.check_range(offset, out.len())?;
        self.manager.copy_from_device(
            self.id,
            offset * std::mem::size_of::<T>(),
            bytemuck::cast_slice_mut(out),
        )
    }

    /// Download a single element
    pub fn get<T: Pod + Zeroable>(&self, index: usize) -> Result<T> {
        let mut value = [T::zeroed()];
        self.read(index, &mut value)?;
        Ok(value[0])
    }

    /// Upload a single element
    pub fn set<T: Pod>(&self, index: usize, value: T) -> Result<()> {
        self.write(index, &[value])
    }

    fn check_range(&self, offset: usize, count: usize) -> Result<()> {
        if offset + count > self.len {
            return Err(Error::IndexOutOfBounds {
                index: offset + count,
                size: self.len,
            });
        }
        Ok(())
    }
}

impl<K: KernelManager> Drop for DeviceBuffer<K> {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}

impl<K: KernelManager> fmt::Debug for DeviceBuffer<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_groups_round_up() {
        let size = LaunchSize::linear(10, 4);
        assert_eq!(size.groups(), [3, 1, 1]);
        let size = LaunchSize::planar((5, 7), (2, 2));
        assert_eq!(size.groups(), [3, 4, 1]);
        assert_eq!(size.workgroup_items(), 4);
    }

    #[test]
    fn test_launch_validation() {
        assert!(LaunchSize::linear(8, 4).validate("k", 4).is_ok());
        assert!(LaunchSize::linear(8, 8).validate("k", 4).is_err());
        assert!(LaunchSize::linear(0, 4).validate("k", 4).is_err());
        assert!(LaunchSize::planar((4, 4), (4, 2)).validate("k", 4).is_err());
    }

    #[test]
    fn test_scalar_bits() {
        assert_eq!(KernelArg::U32(7).scalar_bits(), Some(7));
        assert_eq!(KernelArg::F32(1.5).scalar_bits(), Some(1.5f32.to_bits()));
        assert_eq!(KernelArg::Buffer(BufferId::new(3)).scalar_bits(), None);
        assert_eq!(
            KernelArg::Buffer(BufferId::new(3)).buffer(),
            Some(BufferId::new(3))
        );
    }

    #[test]
    fn test_source_per_family() {
        assert_eq!(
            KernelSource::general_simplex(DeviceFamily::Cuda).name,
            "general_simplex.cu"
        );
        assert_eq!(
            KernelSource::general_simplex(DeviceFamily::WebGpu).name,
            "general_simplex.wgsl"
        );
    }

    #[test]
    fn test_device_buffer_release_on_drop() {
        let manager = HostKernelManager::new(HostDeviceConfig::default());
        let id = {
            let buffer = DeviceBuffer::from_slice(&manager, &[1.0f32, 2.0, 3.0]).unwrap();
            assert_eq!(buffer.get::<f32>(1).unwrap(), 2.0);
            buffer.set(2, 9.0f32).unwrap();
            let mut out = [0.0f32; 3];
            buffer.read(0, &mut out).unwrap();
            assert_eq!(out, [1.0, 2.0, 9.0]);
            assert!(buffer.get::<f32>(3).is_err());
            buffer.id()
        };
        assert_eq!(manager.live_buffers(), 0);
        let mut out = [0u8; 4];
        assert!(manager.copy_from_device(id, 0, &mut out).is_err());
    }
}
