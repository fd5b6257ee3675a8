//! In-process kernel manager
//!
//! Executes the general simplex kernels on the host with the same launch
//! geometry a GPU would see: work items are grouped into workgroups, the
//! reduction kernels fold a zero-padded shared-memory array as a binary tree,
//! and out-of-range work items do nothing. Buffers are word vectors keyed by
//! id behind a `parking_lot` mutex, so cloned handles share one device.

mod kernels;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::kernels as names;
use super::{
    BufferId, DeviceFamily, DeviceInfo, KernelArg, KernelId, KernelManager, KernelSource,
    LaunchSize,
};
use crate::error::{Error, Result};

/// Capabilities of the host device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostDeviceConfig {
    /// Widest workgroup accepted by `launch`
    pub max_workgroup_size: u32,
    /// Number of workgroups one chunked launch covers
    pub compute_units: u32,
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self {
            max_workgroup_size: names::MAX_WORKGROUP_SIZE,
            compute_units: 4,
        }
    }
}

/// Kernel manager executing kernels on the calling thread (2-D launches may
/// fan out over rayon)
#[derive(Clone, Debug)]
pub struct HostKernelManager {
    config: HostDeviceConfig,
    state: Arc<Mutex<HostState>>,
}

type KernelFn = fn(&mut Memory, &Args<'_>, &LaunchSize) -> Result<()>;

#[derive(Debug, Default)]
struct HostState {
    memory: Memory,
    kernels: HashMap<usize, HostKernel>,
    next_kernel: usize,
}

struct HostKernel {
    entry: &'static str,
    func: KernelFn,
    scalars: usize,
    args: SmallVec<[Option<KernelArg>; 12]>,
}

impl std::fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel")
            .field("entry", &self.entry)
            .field("args", &self.args)
            .finish()
    }
}

/// Device memory: word-addressed buffers
#[derive(Debug, Default)]
pub(crate) struct Memory {
    buffers: HashMap<u64, Vec<u32>>,
    next_id: u64,
}

impl Memory {
    fn allocate(&mut self, words: usize) -> BufferId {
        self.next_id += 1;
        self.buffers.insert(self.next_id, vec![0; words]);
        BufferId::new(self.next_id)
    }

    fn missing(id: BufferId) -> Error {
        Error::Backend(format!("unknown host buffer {}", id.raw()))
    }

    /// Read-only words of a buffer
    pub(crate) fn words(&self, id: BufferId) -> Result<&[u32]> {
        self.buffers
            .get(&id.raw())
            .map(Vec::as_slice)
            .ok_or_else(|| Self::missing(id))
    }

    /// Read-only view of a buffer as floats
    pub(crate) fn floats(&self, id: BufferId) -> Result<&[f32]> {
        Ok(bytemuck::cast_slice(self.words(id)?))
    }

    /// Detach a buffer for exclusive mutation; pair with [`Memory::restore`]
    pub(crate) fn take(&mut self, id: BufferId) -> Result<Vec<u32>> {
        self.buffers
            .remove(&id.raw())
            .ok_or_else(|| Self::missing(id))
    }

    pub(crate) fn restore(&mut self, id: BufferId, words: Vec<u32>) {
        self.buffers.insert(id.raw(), words);
    }

    /// Run `body` with `output` detached and the rest of memory readable.
    ///
    /// The output buffer is reattached whether or not `body` succeeds.
    pub(crate) fn with_output<R>(
        &mut self,
        output: BufferId,
        body: impl FnOnce(&Memory, &mut [u32]) -> Result<R>,
    ) -> Result<R> {
        let mut words = self.take(output)?;
        let result = body(self, &mut words);
        self.restore(output, words);
        result
    }

    fn byte_range(&self, id: BufferId, byte_offset: usize, len: usize) -> Result<()> {
        let size = self.words(id)?.len() * 4;
        if byte_offset % 4 != 0 || len % 4 != 0 || byte_offset + len > size {
            return Err(Error::Backend(format!(
                "transfer of {} bytes at offset {} outside host buffer {} of {} bytes",
                len,
                byte_offset,
                id.raw(),
                size
            )));
        }
        Ok(())
    }
}

/// Bound arguments of one launch, split into scalars and buffers
pub(crate) struct Args<'a> {
    entry: &'static str,
    scalars: &'a [u32],
    buffers: &'a [BufferId],
}

impl Args<'_> {
    #[inline]
    pub(crate) fn usize(&self, index: usize) -> usize {
        self.scalars[index] as usize
    }

    #[inline]
    pub(crate) fn f32(&self, index: usize) -> f32 {
        f32::from_bits(self.scalars[index])
    }

    #[inline]
    pub(crate) fn buffer(&self, index: usize) -> BufferId {
        self.buffers[index]
    }

    pub(crate) fn entry(&self) -> &'static str {
        self.entry
    }
}

impl HostKernelManager {
    /// Create a host device
    pub fn new(config: HostDeviceConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    /// Device configuration
    pub fn config(&self) -> &HostDeviceConfig {
        &self.config
    }

    /// Number of buffers currently allocated
    pub fn live_buffers(&self) -> usize {
        self.state.lock().memory.buffers.len()
    }

    /// Number of compiled kernels not yet released
    pub fn live_kernels(&self) -> usize {
        self.state.lock().kernels.len()
    }
}

impl Default for HostKernelManager {
    fn default() -> Self {
        Self::new(HostDeviceConfig::default())
    }
}

impl KernelManager for HostKernelManager {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: DeviceFamily::Host,
            name: format!("host ({} compute units)", self.config.compute_units),
            max_workgroup_size: self.config.max_workgroup_size,
            compute_units: self.config.compute_units,
        }
    }

    fn allocate(&self, size_bytes: usize) -> Result<BufferId> {
        let id = self.state.lock().memory.allocate(size_bytes.div_ceil(4));
        tracing::trace!(buffer = id.raw(), size_bytes, "host allocate");
        Ok(id)
    }

    fn release(&self, buffer: BufferId) {
        self.state.lock().memory.buffers.remove(&buffer.raw());
    }

    fn compile(&self, source: &KernelSource, entry: &'static str) -> Result<KernelId> {
        if source.family != DeviceFamily::Host {
            return Err(Error::unsupported_backend(
                source.family,
                format!("host device cannot run '{}'", source.name),
            ));
        }
        let func = kernels::lookup(entry).ok_or(Error::KernelNotFound {
            source_name: source.name,
            entry,
        })?;
        let scalars = names::scalar_count(entry).unwrap_or(0);
        let buffers = names::buffer_count(entry).unwrap_or(0);

        let mut state = self.state.lock();
        let id = state.next_kernel;
        state.next_kernel += 1;
        state.kernels.insert(
            id,
            HostKernel {
                entry,
                func,
                scalars,
                args: SmallVec::from_elem(None, scalars + buffers),
            },
        );
        Ok(KernelId::new(id))
    }

    fn release_kernel(&self, kernel: KernelId) {
        self.state.lock().kernels.remove(&kernel.raw());
    }

    fn set_arg(&self, kernel: KernelId, index: usize, arg: KernelArg) -> Result<()> {
        let mut state = self.state.lock();
        let kernel = state
            .kernels
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
        let mut state = self.state.lock();
        let HostState { memory, kernels, .. } = &mut *state;
        let kernel = kernels
            .get(&kernel.raw())
            .ok_or_else(|| Error::Backend(format!("unknown kernel id {}", kernel.raw())))?;
        size.validate(kernel.entry, self.config.max_workgroup_size)?;

        let mut scalars: SmallVec<[u32; 8]> = SmallVec::new();
        let mut buffers: SmallVec<[BufferId; 8]> = SmallVec::new();
        for (i, arg) in kernel.args.iter().enumerate() {
            let arg = arg.ok_or_else(|| Error::launch(kernel.entry, format!("argument {i} unset")))?;
            match (i < kernel.scalars, arg) {
                (true, KernelArg::Buffer(_)) => {
                    return Err(Error::launch(
                        kernel.entry,
                        format!("argument {i} must be a scalar"),
                    ));
                }
                (true, scalar) => scalars.extend(scalar.scalar_bits()),
                (false, KernelArg::Buffer(id)) => buffers.push(id),
                (false, _) => {
                    return Err(Error::launch(
                        kernel.entry,
                        format!("argument {i} must be a buffer"),
                    ));
                }
            }
        }

        tracing::trace!(kernel = kernel.entry, global = ?size.global, local = ?size.local, "host launch");
        let args = Args {
            entry: kernel.entry,
            scalars: &scalars,
            buffers: &buffers,
        };
        (kernel.func)(memory, &args, &size)
    }

    fn copy_to_device(&self, buffer: BufferId, byte_offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.memory.byte_range(buffer, byte_offset, data.len())?;
        let words = state
            .memory
            .buffers
            .get_mut(&buffer.raw())
            .ok_or_else(|| Memory::missing(buffer))?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        bytes[byte_offset..byte_offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_from_device(
        &self,
        buffer: BufferId,
        byte_offset: usize,
        out: &mut [u8],
    ) -> Result<()> {
        let state = self.state.lock();
        state.memory.byte_range(buffer, byte_offset, out.len())?;
        let bytes: &[u8] = bytemuck::cast_slice(state.memory.words(buffer)?);
        out.copy_from_slice(&bytes[byte_offset..byte_offset + out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DeviceBuffer;

    fn manager(wg: u32) -> HostKernelManager {
        HostKernelManager::new(HostDeviceConfig {
            max_workgroup_size: wg,
            compute_units: 2,
        })
    }

    fn source() -> KernelSource {
        KernelSource::general_simplex(DeviceFamily::Host)
    }

    #[test]
    fn test_device_info() {
        let info = manager(64).device_info();
        assert_eq!(info.family, DeviceFamily::Host);
        assert_eq!(info.max_workgroup_size, 64);
        assert_eq!(info.compute_units, 2);
    }

    #[test]
    fn test_compile_rejects_foreign_source_and_unknown_entry() {
        let m = manager(64);
        let cu = KernelSource::general_simplex(DeviceFamily::Cuda);
        assert!(matches!(
            m.compile(&cu, names::CHECK_BOUNDS),
            Err(Error::UnsupportedBackend { .. })
        ));
        assert!(matches!(
            m.compile(&source(), "no_such_kernel"),
            Err(Error::KernelNotFound { .. })
        ));
    }

    #[test]
    fn test_launch_requires_all_args() {
        let m = manager(64);
        let k = m.compile(&source(), names::REDUCE_PARTIAL_SUMS).unwrap();
        m.set_arg(k, 0, KernelArg::U32(4)).unwrap();
        assert!(matches!(
            m.launch(k, LaunchSize::linear(4, 4)),
            Err(Error::KernelLaunch { .. })
        ));
        assert!(m.set_arg(k, 3, KernelArg::U32(0)).is_err());
    }

    #[test]
    fn test_released_kernel_is_forgotten() {
        let m = manager(64);
        let k = m.compile(&source(), names::REDUCE_PARTIAL_SUMS).unwrap();
        let other = m.compile(&source(), names::REDUCE_PARTIAL_SUMS).unwrap();
        assert_ne!(k, other);
        assert_eq!(m.live_kernels(), 2);

        m.release_kernel(k);
        m.release_kernel(k);
        assert_eq!(m.live_kernels(), 1);
        assert!(matches!(
            m.set_arg(k, 0, KernelArg::U32(4)),
            Err(Error::Backend(_))
        ));
        m.set_arg(other, 0, KernelArg::U32(4)).unwrap();
    }

    #[test]
    fn test_launch_rejects_wrong_arg_kind() {
        let m = manager(64);
        let input = DeviceBuffer::from_slice(&m, &[1.0f32; 4]).unwrap();
        let k = m.compile(&source(), names::REDUCE_PARTIAL_SUMS).unwrap();
        m.set_arg(k, 0, input.arg()).unwrap();
        m.set_arg(k, 1, input.arg()).unwrap();
        m.set_arg(k, 2, input.arg()).unwrap();
        assert!(m.launch(k, LaunchSize::linear(4, 4)).is_err());
    }

    #[test]
    fn test_reduce_partial_sums_tree() {
        let m = manager(4);
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
    fn test_reduction_rejects_non_power_of_two() {
        let m = manager(8);
        let input = DeviceBuffer::from_slice(&m, &[1.0f32; 6]).unwrap();
        let output = DeviceBuffer::zeroed::<f32>(&m, 2).unwrap();
        let k = m.compile(&source(), names::REDUCE_PARTIAL_SUMS).unwrap();
        m.set_arg(k, 0, KernelArg::U32(6)).unwrap();
        m.set_arg(k, 1, input.arg()).unwrap();
        m.set_arg(k, 2, output.arg()).unwrap();
        assert!(m.launch(k, LaunchSize::linear(6, 3)).is_err());
    }

    #[test]
    fn test_copy_bounds_checked() {
        let m = manager(4);
        let buffer = DeviceBuffer::zeroed::<u32>(&m, 2).unwrap();
        assert!(m.copy_to_device(buffer.id(), 4, &[0u8; 8]).is_err());
        assert!(m.copy_to_device(buffer.id(), 2, &[0u8; 4]).is_err());
        m.copy_to_device(buffer.id(), 4, &7u32.to_ne_bytes()).unwrap();
        assert_eq!(buffer.get::<u32>(1).unwrap(), 7);
    }

    #[test]
    fn test_clones_share_memory() {
        let m = manager(4);
        let other = m.clone();
        let buffer = DeviceBuffer::from_slice(&m, &[3u32]).unwrap();
        let mut out = [0u8; 4];
        other.copy_from_device(buffer.id(), 0, &mut out).unwrap();
        assert_eq!(u32::from_ne_bytes(out), 3);
        assert_eq!(other.live_buffers(), 1);
    }
}
