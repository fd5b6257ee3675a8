//! WebGPU adapter discovery.
//!
//! Adapters are selected by index in enumeration order. The device is opened
//! with default limits, which cover the widest kernel (eight storage buffers
//! plus one uniform parameter block).

use std::sync::Arc;
use wgpu::{Adapter, Device, Queue};

use crate::error::{Error, Result};
use crate::runtime::DeviceFamily;

/// Cached adapter information
#[derive(Clone, Debug)]
pub(crate) struct AdapterInfo {
    /// Adapter name (e.g., "NVIDIA GeForce RTX 4090")
    pub(crate) name: String,
    /// Backend type (Vulkan, Metal, DX12, etc.)
    pub(crate) backend: wgpu::Backend,
}

/// Pick the adapter at `index`.
pub(crate) async fn query_adapter(index: usize) -> Result<(Adapter, AdapterInfo)> {
    let instance = wgpu::Instance::default();
    let mut adapters: Vec<_> = instance.enumerate_adapters(wgpu::Backends::all()).await;

    if adapters.is_empty() {
        return Err(Error::unsupported_backend(
            DeviceFamily::WebGpu,
            "no WebGPU adapter found",
        ));
    }
    if index >= adapters.len() {
        return Err(Error::unsupported_backend(
            DeviceFamily::WebGpu,
            format!(
                "adapter {} requested, {} available",
                index,
                adapters.len()
            ),
        ));
    }

    let adapter = adapters.swap_remove(index);
    let wgpu_info = adapter.get_info();
    let info = AdapterInfo {
        name: wgpu_info.name,
        backend: wgpu_info.backend,
    };
    Ok((adapter, info))
}

/// Open the adapter at `index` and create its device and queue (blocking).
pub(crate) fn open_device(index: usize) -> Result<(Arc<Device>, Arc<Queue>, AdapterInfo)> {
    pollster::block_on(async {
        let (adapter, info) = query_adapter(index).await?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("gsimplex WebGPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await
            .map_err(|e| Error::Backend(format!("WebGPU device request failed: {e:?}")))?;
        Ok((Arc::new(device), Arc::new(queue), info))
    })
}
