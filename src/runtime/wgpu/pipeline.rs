//! Compute pipeline cache for the general simplex WGSL kernels
//!
//! Workgroup sizes are compiled into the WGSL, so modules and pipelines are
//! keyed by entry point and local size. Bind group layouts only depend on the
//! number of storage buffers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, ComputePipeline,
    ComputePipelineDescriptor, Device, PipelineLayoutDescriptor, ShaderModuleDescriptor,
    ShaderSource, ShaderStages,
};

use super::wgsl;
use crate::error::{Error, Result};

const SOURCE_NAME: &str = "general_simplex.wgsl";

/// Key for bind group layout cache
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LayoutKey {
    /// Number of storage buffers in the layout
    pub num_storage_buffers: u32,
    /// Number of uniform buffers in the layout
    pub num_uniform_buffers: u32,
}

/// Cache key of a compiled pipeline
type PipelineKey = (&'static str, [u32; 2]);

/// Cache for compute pipelines keyed by (entry point, workgroup size)
pub(crate) struct PipelineCache {
    device: Arc<Device>,
    pipelines: Mutex<HashMap<PipelineKey, Arc<ComputePipeline>>>,
    layouts: Mutex<HashMap<LayoutKey, Arc<BindGroupLayout>>>,
}

impl PipelineCache {
    pub(crate) fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            pipelines: Mutex::new(HashMap::new()),
            layouts: Mutex::new(HashMap::new()),
        }
    }

    /// Layout for `entry`: its storage buffers followed by one parameter block
    pub(crate) fn layout_for(&self, entry: &'static str) -> Result<Arc<BindGroupLayout>> {
        let storage = wgsl::storage_bindings(entry).ok_or_else(|| Error::KernelNotFound {
            source_name: SOURCE_NAME,
            entry,
        })?;
        Ok(self.get_or_create_layout(LayoutKey {
            num_storage_buffers: storage as u32,
            num_uniform_buffers: 1,
        }))
    }

    /// Get or create the pipeline for `entry` at workgroup size `local`
    pub(crate) fn get_or_create_pipeline(
        &self,
        entry: &'static str,
        local: [u32; 2],
    ) -> Result<Arc<ComputePipeline>> {
        let key = (entry, local);
        if let Some(pipeline) = self.pipelines.lock().get(&key) {
            return Ok(pipeline.clone());
        }

        let source = wgsl::module_source(entry, local[0], local[1]).ok_or_else(|| {
            Error::KernelNotFound {
                source_name: SOURCE_NAME,
                entry,
            }
        })?;
        let label = format!("{}_{}x{}", entry, local[0], local[1]);
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(&label),
            source: ShaderSource::Wgsl(source.into()),
        });

        let layout = self.layout_for(entry)?;
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some(&format!("{}_layout", label)),
                bind_group_layouts: &[&layout],
                immediate_size: 0,
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(&label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });

        let pipeline = Arc::new(pipeline);
        self.pipelines.lock().insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn get_or_create_layout(&self, key: LayoutKey) -> Arc<BindGroupLayout> {
        let mut layouts = self.layouts.lock();

        if let Some(layout) = layouts.get(&key) {
            return layout.clone();
        }

        let mut entries = Vec::new();

        for i in 0..key.num_storage_buffers {
            entries.push(BindGroupLayoutEntry {
                binding: i,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        for i in 0..key.num_uniform_buffers {
            entries.push(BindGroupLayoutEntry {
                binding: key.num_storage_buffers + i,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let layout = self
            .device
            .create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some("general_simplex_layout"),
                entries: &entries,
            });

        let layout = Arc::new(layout);
        layouts.insert(key, layout.clone());
        layout
    }

    /// Bind `buffers` in order at bindings `0..n`
    pub(crate) fn create_bind_group(
        &self,
        layout: &BindGroupLayout,
        buffers: &[&Buffer],
    ) -> BindGroup {
        let entries: Vec<BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("general_simplex_bind_group"),
            layout,
            entries: &entries,
        })
    }
}
