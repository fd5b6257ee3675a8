//! PTX loading for the general simplex kernels
//!
//! PTX files are compiled by `build.rs` using nvcc and loaded once per
//! manager; functions are resolved from the loaded module by entry name.

use cudarc::driver::safe::{CudaContext, CudaFunction, CudaModule};
use cudarc::nvrtc::Ptx;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Directory containing compiled PTX files (set by build.rs)
const KERNEL_DIR: &str = env!("CUDA_KERNEL_DIR");

/// PTX module name of the general simplex kernels
pub(super) const MODULE_NAME: &str = "general_simplex";

fn load_ptx(name: &str) -> Ptx {
    let path = format!("{}/{}.ptx", KERNEL_DIR, name);
    Ptx::from_file(path)
}

/// Load the general simplex module into `context`
pub(super) fn load_module(context: &Arc<CudaContext>) -> Result<Arc<CudaModule>> {
    context.load_module(load_ptx(MODULE_NAME)).map_err(|e| {
        Error::Backend(format!(
            "Failed to load CUDA module '{}': {:?}. \
             Ensure CUDA kernels were compiled correctly by build.rs.",
            MODULE_NAME, e
        ))
    })
}

/// Resolve `entry` in a loaded module
pub(super) fn get_kernel_function(
    module: &Arc<CudaModule>,
    source_name: &'static str,
    entry: &'static str,
) -> Result<CudaFunction> {
    module.load_function(entry).map_err(|e| {
        tracing::debug!(entry, error = ?e, "CUDA function lookup failed");
        Error::KernelNotFound { source_name, entry }
    })
}
