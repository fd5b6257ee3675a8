//! Build script for gsimplex
//!
//! With the `cuda` feature, compiles `general_simplex.cu` to PTX in `OUT_DIR`
//! and exports the directory as `CUDA_KERNEL_DIR` for the kernel loader.
//! Set `CUDA_PATH` to point at a toolkit outside the usual locations.

fn main() {
    #[cfg(feature = "cuda")]
    build_cuda();
}

#[cfg(feature = "cuda")]
fn build_cuda() {
    if let Err(message) = cuda::compile_kernels() {
        panic!("gsimplex cuda build failed: {message}");
    }
}

#[cfg(feature = "cuda")]
mod cuda {
    use std::env;
    use std::path::{Path, PathBuf};
    use std::process::Command;

    const KERNEL_SOURCE: &str = "src/runtime/cuda/kernels/general_simplex.cu";
    const TOOLKIT_DIRS: [&str; 3] = ["/usr/local/cuda", "/usr/local/cuda-12", "/opt/cuda"];

    pub fn compile_kernels() -> Result<(), String> {
        let out_dir = PathBuf::from(env::var("OUT_DIR").map_err(|e| format!("OUT_DIR: {e}"))?);
        let source = Path::new(KERNEL_SOURCE);
        println!("cargo:rerun-if-changed={KERNEL_SOURCE}");
        println!("cargo:rerun-if-env-changed=CUDA_PATH");
        if !source.exists() {
            return Err(format!("kernel source {KERNEL_SOURCE} is missing"));
        }

        let nvcc = nvcc().ok_or("nvcc not found; install the CUDA toolkit or set CUDA_PATH")?;
        let ptx = out_dir.join("general_simplex.ptx");

        // sm_75 baseline; no FMA contraction so pivot arithmetic rounds like the host kernels
        let output = Command::new(&nvcc)
            .args(["-ptx", "-O3", "-fmad=false", "-arch=sm_75", "-o"])
            .arg(&ptx)
            .arg(source)
            .output()
            .map_err(|e| format!("running {}: {e}", nvcc.display()))?;
        if !output.status.success() {
            return Err(format!(
                "nvcc rejected {KERNEL_SOURCE}:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        println!("cargo:rustc-env=CUDA_KERNEL_DIR={}", out_dir.display());
        Ok(())
    }

    fn nvcc() -> Option<PathBuf> {
        let exe = if cfg!(windows) { "nvcc.exe" } else { "nvcc" };
        let toolkit = env::var_os("CUDA_PATH").map(PathBuf::from);
        let found = toolkit
            .into_iter()
            .chain(TOOLKIT_DIRS.iter().map(PathBuf::from))
            .map(|dir| dir.join("bin").join(exe))
            .find(|path| path.exists());
        found.or_else(|| {
            Command::new(exe)
                .arg("--version")
                .output()
                .ok()
                .filter(|out| out.status.success())
                .map(|_| PathBuf::from(exe))
        })
    }
}
