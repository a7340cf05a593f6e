//! The compute backend capability interface.
//!
//! A backend owns the raw device API. Every handle it hands out is an owned
//! value whose `Drop` releases the underlying device object, so a dispatch
//! that bails out with `?` releases everything it created in reverse
//! creation order.

use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::gpu::device::DeviceInfo;
use crate::gpu::kernel::KernelSource;
use crate::gpu::types::LaunchConfig;

/// Which compute API a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Apple Metal (macOS only).
    Metal,
    /// OpenCL 1.2+ (GPU preferred, CPU device accepted).
    OpenCl,
    /// Host thread pool running the same per-position contract.
    Cpu,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Metal => "metal",
            BackendKind::OpenCl => "opencl",
            BackendKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metal" => Ok(BackendKind::Metal),
            "opencl" | "cl" => Ok(BackendKind::OpenCl),
            "cpu" => Ok(BackendKind::Cpu),
            other => Err(format!("unknown backend '{other}' (expected metal, opencl or cpu)")),
        }
    }
}

/// Arguments bound to the match kernel, in kernel parameter order.
///
/// Buffer indices 0..=2 are `pattern`, `text`, `matches`; the two lengths
/// follow as scalars (OpenCL args 3, 4; Metal packs them into `MatchParams`).
pub struct KernelArgs<'a, B> {
    pub pattern: &'a B,
    pub text: &'a B,
    pub matches: &'a mut B,
    pub pattern_len: u32,
    pub text_len: u32,
}

/// Capability interface implemented by every compute backend.
///
/// Host-side orchestration (packing, interpretation, lifecycle) is written
/// once against this trait.
pub trait ComputeBackend {
    /// Selected device (plus whatever context object the API requires).
    type Device;
    /// Compiled kernel program. Cached across calls by `ComputeContext`.
    type Program;
    /// Command queue, created per dispatch.
    type Queue;
    /// Kernel object bound to the match entry point, created per dispatch.
    type Kernel;
    /// Device memory object.
    type Buffer;

    fn kind(&self) -> BackendKind;

    /// Pick a device: GPU-class preferred, CPU-class accepted, otherwise
    /// `NoDeviceFound`.
    fn acquire_device(&self) -> Result<(Self::Device, DeviceInfo)>;

    /// Compile `source` for `device`. On failure returns `ProgramBuildFailed`
    /// carrying the full build log and releases any partial program object.
    fn build_program(&self, device: &Self::Device, source: &KernelSource) -> Result<Self::Program>;

    fn create_queue(&self, device: &Self::Device) -> Result<Self::Queue>;

    fn create_kernel(&self, program: &Self::Program) -> Result<Self::Kernel>;

    /// Read-only device buffer initialized from `bytes` (never empty).
    fn create_input_buffer(&self, device: &Self::Device, bytes: &[u8]) -> Result<Self::Buffer>;

    /// Write-only device buffer holding `len` `i32` match slots.
    fn create_output_buffer(&self, device: &Self::Device, len: usize) -> Result<Self::Buffer>;

    /// Run the match kernel to completion (blocking).
    fn launch(
        &self,
        queue: &Self::Queue,
        kernel: &mut Self::Kernel,
        args: KernelArgs<'_, Self::Buffer>,
        launch: LaunchConfig,
    ) -> Result<()>;

    /// Copy `out.len()` match slots from `matches` into `out` (blocking).
    fn read_back(&self, queue: &Self::Queue, matches: &Self::Buffer, out: &mut [i32]) -> Result<()>;
}
