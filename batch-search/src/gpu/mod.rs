// Compute backends and device lifecycle

pub mod backend;
pub mod context;
pub mod cpu;
pub mod device;
pub mod kernel;
#[cfg(target_os = "macos")]
pub mod metal;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod types;
