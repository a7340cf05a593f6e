//! Compute context: the selected device plus a cache of built programs.
//!
//! Programs are keyed by source digest, so each distinct (device, source)
//! pair is compiled at most once for the lifetime of the context. Queues,
//! kernels, and buffers are per-dispatch and never stored here.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use crate::error::{BatchSearchError, Result};
use crate::gpu::backend::ComputeBackend;
use crate::gpu::device::DeviceInfo;
use crate::gpu::kernel::KernelSource;

/// Cache key of a built program (the source digest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey(u64);

/// Device handle and program cache for one backend.
///
/// Not meant for concurrent use: callers hold it behind `&mut` (one context
/// per worker, or an external lock).
pub struct ComputeContext<B: ComputeBackend> {
    // Field order is drop order: programs go before the device they were built on.
    programs: HashMap<ProgramKey, B::Program>,
    info: DeviceInfo,
    device: B::Device,
}

impl<B: ComputeBackend> ComputeContext<B> {
    /// Acquire a device from `backend`.
    pub fn bootstrap(backend: &B) -> Result<Self> {
        let (device, info) = backend.acquire_device()?;
        info!(
            backend = %backend.kind(),
            device = %info.name,
            class = %info.class,
            "compute device acquired"
        );
        Ok(Self {
            device,
            info,
            programs: HashMap::new(),
        })
    }

    /// Build `source` unless an identical source was already built.
    pub fn ensure_program(&mut self, backend: &B, source: &KernelSource) -> Result<ProgramKey> {
        let key = ProgramKey(source.digest());
        if !self.programs.contains_key(&key) {
            let start = Instant::now();
            let program = backend.build_program(&self.device, source)?;
            info!(
                backend = %backend.kind(),
                source = source.label(),
                elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                "kernel program built"
            );
            self.programs.insert(key, program);
        }
        Ok(key)
    }

    /// Look up a previously built program.
    pub fn program(&self, key: ProgramKey) -> Result<&B::Program> {
        self.programs
            .get(&key)
            .ok_or_else(|| BatchSearchError::ProgramBuildFailed {
                log: format!("program {:016x} was never built on this context", key.0),
            })
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Number of cached programs.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }
}
