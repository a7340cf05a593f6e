//! CPU thread-pool backend.
//!
//! Implements the same per-position contract as the device kernels on a
//! rayon pool: positions are split into work groups of `group_size`, each
//! group is scanned independently with `memchr::memmem`, and every slot is
//! written exactly once. "Building" a program runs
//! [`KernelSource::check_structure`], so a truncated or unbalanced kernel
//! file fails with a positioned build log here too.

use std::sync::Arc;

use memchr::memmem;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

use crate::error::{BatchSearchError, Result};
use crate::gpu::backend::{BackendKind, ComputeBackend, KernelArgs};
use crate::gpu::device::{select_device, DeviceClass, DeviceInfo};
use crate::gpu::kernel::{KernelSource, KERNEL_ENTRY_POINT};
use crate::gpu::types::{LaunchConfig, MATCH, NO_MATCH};

/// Host thread-pool backend. Always available.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend {
    threads: Option<usize>,
}

/// The pool that plays the role of the device.
pub struct CpuDevice {
    pool: Arc<ThreadPool>,
}

/// A validated kernel source.
#[derive(Debug)]
pub struct CpuProgram {
    label: String,
}

pub struct CpuQueue {
    pool: Arc<ThreadPool>,
}

#[derive(Debug)]
pub struct CpuKernel {
    entry_point: &'static str,
}

/// Host memory standing in for device buffers.
#[derive(Debug)]
pub enum HostBuffer {
    Bytes(Vec<u8>),
    Matches(Vec<i32>),
}

impl CpuBackend {
    /// `threads = None` sizes the pool like rayon's global pool.
    pub fn new(threads: Option<usize>) -> Self {
        Self { threads }
    }
}

impl ComputeBackend for CpuBackend {
    type Device = CpuDevice;
    type Program = CpuProgram;
    type Queue = CpuQueue;
    type Kernel = CpuKernel;
    type Buffer = HostBuffer;

    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn acquire_device(&self) -> Result<(CpuDevice, DeviceInfo)> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads.unwrap_or(0))
            .thread_name(|i| format!("batch-search-cpu-{i}"))
            .build()
            .map_err(|e| {
                warn!(error = %e, "failed to start CPU search pool");
                BatchSearchError::NoDeviceFound
            })?;
        let pool =
            select_device([(DeviceClass::Cpu, pool)]).ok_or(BatchSearchError::NoDeviceFound)?;

        let info = DeviceInfo {
            name: format!("host thread pool ({} threads)", pool.current_num_threads()),
            class: DeviceClass::Cpu,
            max_buffer_len: isize::MAX as usize,
            max_work_group_size: usize::MAX,
        };
        Ok((
            CpuDevice {
                pool: Arc::new(pool),
            },
            info,
        ))
    }

    fn build_program(&self, _device: &CpuDevice, source: &KernelSource) -> Result<CpuProgram> {
        if source.text().trim().is_empty() {
            return Err(BatchSearchError::ProgramBuildFailed {
                log: format!("{}: error: kernel source is empty", source.label()),
            });
        }
        source
            .check_structure()
            .map_err(|e| BatchSearchError::ProgramBuildFailed {
                log: format!("{}:{}", source.label(), e),
            })?;
        Ok(CpuProgram {
            label: source.label().to_string(),
        })
    }

    fn create_queue(&self, device: &CpuDevice) -> Result<CpuQueue> {
        Ok(CpuQueue {
            pool: Arc::clone(&device.pool),
        })
    }

    fn create_kernel(&self, program: &CpuProgram) -> Result<CpuKernel> {
        debug_assert!(!program.label.is_empty());
        Ok(CpuKernel {
            entry_point: KERNEL_ENTRY_POINT,
        })
    }

    fn create_input_buffer(&self, _device: &CpuDevice, bytes: &[u8]) -> Result<HostBuffer> {
        Ok(HostBuffer::Bytes(bytes.to_vec()))
    }

    fn create_output_buffer(&self, _device: &CpuDevice, len: usize) -> Result<HostBuffer> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|e| BatchSearchError::DeviceAllocFailed(format!("{len} match slots: {e}")))?;
        slots.resize(len, NO_MATCH);
        Ok(HostBuffer::Matches(slots))
    }

    fn launch(
        &self,
        queue: &CpuQueue,
        kernel: &mut CpuKernel,
        args: KernelArgs<'_, HostBuffer>,
        launch: LaunchConfig,
    ) -> Result<()> {
        let (HostBuffer::Bytes(pattern), HostBuffer::Bytes(text)) = (args.pattern, args.text) else {
            return Err(BatchSearchError::KernelLaunchFailed(format!(
                "{}: pattern and text must be byte buffers",
                kernel.entry_point
            )));
        };
        let HostBuffer::Matches(slots) = args.matches else {
            return Err(BatchSearchError::KernelLaunchFailed(format!(
                "{}: match output must be an i32 buffer",
                kernel.entry_point
            )));
        };
        if pattern.len() != args.pattern_len as usize
            || text.len() != args.text_len as usize
            || slots.len() < launch.positions
            || text.len() < launch.positions
        {
            return Err(BatchSearchError::KernelLaunchFailed(format!(
                "{}: argument sizes disagree \
                 (pattern {} / {}, text {} / {}, slots {}, positions {})",
                kernel.entry_point,
                pattern.len(),
                args.pattern_len,
                text.len(),
                args.text_len,
                slots.len(),
                launch.positions
            )));
        }

        let slots = &mut slots[..launch.positions];
        queue
            .pool
            .install(|| scan_positions(text, pattern, slots, launch.group_size));
        Ok(())
    }

    fn read_back(&self, _queue: &CpuQueue, matches: &HostBuffer, out: &mut [i32]) -> Result<()> {
        match matches {
            HostBuffer::Matches(slots) if slots.len() >= out.len() => {
                out.copy_from_slice(&slots[..out.len()]);
                Ok(())
            }
            HostBuffer::Matches(slots) => Err(BatchSearchError::ResultReadFailed(format!(
                "requested {} slots from a {}-slot buffer",
                out.len(),
                slots.len()
            ))),
            HostBuffer::Bytes(_) => Err(BatchSearchError::ResultReadFailed(
                "read-back target is not a match buffer".to_string(),
            )),
        }
    }
}

/// Fill `out[p]` with `MATCH` where `pattern` starts at `text[p]`, else
/// `NO_MATCH`. Groups of `group_size` positions are scanned in parallel on
/// the current rayon pool; the result does not depend on `group_size`.
pub fn scan_positions(text: &[u8], pattern: &[u8], out: &mut [i32], group_size: usize) {
    if pattern.is_empty() {
        out.fill(MATCH);
        return;
    }
    let group_size = group_size.max(1);
    let finder = memmem::Finder::new(pattern);
    out.par_chunks_mut(group_size)
        .enumerate()
        .for_each(|(group, slots)| scan_group(&finder, text, group * group_size, slots));
}

/// Scan one work group. Occurrences may overlap, so the search resumes one
/// byte past each hit.
fn scan_group(finder: &memmem::Finder<'_>, text: &[u8], start: usize, slots: &mut [i32]) {
    slots.fill(NO_MATCH);
    let pattern_len = finder.needle().len();
    if start >= text.len() {
        return;
    }
    let end = (start + slots.len() + pattern_len - 1).min(text.len());
    let window = &text[start..end];

    let mut from = 0;
    while let Some(hit) = finder.find(&window[from..]) {
        let pos = from + hit;
        if pos >= slots.len() {
            break;
        }
        slots[pos] = MATCH;
        from = pos + 1;
    }
}
