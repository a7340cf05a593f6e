//! Metal backend (macOS).
//!
//! The kernel is compiled at runtime from `match_positions.metal` via
//! `newLibraryWithSource`, so a configured kernel path works the same as
//! on OpenCL. Buffers use shared storage: input bytes are copied in at
//! creation and results are read straight out of `contents()` after the
//! command buffer completes.

use std::ffi::c_void;
use std::mem;
use std::ptr::NonNull;

use objc2::rc::{autoreleasepool, Retained};
use objc2::runtime::ProtocolObject;
use objc2_foundation::NSString;
use objc2_metal::{
    MTLBuffer, MTLCommandBuffer, MTLCommandBufferStatus, MTLCommandEncoder, MTLCommandQueue,
    MTLComputeCommandEncoder, MTLComputePipelineState, MTLCreateSystemDefaultDevice, MTLDevice,
    MTLLibrary, MTLResourceOptions, MTLSize,
};
use tracing::debug;

use crate::error::{BatchSearchError, Result};
use crate::gpu::backend::{BackendKind, ComputeBackend, KernelArgs};
use crate::gpu::device::{select_device, DeviceClass, DeviceInfo};
use crate::gpu::kernel::{KernelSource, KERNEL_ENTRY_POINT};
use crate::gpu::types::{LaunchConfig, MatchParams};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetalBackend;

pub struct MetalDevice {
    device: Retained<ProtocolObject<dyn MTLDevice>>,
}

/// Runtime-compiled library plus the pipeline for the match entry point.
pub struct MetalProgram {
    _library: Retained<ProtocolObject<dyn MTLLibrary>>,
    pipeline: Retained<ProtocolObject<dyn MTLComputePipelineState>>,
}

pub struct MetalQueue {
    queue: Retained<ProtocolObject<dyn MTLCommandQueue>>,
}

pub struct MetalKernel {
    pipeline: Retained<ProtocolObject<dyn MTLComputePipelineState>>,
}

pub struct MetalBuffer {
    buffer: Retained<ProtocolObject<dyn MTLBuffer>>,
    len: usize,
}

impl ComputeBackend for MetalBackend {
    type Device = MetalDevice;
    type Program = MetalProgram;
    type Queue = MetalQueue;
    type Kernel = MetalKernel;
    type Buffer = MetalBuffer;

    fn kind(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn acquire_device(&self) -> Result<(MetalDevice, DeviceInfo)> {
        // Every Metal device is a GPU; the system default is the one to use.
        let candidates = MTLCreateSystemDefaultDevice().map(|d| (DeviceClass::Gpu, d));
        let device = select_device(candidates).ok_or(BatchSearchError::NoDeviceFound)?;

        let info = DeviceInfo {
            name: device.name().to_string(),
            class: DeviceClass::Gpu,
            max_buffer_len: device.maxBufferLength(),
            max_work_group_size: device.maxThreadsPerThreadgroup().width,
        };
        Ok((MetalDevice { device }, info))
    }

    fn build_program(&self, device: &MetalDevice, source: &KernelSource) -> Result<MetalProgram> {
        let ns_source = NSString::from_str(source.text());
        let library = device
            .device
            .newLibraryWithSource_options_error(&ns_source, None)
            .map_err(|e| BatchSearchError::ProgramBuildFailed {
                log: format!("{}: {}", source.label(), e.localizedDescription()),
            })?;

        let fn_name = NSString::from_str(KERNEL_ENTRY_POINT);
        let function = library.newFunctionWithName(&fn_name).ok_or_else(|| {
            BatchSearchError::ProgramBuildFailed {
                log: format!(
                    "{}: error: no kernel entry point named `{}`",
                    source.label(),
                    KERNEL_ENTRY_POINT
                ),
            }
        })?;

        let pipeline = device
            .device
            .newComputePipelineStateWithFunction_error(&function)
            .map_err(|e| BatchSearchError::ProgramBuildFailed {
                log: format!(
                    "{}: pipeline creation failed: {}",
                    source.label(),
                    e.localizedDescription()
                ),
            })?;

        Ok(MetalProgram {
            _library: library,
            pipeline,
        })
    }

    fn create_queue(&self, device: &MetalDevice) -> Result<MetalQueue> {
        let queue = device
            .device
            .newCommandQueue()
            .ok_or_else(|| BatchSearchError::DeviceAllocFailed("command queue".to_string()))?;
        Ok(MetalQueue { queue })
    }

    fn create_kernel(&self, program: &MetalProgram) -> Result<MetalKernel> {
        Ok(MetalKernel {
            pipeline: program.pipeline.clone(),
        })
    }

    fn create_input_buffer(&self, device: &MetalDevice, bytes: &[u8]) -> Result<MetalBuffer> {
        let ptr = NonNull::new(bytes.as_ptr() as *mut c_void).ok_or_else(|| {
            BatchSearchError::DeviceAllocFailed("input buffer has no backing memory".to_string())
        })?;
        let buffer = unsafe {
            device.device.newBufferWithBytes_length_options(
                ptr,
                bytes.len(),
                MTLResourceOptions::StorageModeShared,
            )
        }
        .ok_or_else(|| {
            BatchSearchError::DeviceAllocFailed(format!("{} byte input buffer", bytes.len()))
        })?;
        Ok(MetalBuffer {
            buffer,
            len: bytes.len(),
        })
    }

    fn create_output_buffer(&self, device: &MetalDevice, len: usize) -> Result<MetalBuffer> {
        let size = len * mem::size_of::<i32>();
        let buffer = device
            .device
            .newBufferWithLength_options(size, MTLResourceOptions::StorageModeShared)
            .ok_or_else(|| {
                BatchSearchError::DeviceAllocFailed(format!("{size} byte match buffer"))
            })?;
        Ok(MetalBuffer { buffer, len: size })
    }

    fn launch(
        &self,
        queue: &MetalQueue,
        kernel: &mut MetalKernel,
        args: KernelArgs<'_, MetalBuffer>,
        launch: LaunchConfig,
    ) -> Result<()> {
        let params = MatchParams {
            pattern_len: args.pattern_len,
            text_len: args.text_len,
        };
        let tg = launch
            .group_size
            .min(kernel.pipeline.maxTotalThreadsPerThreadgroup())
            .max(1);
        let groups = launch.positions.div_ceil(tg);
        debug!(positions = launch.positions, threadgroup = tg, groups, "metal dispatch");

        autoreleasepool(|_| {
            let cmd = queue.queue.commandBuffer().ok_or_else(|| {
                BatchSearchError::KernelLaunchFailed("failed to create command buffer".to_string())
            })?;
            let encoder = cmd.computeCommandEncoder().ok_or_else(|| {
                BatchSearchError::KernelLaunchFailed("failed to create compute encoder".to_string())
            })?;

            encoder.setComputePipelineState(&kernel.pipeline);
            // buffer(0) pattern, buffer(1) text, buffer(2) matches, buffer(3) params
            unsafe {
                encoder.setBuffer_offset_atIndex(Some(&args.pattern.buffer), 0, 0);
                encoder.setBuffer_offset_atIndex(Some(&args.text.buffer), 0, 1);
                encoder.setBuffer_offset_atIndex(Some(&args.matches.buffer), 0, 2);
                encoder.setBytes_length_atIndex(
                    NonNull::from(&params).cast(),
                    mem::size_of::<MatchParams>(),
                    3,
                );
            }

            let grid_size = MTLSize {
                width: groups,
                height: 1,
                depth: 1,
            };
            let tg_size = MTLSize {
                width: tg,
                height: 1,
                depth: 1,
            };
            encoder.dispatchThreadgroups_threadsPerThreadgroup(grid_size, tg_size);
            encoder.endEncoding();

            cmd.commit();
            cmd.waitUntilCompleted();

            if cmd.status() == MTLCommandBufferStatus::Error {
                let reason = cmd
                    .error()
                    .map(|e| e.localizedDescription().to_string())
                    .unwrap_or_else(|| "command buffer reported an error".to_string());
                return Err(BatchSearchError::KernelLaunchFailed(reason));
            }
            Ok(())
        })
    }

    fn read_back(&self, _queue: &MetalQueue, matches: &MetalBuffer, out: &mut [i32]) -> Result<()> {
        let wanted = mem::size_of_val(out);
        if matches.len < wanted {
            return Err(BatchSearchError::ResultReadFailed(format!(
                "requested {wanted} bytes from a {} byte buffer",
                matches.len
            )));
        }
        // The command buffer has completed; shared storage is coherent.
        unsafe {
            let src = matches.buffer.contents().as_ptr() as *const i32;
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}
