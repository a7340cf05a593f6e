//! OpenCL backend (`opencl` feature).
//!
//! Device enumeration walks every platform's devices, preferring a GPU and
//! accepting a CPU device. All OpenCL objects are the `opencl3` RAII
//! wrappers, which release their handle on drop.

use std::ffi::c_void;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    get_all_devices, Device, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_GPU,
};
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{Buffer, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
use opencl3::program::Program;
use opencl3::types::{cl_device_type, cl_int, cl_uint, CL_BLOCKING};
use tracing::{debug, warn};

use crate::error::{BatchSearchError, Result};
use crate::gpu::backend::{BackendKind, ComputeBackend, KernelArgs};
use crate::gpu::device::{select_device, DeviceClass, DeviceInfo};
use crate::gpu::kernel::{KernelSource, KERNEL_ENTRY_POINT};
use crate::gpu::types::LaunchConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenClBackend;

/// Selected device and the context created on it.
pub struct OpenClDevice {
    _device: Device,
    context: Context,
}

pub struct OpenClProgram {
    program: Program,
}

pub struct OpenClQueue {
    queue: CommandQueue,
}

pub struct OpenClKernel {
    kernel: Kernel,
}

pub enum OpenClBuffer {
    Bytes(Buffer<u8>),
    Matches(Buffer<cl_int>),
}

fn device_class(device: &Device) -> Option<DeviceClass> {
    let dev_type: cl_device_type = device.dev_type().unwrap_or(0);
    if dev_type & CL_DEVICE_TYPE_GPU != 0 {
        Some(DeviceClass::Gpu)
    } else if dev_type & CL_DEVICE_TYPE_CPU != 0 {
        Some(DeviceClass::Cpu)
    } else {
        None
    }
}

impl ComputeBackend for OpenClBackend {
    type Device = OpenClDevice;
    type Program = OpenClProgram;
    type Queue = OpenClQueue;
    type Kernel = OpenClKernel;
    type Buffer = OpenClBuffer;

    fn kind(&self) -> BackendKind {
        BackendKind::OpenCl
    }

    fn acquire_device(&self) -> Result<(OpenClDevice, DeviceInfo)> {
        let ids = get_all_devices(CL_DEVICE_TYPE_ALL).map_err(|e| {
            warn!(error = %e, "OpenCL device enumeration failed");
            BatchSearchError::NoDeviceFound
        })?;
        let candidates = ids.into_iter().filter_map(|id| {
            let device = Device::new(id);
            device_class(&device).map(|class| (class, (class, device)))
        });
        let (class, device) = select_device(candidates).ok_or(BatchSearchError::NoDeviceFound)?;

        let info = DeviceInfo {
            name: device.name().unwrap_or_default().trim().to_string(),
            class,
            max_buffer_len: device.max_mem_alloc_size().unwrap_or(0) as usize,
            max_work_group_size: device.max_work_group_size().unwrap_or(1),
        };
        let context = Context::from_device(&device).map_err(|e| {
            warn!(device = %info.name, error = %e, "OpenCL context creation failed");
            BatchSearchError::NoDeviceFound
        })?;

        Ok((
            OpenClDevice {
                _device: device,
                context,
            },
            info,
        ))
    }

    fn build_program(&self, device: &OpenClDevice, source: &KernelSource) -> Result<OpenClProgram> {
        // On failure opencl3 returns the build log and releases the program.
        let program = Program::create_and_build_from_source(&device.context, source.text(), "")
            .map_err(|log| BatchSearchError::ProgramBuildFailed {
                log: format!("{}:\n{}", source.label(), log),
            })?;
        Ok(OpenClProgram { program })
    }

    fn create_queue(&self, device: &OpenClDevice) -> Result<OpenClQueue> {
        // OpenCL 1.2 entry point; macOS has no 2.0 queue API.
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&device.context, 0)
            .map_err(|e| BatchSearchError::DeviceAllocFailed(format!("command queue: {e}")))?;
        Ok(OpenClQueue { queue })
    }

    fn create_kernel(&self, program: &OpenClProgram) -> Result<OpenClKernel> {
        let kernel = Kernel::create(&program.program, KERNEL_ENTRY_POINT).map_err(|e| {
            BatchSearchError::DeviceAllocFailed(format!("kernel `{KERNEL_ENTRY_POINT}`: {e}"))
        })?;
        Ok(OpenClKernel { kernel })
    }

    fn create_input_buffer(&self, device: &OpenClDevice, bytes: &[u8]) -> Result<OpenClBuffer> {
        // CL_MEM_COPY_HOST_PTR copies during creation; the pointer is not retained.
        let buffer = unsafe {
            Buffer::<u8>::create(
                &device.context,
                CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                bytes.len(),
                bytes.as_ptr() as *mut c_void,
            )
        }
        .map_err(|e| {
            BatchSearchError::DeviceAllocFailed(format!("{} byte input buffer: {e}", bytes.len()))
        })?;
        Ok(OpenClBuffer::Bytes(buffer))
    }

    fn create_output_buffer(&self, device: &OpenClDevice, len: usize) -> Result<OpenClBuffer> {
        let buffer = unsafe {
            Buffer::<cl_int>::create(&device.context, CL_MEM_WRITE_ONLY, len, ptr::null_mut())
        }
        .map_err(|e| BatchSearchError::DeviceAllocFailed(format!("{len} slot match buffer: {e}")))?;
        Ok(OpenClBuffer::Matches(buffer))
    }

    fn launch(
        &self,
        queue: &OpenClQueue,
        kernel: &mut OpenClKernel,
        args: KernelArgs<'_, OpenClBuffer>,
        launch: LaunchConfig,
    ) -> Result<()> {
        let (
            OpenClBuffer::Bytes(pattern),
            OpenClBuffer::Bytes(text),
            OpenClBuffer::Matches(matches),
        ) = (args.pattern, args.text, &*args.matches)
        else {
            return Err(BatchSearchError::KernelLaunchFailed(
                "kernel arguments bound to the wrong buffer kinds".to_string(),
            ));
        };
        let pattern_len: cl_uint = args.pattern_len;
        let text_len: cl_uint = args.text_len;
        debug!(
            global = launch.global_size,
            local = launch.group_size,
            "opencl dispatch"
        );

        let event = unsafe {
            ExecuteKernel::new(&kernel.kernel)
                .set_arg(pattern)
                .set_arg(text)
                .set_arg(matches)
                .set_arg(&pattern_len)
                .set_arg(&text_len)
                .set_global_work_size(launch.global_size)
                .set_local_work_size(launch.group_size)
                .enqueue_nd_range(&queue.queue)
        }
        .map_err(|e| BatchSearchError::KernelLaunchFailed(format!("enqueue: {e}")))?;
        event
            .wait()
            .map_err(|e| BatchSearchError::KernelLaunchFailed(format!("completion: {e}")))?;
        Ok(())
    }

    fn read_back(
        &self,
        queue: &OpenClQueue,
        matches: &OpenClBuffer,
        out: &mut [i32],
    ) -> Result<()> {
        let OpenClBuffer::Matches(buffer) = matches else {
            return Err(BatchSearchError::ResultReadFailed(
                "read-back target is not a match buffer".to_string(),
            ));
        };
        let event = unsafe { queue.queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, out, &[]) }
            .map_err(|e| BatchSearchError::ResultReadFailed(e.to_string()))?;
        event
            .wait()
            .map_err(|e| BatchSearchError::ResultReadFailed(e.to_string()))?;
        Ok(())
    }
}
