//! Device classification and the GPU-first selection policy.

use std::fmt;

/// Broad class of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Gpu,
    Cpu,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Gpu => f.write_str("GPU"),
            DeviceClass::Cpu => f.write_str("CPU"),
        }
    }
}

/// Capabilities of the selected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub class: DeviceClass,
    /// Largest single buffer the device will allocate, in bytes.
    pub max_buffer_len: usize,
    /// Largest work group (threadgroup) the device accepts.
    pub max_work_group_size: usize,
}

impl DeviceInfo {
    /// Work group size to launch with: the requested size clamped to what
    /// the device supports, never zero.
    pub fn effective_group_size(&self, requested: usize) -> usize {
        requested.min(self.max_work_group_size).max(1)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device: {} ({})", self.name, self.class)?;
        writeln!(f, "  Max work group size: {}", self.max_work_group_size)?;
        write!(f, "  Max buffer length: {} MB", self.max_buffer_len / (1024 * 1024))
    }
}

/// Select a device from enumerated candidates.
///
/// The first GPU-class candidate wins; otherwise the first CPU-class one.
/// `None` means no usable device.
pub fn select_device<T>(candidates: impl IntoIterator<Item = (DeviceClass, T)>) -> Option<T> {
    let mut fallback = None;
    for (class, candidate) in candidates {
        match class {
            DeviceClass::Gpu => return Some(candidate),
            DeviceClass::Cpu => {
                if fallback.is_none() {
                    fallback = Some(candidate);
                }
            }
        }
    }
    fallback
}
