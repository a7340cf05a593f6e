// Shared repr(C) types and constants for CPU<->device data exchange.
//
// IMPORTANT: MatchParams MUST match the struct in kernels/match_positions.metal
// exactly. The OpenCL kernel takes the same two fields as scalar arguments.

/// Sentinel written at a position where the pattern does not start.
pub const NO_MATCH: i32 = -1;

/// Value written at a position where the pattern starts.
pub const MATCH: i32 = 1;

/// Default work group size (work-items per group). Scheduling only.
pub const DEFAULT_WORK_GROUP_SIZE: usize = 128;

/// Scalar kernel parameters. Matches `MatchParams` in match_positions.metal.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MatchParams {
    pub pattern_len: u32,
    pub text_len: u32,
}

const _: () = assert!(std::mem::size_of::<MatchParams>() == 8);

/// Global/local sizes for a 1-D launch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of positions that carry a result (`flat_buffer.len()`).
    pub positions: usize,
    /// Work-items per group.
    pub group_size: usize,
    /// `positions` rounded up to a multiple of `group_size`.
    pub global_size: usize,
}

impl LaunchConfig {
    /// One work-item per position, grouped by `group_size` (clamped to >= 1).
    pub fn for_positions(positions: usize, group_size: usize) -> Self {
        let group_size = group_size.max(1);
        Self {
            positions,
            group_size,
            global_size: positions.div_ceil(group_size) * group_size,
        }
    }

    pub fn group_count(&self) -> usize {
        self.global_size / self.group_size
    }
}
