//! Kernel dispatch: one launch over the whole flat buffer.
//!
//! Per call this creates, in order, a queue, a kernel object, the pattern
//! and text input buffers, and the match output buffer. They are plain
//! locals, so any `?` below drops them in reverse creation order and a
//! failed call leaves nothing allocated except the cached program.

use std::time::Instant;

use tracing::debug;

use crate::error::{BatchSearchError, Result};
use crate::gpu::backend::{ComputeBackend, KernelArgs};
use crate::gpu::context::{ComputeContext, ProgramKey};
use crate::gpu::types::{LaunchConfig, MATCH, NO_MATCH};
use crate::search::batch::{Batch, MAX_FLAT_BYTES};

/// Per-position kernel output for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchVector {
    values: Vec<i32>,
    pattern_len: usize,
}

impl MatchVector {
    pub fn new(values: Vec<i32>, pattern_len: usize) -> Self {
        Self {
            values,
            pattern_len,
        }
    }

    /// One `MATCH` / `NO_MATCH` per flat position.
    pub fn values(&self) -> &[i32] {
        &self.values
    }

    /// Length of the pattern that produced this vector.
    pub fn pattern_len(&self) -> usize {
        self.pattern_len
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether an occurrence starts at `position`.
    pub fn is_match(&self, position: usize) -> bool {
        self.values.get(position) == Some(&MATCH)
    }
}

/// Run the match kernel for `pattern` over `batch.flat()`.
///
/// Empty flat buffers and empty patterns are answered on the host without
/// creating any device object.
pub fn dispatch<B: ComputeBackend>(
    backend: &B,
    context: &ComputeContext<B>,
    program: ProgramKey,
    pattern: &[u8],
    batch: &Batch<'_>,
    group_size: usize,
) -> Result<MatchVector> {
    let positions = batch.flat_len();
    if positions == 0 {
        return Ok(MatchVector::new(Vec::new(), pattern.len()));
    }
    if pattern.is_empty() {
        return Ok(MatchVector::new(vec![MATCH; positions], 0));
    }
    if pattern.len() > MAX_FLAT_BYTES || positions > MAX_FLAT_BYTES {
        return Err(BatchSearchError::BatchTooLarge {
            requested: pattern.len().max(positions),
            limit: MAX_FLAT_BYTES,
        });
    }

    let start = Instant::now();
    let group_size = context.info().effective_group_size(group_size);
    let launch = LaunchConfig::for_positions(positions, group_size);
    let device = context.device();
    let program = context.program(program)?;

    let queue = backend.create_queue(device)?;
    let mut kernel = backend.create_kernel(program)?;
    let pattern_buf = backend.create_input_buffer(device, pattern)?;
    let text_buf = backend.create_input_buffer(device, batch.flat())?;
    let mut matches_buf = backend.create_output_buffer(device, positions)?;

    backend.launch(
        &queue,
        &mut kernel,
        KernelArgs {
            pattern: &pattern_buf,
            text: &text_buf,
            matches: &mut matches_buf,
            pattern_len: pattern.len() as u32,
            text_len: positions as u32,
        },
        launch,
    )?;

    let mut values = vec![NO_MATCH; positions];
    backend.read_back(&queue, &matches_buf, &mut values)?;

    debug!(
        backend = %backend.kind(),
        positions,
        group_size = launch.group_size,
        groups = launch.group_count(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "match kernel complete"
    );
    Ok(MatchVector::new(values, pattern.len()))
}
