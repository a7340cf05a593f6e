//! Batch packing: many variable-length items into one flat buffer.
//!
//! Items are concatenated in input order with no separator, so
//! `spans[i].start` is exactly the sum of the lengths before item `i` and
//! the flat length is the sum of all lengths. Cross-item occurrences are
//! filtered out later by clamping each item's scan window.

use tracing::debug;

use crate::error::{BatchSearchError, Result};
use crate::search::types::SearchItem;

/// Hard ceiling on the flat buffer: kernels index positions with `u32`.
pub const MAX_FLAT_BYTES: usize = u32::MAX as usize;

/// Where one item lives inside the flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSpan {
    pub start: usize,
    pub len: usize,
}

impl ItemSpan {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Packed form of one search call's items.
#[derive(Debug)]
pub struct Batch<'a> {
    items: &'a [SearchItem],
    flat: Vec<u8>,
    spans: Vec<ItemSpan>,
}

/// Concatenate `items` into a single buffer of at most `max_bytes` bytes
/// (further capped at [`MAX_FLAT_BYTES`]).
///
/// Fails with `BatchTooLarge` before allocating anything when the total
/// exceeds the limit.
pub fn pack(items: &[SearchItem], max_bytes: usize) -> Result<Batch<'_>> {
    let limit = max_bytes.min(MAX_FLAT_BYTES);
    let total = items
        .iter()
        .fold(0usize, |acc, item| acc.saturating_add(item.len()));
    if total > limit {
        return Err(BatchSearchError::BatchTooLarge {
            requested: total,
            limit,
        });
    }

    let mut flat = Vec::with_capacity(total);
    let mut spans = Vec::with_capacity(items.len());
    for item in items {
        spans.push(ItemSpan {
            start: flat.len(),
            len: item.len(),
        });
        flat.extend_from_slice(&item.content);
    }
    debug!(items = items.len(), flat_bytes = flat.len(), "batch packed");

    Ok(Batch { items, flat, spans })
}

impl<'a> Batch<'a> {
    pub fn items(&self) -> &'a [SearchItem] {
        self.items
    }

    /// The concatenated item contents.
    pub fn flat(&self) -> &[u8] {
        &self.flat
    }

    /// `spans()[i]` locates `items()[i]` in `flat()`.
    pub fn spans(&self) -> &[ItemSpan] {
        &self.spans
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn flat_len(&self) -> usize {
        self.flat.len()
    }

    /// The slice of `flat()` holding item `index`.
    pub fn item_bytes(&self, index: usize) -> Option<&[u8]> {
        let span = self.spans.get(index)?;
        self.flat.get(span.start..span.end())
    }
}
