//! Folding the per-position match vector back into per-item verdicts.
//!
//! Item `i` matches when some position `p` in
//! `[start, start + len - pattern_len]` holds `MATCH`. Positions closer to
//! the item's end than `pattern_len` are ignored: an occurrence starting
//! there would run into the next item.

use crate::search::batch::{Batch, ItemSpan};
use crate::search::dispatch::MatchVector;
use crate::search::types::{SearchItem, Verdict};

/// One verdict per item, in input order.
pub fn interpret<'a>(batch: &Batch<'a>, matches: &MatchVector) -> Vec<Verdict<'a>> {
    debug_assert_eq!(matches.len(), batch.flat_len());
    batch
        .items()
        .iter()
        .zip(batch.spans())
        .map(|(item, span)| Verdict {
            identifier: item.identifier.as_str(),
            matched: item_matched(*span, matches),
        })
        .collect()
}

/// Items whose verdict is true, in input order. `verdicts[i]` describes
/// `items[i]`.
pub fn matched_items<'a>(
    items: &'a [SearchItem],
    verdicts: &[Verdict<'_>],
) -> Vec<&'a SearchItem> {
    debug_assert_eq!(items.len(), verdicts.len());
    items
        .iter()
        .zip(verdicts)
        .filter(|(_, v)| v.matched)
        .map(|(item, _)| item)
        .collect()
}

/// Coarse answer: does any item contain the pattern?
pub fn any_match(verdicts: &[Verdict<'_>]) -> bool {
    verdicts.iter().any(|v| v.matched)
}

fn item_matched(span: ItemSpan, matches: &MatchVector) -> bool {
    let pattern_len = matches.pattern_len();
    if pattern_len == 0 {
        return true;
    }
    if span.len < pattern_len {
        return false;
    }
    let last_start = span.start + span.len - pattern_len;
    (span.start..=last_start).any(|p| matches.is_match(p))
}
