// Search API types: items in, verdicts out

use std::fmt;
use std::path::Path;

use crate::search::interpret::{any_match, matched_items};

/// One searchable unit: a file's contents or a file name.
///
/// Identifiers need not be unique; empty content is legal and never matches
/// a non-empty pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchItem {
    pub identifier: String,
    pub content: Vec<u8>,
}

impl SearchItem {
    pub fn new(identifier: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            identifier: identifier.into(),
            content: content.into(),
        }
    }

    /// An item identified by `path` whose searchable content is the path's
    /// final component, or the whole path when it has none.
    pub fn from_name(path: &Path) -> Self {
        let identifier = path.display().to_string();
        let content = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => identifier.clone(),
        };
        Self::new(identifier, content)
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Whether one item contains the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict<'a> {
    pub identifier: &'a str,
    pub matched: bool,
}

impl fmt::Display for Verdict<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.matched { "match" } else { "-" };
        write!(f, "{}\t{}", mark, self.identifier)
    }
}

/// Result of one search call, borrowing the caller's items.
///
/// `verdicts()[i]` always describes `items[i]`.
#[derive(Debug, Clone)]
pub struct SearchOutcome<'a> {
    items: &'a [SearchItem],
    verdicts: Vec<Verdict<'a>>,
}

impl<'a> SearchOutcome<'a> {
    pub(crate) fn new(items: &'a [SearchItem], verdicts: Vec<Verdict<'a>>) -> Self {
        debug_assert_eq!(items.len(), verdicts.len());
        Self { items, verdicts }
    }

    /// Coarse answer: does any item contain the pattern?
    pub fn found(&self) -> bool {
        any_match(&self.verdicts)
    }

    pub fn match_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.matched).count()
    }

    /// Matched items, in input order.
    pub fn matched_items(&self) -> Vec<&'a SearchItem> {
        matched_items(self.items, &self.verdicts)
    }

    pub fn matched_identifiers(&self) -> Vec<&'a str> {
        self.verdicts
            .iter()
            .filter(|v| v.matched)
            .map(|v| v.identifier)
            .collect()
    }

    /// One verdict per input item, in input order.
    pub fn verdicts(&self) -> &[Verdict<'a>] {
        &self.verdicts
    }

    /// Number of items searched.
    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}
