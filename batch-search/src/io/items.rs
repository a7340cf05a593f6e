//! Item collection from explicit paths.
//!
//! No directory traversal: the caller names every path. A path that is not
//! a regular file, or cannot be read, is skipped with a warning and recorded
//! in [`ItemCollection::skipped`].

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::search::types::SearchItem;

/// Items read from disk plus the paths that were left out.
#[derive(Debug, Default)]
pub struct ItemCollection {
    /// One item per readable regular file, in argument order.
    pub items: Vec<SearchItem>,
    /// Paths that were skipped (path, reason).
    pub skipped: Vec<(PathBuf, String)>,
}

/// Read each regular file in `paths` as one item whose identifier is the
/// path as given.
pub fn items_from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> ItemCollection {
    let mut collection = ItemCollection::default();
    for path in paths {
        let path = path.as_ref();
        match read_regular_file(path) {
            Ok(content) => collection
                .items
                .push(SearchItem::new(path.display().to_string(), content)),
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "skipping path");
                collection.skipped.push((path.to_path_buf(), reason));
            }
        }
    }
    collection
}

/// Items whose content is each path's final component (the whole path when
/// it has none). Nothing is read from disk.
pub fn items_from_names<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Vec<SearchItem> {
    paths
        .into_iter()
        .map(|path| SearchItem::from_name(path.as_ref()))
        .collect()
}

fn read_regular_file(path: &Path) -> Result<Vec<u8>, String> {
    let meta = fs::metadata(path).map_err(|e| e.to_string())?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    fs::read(path).map_err(|e| e.to_string())
}
