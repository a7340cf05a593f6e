// Turning caller-supplied paths into search items

pub mod items;

pub use items::{items_from_names, items_from_paths, ItemCollection};
