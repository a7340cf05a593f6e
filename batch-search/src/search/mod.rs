// Search pipeline: pack, dispatch, interpret

pub mod batch;
pub mod cancel;
pub mod dispatch;
pub mod engine;
pub mod interpret;
pub mod types;

pub use batch::{pack, Batch, ItemSpan};
pub use cancel::{cancellation_pair, CancellationHandle, CancellationToken};
pub use dispatch::{dispatch, MatchVector};
pub use engine::{Engine, SearchEngine};
pub use interpret::{any_match, interpret, matched_items};
pub use types::*;
