//! batch-search -- GPU-parallel substring search over batches of items.
//!
//! Packs many independently-sized byte buffers (file contents or file names)
//! into one flat buffer, runs a single match kernel with one work-item per
//! byte position, and folds the per-position results back into per-item
//! verdicts.
//!
//! Backends:
//! - **Metal** on macOS (runtime-compiled `match_positions.metal`)
//! - **OpenCL** behind the `opencl` feature (`match_positions.cl`)
//! - **CPU pool** (rayon) everywhere, implementing the same contract
//!
//! ```rust,no_run
//! use batch_search::{Engine, SearchConfig, SearchItem};
//!
//! let items = vec![
//!     SearchItem::new("a.txt", "hello world"),
//!     SearchItem::new("b.txt", "goodbye"),
//! ];
//! let mut engine = Engine::from_config(&SearchConfig::from_env())?;
//! let outcome = engine.run_search(b"hello", &items)?;
//! assert_eq!(outcome.matched_identifiers(), vec!["a.txt"]);
//! # Ok::<(), batch_search::BatchSearchError>(())
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gpu;
pub mod io;
pub mod search;

pub use config::{BackendPreference, SearchConfig};
pub use error::{BatchSearchError, RecoveryAction, Result};
pub use gpu::backend::{BackendKind, ComputeBackend};
pub use search::cancel::{cancellation_pair, CancellationHandle, CancellationToken};
pub use search::engine::{Engine, SearchEngine};
pub use search::types::{SearchItem, SearchOutcome, Verdict};
