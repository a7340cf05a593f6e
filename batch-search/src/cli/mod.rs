//! CLI module: collect items, search, report.
//!
//! parse args -> build config -> collect items -> search -> print -> exit code.

pub mod args;

use std::io::{self, Write};

use thiserror::Error;
use tracing::warn;

use crate::error::BatchSearchError;
use crate::io::{items_from_names, items_from_paths};
use crate::search::engine::Engine;
use args::CliArgs;

/// Exit status when at least one item matched.
pub const EXIT_FOUND: u8 = 0;
/// Exit status when no item matched.
pub const EXIT_NOT_FOUND: u8 = 1;
/// Exit status on any error.
pub const EXIT_ERROR: u8 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Search(#[from] BatchSearchError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    /// Whether `run` reports this error on stderr. A cancelled search exits
    /// quietly.
    pub fn should_log(&self) -> bool {
        match self {
            CliError::Search(e) => e.should_log(),
            CliError::Output(_) => true,
        }
    }
}

/// Run one search described by `args`, writing results to `out`.
///
/// Returns the process exit status. Errors are reported on stderr.
pub fn run(args: &CliArgs, out: &mut impl Write) -> u8 {
    match execute(args, out) {
        Ok(true) => EXIT_FOUND,
        Ok(false) => EXIT_NOT_FOUND,
        Err(e) => {
            if e.should_log() {
                eprintln!("batch-search: {}", e);
            }
            EXIT_ERROR
        }
    }
}

/// Search and print; `Ok(found)` on success.
pub fn execute(args: &CliArgs, out: &mut impl Write) -> Result<bool, CliError> {
    let config = args.search_config();

    let items = if args.names {
        items_from_names(&args.paths)
    } else {
        let collection = items_from_paths(&args.paths);
        if collection.items.is_empty() && !collection.skipped.is_empty() {
            warn!(skipped = collection.skipped.len(), "no readable files to search");
        }
        collection.items
    };

    let mut engine = Engine::from_config(&config)?;
    if args.device_info {
        let kind = engine.kind();
        let info = engine.bootstrap()?;
        writeln!(out, "Backend: {}", kind)?;
        writeln!(out, "{}", info)?;
    }

    let outcome = engine.run_search(args.pattern.as_bytes(), &items)?;
    if !args.quiet {
        if args.count {
            writeln!(out, "{}", outcome.match_count())?;
        } else {
            for identifier in outcome.matched_identifiers() {
                writeln!(out, "{}", identifier)?;
            }
        }
    }
    Ok(outcome.found())
}
