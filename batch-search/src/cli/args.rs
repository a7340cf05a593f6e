//! Command-line argument parsing via clap derive.
//!
//! Flags override the `BATCH_SEARCH_*` environment, which overrides the
//! built-in defaults.

use clap::Parser;
use std::path::PathBuf;

use crate::config::{BackendPreference, SearchConfig};

/// Search many files (or file names) for one substring in a single GPU pass.
///
/// Exit status: 0 if any item matched, 1 if none did, 2 on error.
#[derive(Parser, Debug)]
#[command(name = "batch-search", version, about)]
pub struct CliArgs {
    /// Exact byte substring to look for.
    #[arg(value_name = "PATTERN")]
    pub pattern: String,

    /// Files to search. Directories and unreadable paths are skipped.
    #[arg(value_name = "PATHS", required = true)]
    pub paths: Vec<PathBuf>,

    /// Match against file names instead of file contents.
    #[arg(long = "names")]
    pub names: bool,

    /// Print the number of matching items instead of their names.
    #[arg(short = 'c', long = "count")]
    pub count: bool,

    /// Print nothing; report through the exit status only.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Compute backend: auto, metal, opencl, cpu.
    #[arg(long = "backend", value_name = "BACKEND")]
    pub backend: Option<BackendPreference>,

    /// Kernel source file (default: the source built into the binary).
    #[arg(long = "kernel", value_name = "FILE")]
    pub kernel: Option<PathBuf>,

    /// Work-items per work group.
    #[arg(long = "work-group-size", value_name = "N")]
    pub work_group_size: Option<usize>,

    /// Largest packed batch, in bytes.
    #[arg(long = "max-batch-bytes", value_name = "BYTES")]
    pub max_batch_bytes: Option<usize>,

    /// Threads in the CPU backend's pool.
    #[arg(long = "cpu-threads", value_name = "N")]
    pub cpu_threads: Option<usize>,

    /// Print the selected backend and device before searching.
    #[arg(long = "device-info")]
    pub device_info: bool,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl CliArgs {
    /// Layer these flags over `base`.
    pub fn apply_to(&self, base: SearchConfig) -> SearchConfig {
        let mut config = base;
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(ref kernel) = self.kernel {
            config.kernel_path = Some(kernel.clone());
        }
        if let Some(size) = self.work_group_size.filter(|&n| n > 0) {
            config.work_group_size = size;
        }
        if let Some(bytes) = self.max_batch_bytes {
            config.max_batch_bytes = bytes;
        }
        if let Some(threads) = self.cpu_threads.filter(|&n| n > 0) {
            config.cpu_threads = Some(threads);
        }
        config
    }

    /// Environment config with these flags applied.
    pub fn search_config(&self) -> SearchConfig {
        self.apply_to(SearchConfig::from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let args = CliArgs::try_parse_from(["batch-search", "needle", "a.txt", "b.txt"]).unwrap();
        assert_eq!(args.pattern, "needle");
        assert_eq!(args.paths.len(), 2);
        assert!(!args.names && !args.count && !args.quiet);
        assert_eq!(args.apply_to(SearchConfig::default()), SearchConfig::default());
    }

    #[test]
    fn test_paths_required() {
        assert!(CliArgs::try_parse_from(["batch-search", "needle"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let args = CliArgs::try_parse_from([
            "batch-search",
            "--backend",
            "cpu",
            "--kernel",
            "/tmp/k.cl",
            "--work-group-size",
            "32",
            "--max-batch-bytes",
            "1024",
            "--cpu-threads",
            "2",
            "x",
            "f",
        ])
        .unwrap();
        let config = args.apply_to(SearchConfig::default());
        assert_eq!(config.backend, BackendPreference::Cpu);
        assert_eq!(config.kernel_path, Some(PathBuf::from("/tmp/k.cl")));
        assert_eq!(config.work_group_size, 32);
        assert_eq!(config.max_batch_bytes, 1024);
        assert_eq!(config.cpu_threads, Some(2));
    }

    #[test]
    fn test_bad_backend_rejected() {
        assert!(CliArgs::try_parse_from(["batch-search", "--backend", "cuda", "x", "f"]).is_err());
    }
}
