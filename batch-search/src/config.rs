//! Search configuration.
//!
//! Defaults, then `BATCH_SEARCH_*` environment variables, then CLI flags
//! (applied by the binary). Malformed environment values are ignored with a
//! warning rather than failing the search.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::gpu::backend::BackendKind;
use crate::gpu::types::DEFAULT_WORK_GROUP_SIZE;

/// Default cap on the packed flat buffer: 256 MiB.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 256 * 1024 * 1024;

pub const ENV_BACKEND: &str = "BATCH_SEARCH_BACKEND";
pub const ENV_KERNEL: &str = "BATCH_SEARCH_KERNEL";
pub const ENV_WORK_GROUP: &str = "BATCH_SEARCH_WORK_GROUP";
pub const ENV_MAX_BYTES: &str = "BATCH_SEARCH_MAX_BYTES";
pub const ENV_CPU_THREADS: &str = "BATCH_SEARCH_CPU_THREADS";

/// Which backend the engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Metal, then OpenCL, then the CPU pool, whichever bootstraps first.
    #[default]
    Auto,
    Metal,
    OpenCl,
    Cpu,
}

impl BackendPreference {
    /// The single backend this preference pins, if any.
    pub fn pinned(self) -> Option<BackendKind> {
        match self {
            BackendPreference::Auto => None,
            BackendPreference::Metal => Some(BackendKind::Metal),
            BackendPreference::OpenCl => Some(BackendKind::OpenCl),
            BackendPreference::Cpu => Some(BackendKind::Cpu),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pinned() {
            Some(kind) => f.write_str(kind.as_str()),
            None => f.write_str("auto"),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(BackendPreference::Auto);
        }
        match s.parse::<BackendKind>()? {
            BackendKind::Metal => Ok(BackendPreference::Metal),
            BackendKind::OpenCl => Ok(BackendPreference::OpenCl),
            BackendKind::Cpu => Ok(BackendPreference::Cpu),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub backend: BackendPreference,
    /// Kernel source file; `None` uses the source built into the crate.
    pub kernel_path: Option<PathBuf>,
    /// Requested work group size, clamped to the device maximum at launch.
    pub work_group_size: usize,
    /// Largest flat buffer a single call may pack.
    pub max_batch_bytes: usize,
    /// CPU pool width; `None` lets rayon decide.
    pub cpu_threads: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            kernel_path: None,
            work_group_size: DEFAULT_WORK_GROUP_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            cpu_threads: None,
        }
    }
}

impl SearchConfig {
    /// Defaults overridden by `BATCH_SEARCH_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_BACKEND) {
            match value.parse() {
                Ok(backend) => config.backend = backend,
                Err(e) => warn!(var = ENV_BACKEND, value = %value, "ignoring: {}", e),
            }
        }
        if let Some(value) = lookup(ENV_KERNEL) {
            if value.trim().is_empty() {
                warn!(var = ENV_KERNEL, "ignoring empty kernel path");
            } else {
                config.kernel_path = Some(PathBuf::from(value));
            }
        }
        if let Some(size) = parse_positive(&lookup, ENV_WORK_GROUP) {
            config.work_group_size = size;
        }
        if let Some(bytes) = parse_positive(&lookup, ENV_MAX_BYTES) {
            config.max_batch_bytes = bytes;
        }
        if let Some(threads) = parse_positive(&lookup, ENV_CPU_THREADS) {
            config.cpu_threads = Some(threads);
        }
        config
    }
}

fn parse_positive(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let value = lookup(key)?;
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(var = key, value = %value, "ignoring: expected a positive integer");
            None
        }
    }
}
