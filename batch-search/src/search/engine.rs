//! Search engine: one call from items to verdicts.
//!
//! ## Call sequence
//!
//! 1. Resolve kernel source (configured path or built-in)
//! 2. Pack items against the host byte limit
//! 3. Acquire the device, or reuse the one from an earlier call
//! 4. Build the program, or reuse the cached one
//! 5. Check the batch against the device's largest buffer
//! 6. Dispatch and interpret
//!
//! Steps 1 and 2 fail before any device object exists. Everything created
//! in step 6 is released before the call returns. The device and programs
//! stay cached for the next call, except that a call which acquired the
//! device and then failed releases it again.

use std::mem;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{BackendPreference, SearchConfig};
use crate::error::{BatchSearchError, RecoveryAction, Result};
use crate::gpu::backend::{BackendKind, ComputeBackend};
use crate::gpu::context::ComputeContext;
use crate::gpu::cpu::CpuBackend;
use crate::gpu::device::DeviceInfo;
use crate::gpu::kernel::KernelSource;
use crate::gpu::types::MATCH;
#[cfg(target_os = "macos")]
use crate::gpu::metal::MetalBackend;
#[cfg(feature = "opencl")]
use crate::gpu::opencl::OpenClBackend;
use crate::search::batch::{pack, Batch};
use crate::search::cancel::CancellationToken;
use crate::search::dispatch::{dispatch, MatchVector};
use crate::search::interpret::interpret;
use crate::search::types::{SearchItem, SearchOutcome};

/// Search engine over one compute backend.
///
/// Methods take `&mut self`: an engine serves one caller at a time. Use one
/// engine per worker thread, or wrap it in a lock.
pub struct SearchEngine<B: ComputeBackend> {
    backend: B,
    config: SearchConfig,
    context: Option<ComputeContext<B>>,
}

impl<B: ComputeBackend> SearchEngine<B> {
    /// Create an engine. No device work happens until the first search or
    /// an explicit [`bootstrap`](Self::bootstrap).
    pub fn new(backend: B, config: SearchConfig) -> Self {
        Self {
            backend,
            config,
            context: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Acquire the compute device now instead of on first search.
    pub fn bootstrap(&mut self) -> Result<&DeviceInfo> {
        let context = match self.context.take() {
            Some(context) => context,
            None => ComputeContext::bootstrap(&self.backend)?,
        };
        Ok(self.context.insert(context).info())
    }

    /// The selected device, once acquired.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.context.as_ref().map(|c| c.info())
    }

    /// Number of kernel programs built so far.
    pub fn program_count(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.program_count())
    }

    /// Drop the device and every cached program.
    pub fn release(&mut self) {
        if self.context.take().is_some() {
            debug!(backend = %self.backend.kind(), "compute context released");
        }
    }

    /// Search `items` for `pattern`. Verdicts come back in input order.
    pub fn run_search<'a>(
        &mut self,
        pattern: &[u8],
        items: &'a [SearchItem],
    ) -> Result<SearchOutcome<'a>> {
        self.run_search_with_cancel(pattern, items, &CancellationToken::never())
    }

    /// [`run_search`](Self::run_search), abandoning the call with
    /// `Cancelled` if `cancel` fires before the kernel is launched.
    pub fn run_search_with_cancel<'a>(
        &mut self,
        pattern: &[u8],
        items: &'a [SearchItem],
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome<'a>> {
        self.search(pattern, items, cancel).inspect_err(|e| {
            if e.should_log() {
                warn!(
                    backend = %self.backend.kind(),
                    host_side = e.is_host_side(),
                    recovery = ?e.recovery_action(),
                    error = %e,
                    "search failed"
                );
            }
        })
    }

    /// Coarse mode: does any item contain `pattern`?
    pub fn found(&mut self, pattern: &[u8], items: &[SearchItem]) -> Result<bool> {
        Ok(self.run_search(pattern, items)?.found())
    }

    fn search<'a>(
        &mut self,
        pattern: &[u8],
        items: &'a [SearchItem],
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome<'a>> {
        let start = Instant::now();
        let source = KernelSource::resolve(self.config.kernel_path.as_ref(), self.backend.kind())?;
        let batch = pack(items, self.config.max_batch_bytes)?;
        if cancel.is_cancelled() {
            return Err(BatchSearchError::Cancelled);
        }

        let matches = if pattern.is_empty() || batch.flat_len() == 0 {
            // Answered on the host: every item, or none, matches.
            MatchVector::new(vec![MATCH; batch.flat_len()], pattern.len())
        } else {
            let fresh = self.context.is_none();
            let result = self.match_on_device(&source, pattern, &batch, cancel);
            if result.is_err() && fresh {
                self.context = None;
            }
            result?
        };

        let verdicts = interpret(&batch, &matches);
        let outcome = SearchOutcome::new(items, verdicts);
        debug!(
            backend = %self.backend.kind(),
            items = items.len(),
            flat_bytes = batch.flat_len(),
            matched = outcome.match_count(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "search complete"
        );
        Ok(outcome)
    }

    fn match_on_device(
        &mut self,
        source: &KernelSource,
        pattern: &[u8],
        batch: &Batch<'_>,
        cancel: &CancellationToken,
    ) -> Result<MatchVector> {
        let context = match self.context.take() {
            Some(context) => context,
            None => ComputeContext::bootstrap(&self.backend)?,
        };
        let context = self.context.insert(context);
        let program = context.ensure_program(&self.backend, source)?;

        let required = batch.flat_len().saturating_mul(mem::size_of::<i32>());
        let limit = context.info().max_buffer_len;
        if required > limit {
            return Err(BatchSearchError::BatchTooLarge {
                requested: required,
                limit,
            });
        }
        if cancel.is_cancelled() {
            return Err(BatchSearchError::Cancelled);
        }

        dispatch(
            &self.backend,
            context,
            program,
            pattern,
            batch,
            self.config.work_group_size,
        )
    }
}

/// Dispatch a method call to whichever backend an [`Engine`] holds.
macro_rules! with_engine {
    ($engine:expr, $inner:ident => $body:expr) => {
        match $engine {
            Engine::Cpu($inner) => $body,
            #[cfg(target_os = "macos")]
            Engine::Metal($inner) => $body,
            #[cfg(feature = "opencl")]
            Engine::OpenCl($inner) => $body,
        }
    };
}

/// A search engine on whichever backend the configuration selects.
pub enum Engine {
    Cpu(SearchEngine<CpuBackend>),
    #[cfg(target_os = "macos")]
    Metal(SearchEngine<MetalBackend>),
    #[cfg(feature = "opencl")]
    OpenCl(SearchEngine<OpenClBackend>),
}

impl Engine {
    /// Build an engine for `config.backend`.
    ///
    /// A pinned GPU backend must bootstrap here or the error is returned.
    /// `Auto` probes Metal, then OpenCL, and settles on the CPU pool when
    /// neither has a device. The CPU engine acquires its pool lazily.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        match config.backend {
            BackendPreference::Cpu => Ok(Self::cpu(config)),
            BackendPreference::Metal => Self::metal(config),
            BackendPreference::OpenCl => Self::opencl(config),
            BackendPreference::Auto => {
                for probe in [Self::metal as fn(&SearchConfig) -> Result<Self>, Self::opencl] {
                    match probe(config) {
                        Ok(engine) => return Ok(engine),
                        Err(e) if e.recovery_action() == RecoveryAction::FallbackToCpu => {
                            debug!(error = %e, "backend probe failed");
                        }
                        Err(e) => return Err(e),
                    }
                }
                info!("no GPU backend available, using the CPU pool");
                Ok(Self::cpu(config))
            }
        }
    }

    fn cpu(config: &SearchConfig) -> Self {
        Engine::Cpu(SearchEngine::new(
            CpuBackend::new(config.cpu_threads),
            config.clone(),
        ))
    }

    #[cfg(target_os = "macos")]
    fn metal(config: &SearchConfig) -> Result<Self> {
        let mut engine = SearchEngine::new(MetalBackend, config.clone());
        engine.bootstrap()?;
        Ok(Engine::Metal(engine))
    }

    #[cfg(not(target_os = "macos"))]
    fn metal(_config: &SearchConfig) -> Result<Self> {
        Err(BatchSearchError::BackendUnavailable {
            backend: BackendKind::Metal,
        })
    }

    #[cfg(feature = "opencl")]
    fn opencl(config: &SearchConfig) -> Result<Self> {
        let mut engine = SearchEngine::new(OpenClBackend, config.clone());
        engine.bootstrap()?;
        Ok(Engine::OpenCl(engine))
    }

    #[cfg(not(feature = "opencl"))]
    fn opencl(_config: &SearchConfig) -> Result<Self> {
        Err(BatchSearchError::BackendUnavailable {
            backend: BackendKind::OpenCl,
        })
    }

    pub fn kind(&self) -> BackendKind {
        with_engine!(self, e => e.backend().kind())
    }

    pub fn bootstrap(&mut self) -> Result<&DeviceInfo> {
        with_engine!(self, e => e.bootstrap())
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        with_engine!(self, e => e.device_info())
    }

    pub fn program_count(&self) -> usize {
        with_engine!(self, e => e.program_count())
    }

    pub fn run_search<'a>(
        &mut self,
        pattern: &[u8],
        items: &'a [SearchItem],
    ) -> Result<SearchOutcome<'a>> {
        with_engine!(self, e => e.run_search(pattern, items))
    }

    pub fn run_search_with_cancel<'a>(
        &mut self,
        pattern: &[u8],
        items: &'a [SearchItem],
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome<'a>> {
        with_engine!(self, e => e.run_search_with_cancel(pattern, items, cancel))
    }

    pub fn found(&mut self, pattern: &[u8], items: &[SearchItem]) -> Result<bool> {
        with_engine!(self, e => e.found(pattern, items))
    }
}
