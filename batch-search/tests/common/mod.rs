//! Shared test backend: counts every handle it creates and releases.
//!
//! `CountingBackend` runs the real host scan, so verdicts are genuine, but
//! each device object is a `Tracked` value that records its release in a
//! shared ledger when dropped. Failures can be injected at any stage.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use batch_search::gpu::backend::{BackendKind, ComputeBackend, KernelArgs};
use batch_search::gpu::cpu::scan_positions;
use batch_search::gpu::device::{DeviceClass, DeviceInfo};
use batch_search::gpu::kernel::KernelSource;
use batch_search::gpu::types::LaunchConfig;
use batch_search::{BatchSearchError, Result, SearchItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Device,
    Program,
    Queue,
    Kernel,
    Buffer,
}

/// Where to make the backend fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AcquireDevice,
    BuildProgram,
    CreateQueue,
    CreateKernel,
    /// The `nth` input buffer (1-based, counted across calls).
    InputBuffer(usize),
    OutputBuffer,
    Launch,
    ReadBack,
}

#[derive(Debug, Default)]
pub struct Ledger {
    next_id: u64,
    live: HashMap<HandleKind, usize>,
    created: Vec<HandleKind>,
    released: Vec<HandleKind>,
    launches: usize,
}

impl Ledger {
    pub fn live(&self, kind: HandleKind) -> usize {
        self.live.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_live(&self) -> usize {
        self.live.values().sum()
    }

    pub fn created(&self, kind: HandleKind) -> usize {
        self.created.iter().filter(|&&k| k == kind).count()
    }

    /// Every release so far, oldest first.
    pub fn released(&self) -> &[HandleKind] {
        &self.released
    }

    pub fn launches(&self) -> usize {
        self.launches
    }
}

pub type SharedLedger = Rc<RefCell<Ledger>>;

/// A device object that reports its own release.
#[derive(Debug)]
pub struct Tracked {
    kind: HandleKind,
    pub id: u64,
    ledger: SharedLedger,
}

impl Tracked {
    fn new(ledger: &SharedLedger, kind: HandleKind) -> Self {
        let mut l = ledger.borrow_mut();
        l.next_id += 1;
        *l.live.entry(kind).or_insert(0) += 1;
        l.created.push(kind);
        Self {
            kind,
            id: l.next_id,
            ledger: Rc::clone(ledger),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        let mut l = self.ledger.borrow_mut();
        if let Some(n) = l.live.get_mut(&self.kind) {
            *n -= 1;
        }
        l.released.push(self.kind);
    }
}

pub enum TrackedData {
    Bytes(Vec<u8>),
    Matches(Vec<i32>),
}

pub struct TrackedBuffer {
    _handle: Tracked,
    data: TrackedData,
}

pub struct CountingBackend {
    ledger: SharedLedger,
    fail_at: Option<Stage>,
    info: DeviceInfo,
    input_buffers: Cell<usize>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self {
            ledger: SharedLedger::default(),
            fail_at: None,
            info: DeviceInfo {
                name: "counting test device".to_string(),
                class: DeviceClass::Gpu,
                max_buffer_len: 1 << 30,
                max_work_group_size: 256,
            },
            input_buffers: Cell::new(0),
        }
    }

    pub fn failing_at(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::new()
        }
    }

    pub fn with_max_buffer_len(mut self, bytes: usize) -> Self {
        self.info.max_buffer_len = bytes;
        self
    }

    /// Handle on the ledger that outlives the backend.
    pub fn ledger(&self) -> SharedLedger {
        Rc::clone(&self.ledger)
    }

    fn check(&self, stage: Stage) -> Result<()> {
        if self.fail_at != Some(stage) {
            return Ok(());
        }
        Err(match stage {
            Stage::AcquireDevice => BatchSearchError::NoDeviceFound,
            Stage::BuildProgram => BatchSearchError::ProgramBuildFailed {
                log: "injected build failure".to_string(),
            },
            Stage::CreateQueue
            | Stage::CreateKernel
            | Stage::InputBuffer(_)
            | Stage::OutputBuffer => {
                BatchSearchError::DeviceAllocFailed(format!("injected at {:?}", stage))
            }
            Stage::Launch => BatchSearchError::KernelLaunchFailed("injected".to_string()),
            Stage::ReadBack => BatchSearchError::ResultReadFailed("injected".to_string()),
        })
    }
}

impl ComputeBackend for CountingBackend {
    type Device = Tracked;
    type Program = Tracked;
    type Queue = Tracked;
    type Kernel = Tracked;
    type Buffer = TrackedBuffer;

    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn acquire_device(&self) -> Result<(Tracked, DeviceInfo)> {
        self.check(Stage::AcquireDevice)?;
        Ok((Tracked::new(&self.ledger, HandleKind::Device), self.info.clone()))
    }

    fn build_program(&self, _device: &Tracked, source: &KernelSource) -> Result<Tracked> {
        // The program object exists before compilation and is dropped on failure.
        let program = Tracked::new(&self.ledger, HandleKind::Program);
        self.check(Stage::BuildProgram)?;
        if let Err(e) = source.check_structure() {
            return Err(BatchSearchError::ProgramBuildFailed {
                log: format!("{}:{}", source.label(), e),
            });
        }
        Ok(program)
    }

    fn create_queue(&self, _device: &Tracked) -> Result<Tracked> {
        self.check(Stage::CreateQueue)?;
        Ok(Tracked::new(&self.ledger, HandleKind::Queue))
    }

    fn create_kernel(&self, _program: &Tracked) -> Result<Tracked> {
        self.check(Stage::CreateKernel)?;
        Ok(Tracked::new(&self.ledger, HandleKind::Kernel))
    }

    fn create_input_buffer(&self, _device: &Tracked, bytes: &[u8]) -> Result<TrackedBuffer> {
        let nth = self.input_buffers.get() + 1;
        self.input_buffers.set(nth);
        self.check(Stage::InputBuffer(nth))?;
        Ok(TrackedBuffer {
            _handle: Tracked::new(&self.ledger, HandleKind::Buffer),
            data: TrackedData::Bytes(bytes.to_vec()),
        })
    }

    fn create_output_buffer(&self, _device: &Tracked, len: usize) -> Result<TrackedBuffer> {
        self.check(Stage::OutputBuffer)?;
        Ok(TrackedBuffer {
            _handle: Tracked::new(&self.ledger, HandleKind::Buffer),
            data: TrackedData::Matches(vec![0; len]),
        })
    }

    fn launch(
        &self,
        _queue: &Tracked,
        _kernel: &mut Tracked,
        args: KernelArgs<'_, TrackedBuffer>,
        launch: LaunchConfig,
    ) -> Result<()> {
        self.check(Stage::Launch)?;
        self.ledger.borrow_mut().launches += 1;
        match (&args.pattern.data, &args.text.data, &mut args.matches.data) {
            (TrackedData::Bytes(pattern), TrackedData::Bytes(text), TrackedData::Matches(out)) => {
                scan_positions(text, pattern, &mut out[..launch.positions], launch.group_size);
                Ok(())
            }
            _ => Err(BatchSearchError::KernelLaunchFailed("bad arguments".to_string())),
        }
    }

    fn read_back(&self, _queue: &Tracked, matches: &TrackedBuffer, out: &mut [i32]) -> Result<()> {
        self.check(Stage::ReadBack)?;
        match &matches.data {
            TrackedData::Matches(values) => {
                out.copy_from_slice(&values[..out.len()]);
                Ok(())
            }
            TrackedData::Bytes(_) => {
                Err(BatchSearchError::ResultReadFailed("bad buffer".to_string()))
            }
        }
    }
}

pub fn items(pairs: &[(&str, &str)]) -> Vec<SearchItem> {
    pairs
        .iter()
        .map(|(id, content)| SearchItem::new(*id, *content))
        .collect()
}
