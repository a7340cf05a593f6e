//! Resource lifecycle tests against the handle-counting backend.
//!
//! Every search call must release its queue, kernel, and buffers before
//! returning, in reverse creation order, on success and on every failure
//! path. Host-side validation must fail before any device object exists.

mod common;

use std::io::Write;
use std::path::PathBuf;

use batch_search::config::SearchConfig;
use batch_search::search::cancel::cancellation_pair;
use batch_search::search::engine::SearchEngine;
use batch_search::{BatchSearchError, RecoveryAction};
use common::{items, CountingBackend, HandleKind, Stage};
use tempfile::NamedTempFile;

use HandleKind::{Buffer, Device, Kernel, Program, Queue};

fn engine(backend: CountingBackend) -> SearchEngine<CountingBackend> {
    SearchEngine::new(backend, SearchConfig::default())
}

fn engine_with(backend: CountingBackend, config: SearchConfig) -> SearchEngine<CountingBackend> {
    SearchEngine::new(backend, config)
}

/// Releases in one successful dispatch: output, text, pattern, kernel, queue.
const DISPATCH_RELEASES: [HandleKind; 5] = [Buffer, Buffer, Buffer, Kernel, Queue];

// ============================================================================
// Success path
// ============================================================================

#[test]
fn test_success_releases_per_call_handles_in_reverse_order() {
    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a.txt", "hello world"), ("b.txt", "goodbye")]);

    let outcome = engine.run_search(b"hello", &items).unwrap();
    assert_eq!(outcome.matched_identifiers(), vec!["a.txt"]);

    let l = ledger.borrow();
    assert_eq!(l.released(), &DISPATCH_RELEASES);
    assert_eq!(l.live(Queue), 0);
    assert_eq!(l.live(Kernel), 0);
    assert_eq!(l.live(Buffer), 0);
    // device and program stay cached
    assert_eq!(l.live(Device), 1);
    assert_eq!(l.live(Program), 1);
    drop(l);

    drop(engine);
    let l = ledger.borrow();
    assert_eq!(l.total_live(), 0);
    assert_eq!(&l.released()[5..], &[Program, Device]);
}

#[test]
fn test_program_built_once_across_calls() {
    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("x", "abcabc"), ("y", "cab"), ("z", "")]);

    let first: Vec<bool> = engine
        .run_search(b"cab", &items)
        .unwrap()
        .verdicts()
        .iter()
        .map(|v| v.matched)
        .collect();
    let second: Vec<bool> = engine
        .run_search(b"cab", &items)
        .unwrap()
        .verdicts()
        .iter()
        .map(|v| v.matched)
        .collect();

    assert_eq!(first, vec![true, true, false]);
    assert_eq!(first, second);
    let l = ledger.borrow();
    assert_eq!(l.created(Device), 1);
    assert_eq!(l.created(Program), 1);
    assert_eq!(l.created(Queue), 2);
    assert_eq!(l.launches(), 2);
}

// ============================================================================
// Build failures (scenario D)
// ============================================================================

#[test]
fn test_malformed_kernel_source_leaves_nothing_allocated() {
    let mut kernel = NamedTempFile::new().unwrap();
    write!(kernel, "__kernel void broken(__global uchar* p {{").unwrap();

    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let config = SearchConfig {
        kernel_path: Some(kernel.path().to_path_buf()),
        ..SearchConfig::default()
    };
    let mut engine = engine_with(backend, config);
    let items = items(&[("a", "hello")]);

    let err = engine.run_search(b"hello", &items).unwrap_err();
    assert!(matches!(err, BatchSearchError::ProgramBuildFailed { .. }), "{:?}", err);
    assert_eq!(err.recovery_action(), RecoveryAction::FixConfiguration);

    let l = ledger.borrow();
    assert_eq!(l.total_live(), 0);
    assert_eq!(l.created(Program), 1);
    assert_eq!(l.released(), &[Program, Device]);
    assert_eq!(l.created(Queue), 0);
    assert_eq!(l.launches(), 0);
}

#[test]
fn test_truncated_kernel_naming_entry_point_leaves_nothing_allocated() {
    let mut kernel = NamedTempFile::new().unwrap();
    write!(kernel, "__kernel void match_positions( {{").unwrap();

    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let config = SearchConfig {
        kernel_path: Some(kernel.path().to_path_buf()),
        ..SearchConfig::default()
    };
    let mut engine = engine_with(backend, config);
    let items = items(&[("a.txt", "hello")]);

    match engine.run_search(b"hello", &items).unwrap_err() {
        BatchSearchError::ProgramBuildFailed { log } => {
            assert!(log.contains("1:32: error: unclosed `{`"), "{}", log)
        }
        other => panic!("expected ProgramBuildFailed, got {:?}", other),
    }
    let l = ledger.borrow();
    assert_eq!(l.total_live(), 0);
    assert_eq!(l.released(), &[Program, Device]);
    assert_eq!(l.launches(), 0);
}

#[test]
fn test_injected_build_failure_leaves_nothing_allocated() {
    let backend = CountingBackend::failing_at(Stage::BuildProgram);
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a", "hello")]);

    let err = engine.run_search(b"h", &items).unwrap_err();
    match err {
        BatchSearchError::ProgramBuildFailed { log } => assert!(log.contains("injected")),
        other => panic!("expected ProgramBuildFailed, got {:?}", other),
    }
    assert_eq!(ledger.borrow().total_live(), 0);
    assert!(engine.device_info().is_none());
}

// ============================================================================
// Dispatch failures
// ============================================================================

#[test]
fn test_text_buffer_failure_releases_in_reverse_order() {
    // pattern buffer is input #1, text buffer is input #2
    let backend = CountingBackend::failing_at(Stage::InputBuffer(2));
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a", "hello")]);

    let err = engine.run_search(b"ell", &items).unwrap_err();
    assert!(matches!(err, BatchSearchError::DeviceAllocFailed(_)));
    assert_eq!(err.recovery_action(), RecoveryAction::RetryCall);

    let l = ledger.borrow();
    assert_eq!(l.released(), &[Buffer, Kernel, Queue, Program, Device]);
    assert_eq!(l.total_live(), 0);
}

#[test]
fn test_failure_on_warm_engine_keeps_device_and_retry_succeeds() {
    // first call uses inputs #1 and #2; the second call's text buffer is #4
    let backend = CountingBackend::failing_at(Stage::InputBuffer(4));
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a", "hello"), ("b", "yellow")]);

    assert!(engine.found(b"ell", &items).unwrap());
    let before = ledger.borrow().released().len();

    let err = engine.run_search(b"ell", &items).unwrap_err();
    assert!(matches!(err, BatchSearchError::DeviceAllocFailed(_)));
    {
        let l = ledger.borrow();
        assert_eq!(&l.released()[before..], &[Buffer, Kernel, Queue]);
        assert_eq!(l.live(Device), 1);
        assert_eq!(l.live(Program), 1);
        assert_eq!(l.live(Buffer), 0);
    }

    let outcome = engine.run_search(b"ell", &items).unwrap();
    assert_eq!(outcome.matched_identifiers(), vec!["a", "b"]);
    assert_eq!(ledger.borrow().created(Program), 1);
}

#[test]
fn test_every_dispatch_stage_failure_is_clean() {
    let cases = [
        (Stage::CreateQueue, "alloc"),
        (Stage::CreateKernel, "alloc"),
        (Stage::InputBuffer(1), "alloc"),
        (Stage::OutputBuffer, "alloc"),
        (Stage::Launch, "launch"),
        (Stage::ReadBack, "read"),
    ];
    for (stage, expected) in cases {
        let backend = CountingBackend::failing_at(stage);
        let ledger = backend.ledger();
        let mut engine = engine(backend);
        let items = items(&[("a", "abc"), ("b", "bcd")]);

        let err = engine.run_search(b"bc", &items).unwrap_err();
        let kind = match err {
            BatchSearchError::DeviceAllocFailed(_) => "alloc",
            BatchSearchError::KernelLaunchFailed(_) => "launch",
            BatchSearchError::ResultReadFailed(_) => "read",
            ref other => panic!("{:?}: unexpected error {:?}", stage, other),
        };
        assert_eq!(kind, expected, "{:?}", stage);
        assert_eq!(ledger.borrow().total_live(), 0, "{:?} leaked handles", stage);
    }
}

// ============================================================================
// Host-side validation happens before any device work
// ============================================================================

#[test]
fn test_batch_too_large_before_device() {
    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let config = SearchConfig {
        max_batch_bytes: 8,
        ..SearchConfig::default()
    };
    let mut engine = engine_with(backend, config);
    let items = items(&[("a", "12345"), ("b", "6789")]);

    let err = engine.run_search(b"1", &items).unwrap_err();
    assert!(matches!(err, BatchSearchError::BatchTooLarge { requested: 9, limit: 8 }));
    assert!(err.is_host_side());
    assert_eq!(ledger.borrow().created(Device), 0);
}

#[test]
fn test_missing_kernel_source_before_device() {
    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let missing = PathBuf::from("/nonexistent/batch-search/match_positions.cl");
    let config = SearchConfig {
        kernel_path: Some(missing.clone()),
        ..SearchConfig::default()
    };
    let mut engine = engine_with(backend, config);
    let items = items(&[("a", "abc")]);

    match engine.run_search(b"a", &items).unwrap_err() {
        BatchSearchError::KernelSourceUnavailable { path, .. } => assert_eq!(path, missing),
        other => panic!("expected KernelSourceUnavailable, got {:?}", other),
    }
    assert_eq!(ledger.borrow().created(Device), 0);
}

#[test]
fn test_device_buffer_limit_checked_before_buffers() {
    // 5 flat bytes need a 20-byte match buffer
    let backend = CountingBackend::new().with_max_buffer_len(16);
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a", "ab"), ("b", "cde")]);

    let err = engine.run_search(b"c", &items).unwrap_err();
    assert!(
        matches!(err, BatchSearchError::BatchTooLarge { requested: 20, limit: 16 }),
        "{:?}",
        err
    );
    let l = ledger.borrow();
    assert_eq!(l.created(Buffer), 0);
    assert_eq!(l.launches(), 0);
    assert_eq!(l.total_live(), 0);
}

#[test]
fn test_cancelled_before_device() {
    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a", "abc")]);
    let (token, handle) = cancellation_pair();
    handle.cancel();

    let err = engine.run_search_with_cancel(b"a", &items, &token).unwrap_err();
    assert!(matches!(err, BatchSearchError::Cancelled));
    assert!(!err.should_log());
    assert_eq!(ledger.borrow().created(Device), 0);
}

#[test]
fn test_no_device_found() {
    let backend = CountingBackend::failing_at(Stage::AcquireDevice);
    let ledger = backend.ledger();
    let mut engine = engine(backend);
    let items = items(&[("a", "abc")]);

    let err = engine.run_search(b"a", &items).unwrap_err();
    assert!(matches!(err, BatchSearchError::NoDeviceFound));
    assert_eq!(err.recovery_action(), RecoveryAction::FallbackToCpu);
    assert_eq!(ledger.borrow().total_live(), 0);
}

#[test]
fn test_trivial_searches_skip_the_device() {
    let backend = CountingBackend::new();
    let ledger = backend.ledger();
    let mut engine = engine(backend);

    let empty_items = items(&[("x", ""), ("y", "")]);
    assert!(!engine.found(b"abc", &empty_items).unwrap());
    assert!(!engine.found(b"abc", &[]).unwrap());

    let some = items(&[("x", ""), ("y", "abc")]);
    let outcome = engine.run_search(b"", &some).unwrap();
    assert_eq!(outcome.match_count(), 2);

    assert_eq!(ledger.borrow().created(Device), 0);
}
