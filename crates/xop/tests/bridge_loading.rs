use std::os::raw::{c_char, c_void};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use xop::bridge::abi::{ForeignAttribute, ForeignInputs, ForeignOutputList, LogFn};
use xop::{Bridge, BridgeCell, BridgeConfig, BridgeSymbols, KernelError};

static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
static FAILING_INIT_CALLS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn counting_init() -> bool {
    INIT_CALLS.fetch_add(1, Ordering::SeqCst);
    true
}

unsafe extern "C" fn failing_init() -> bool {
    FAILING_INIT_CALLS.fetch_add(1, Ordering::SeqCst);
    false
}

unsafe extern "C" fn no_instance(
    _module: *const c_char,
    _class_name: *const c_char,
    _attributes: *const ForeignAttribute,
    _count: usize,
) -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn no_invoke(
    _instance: *mut c_void,
    _entry_point: *const c_char,
    _inputs: *const ForeignInputs,
    _outputs: *mut ForeignOutputList,
    _log: Option<LogFn>,
) -> bool {
    false
}

unsafe extern "C" fn no_release(_instance: *mut c_void) {}

const INIT_ERROR: &[u8] = b"interpreter failed to start";

unsafe extern "C" fn init_error(buffer: *mut c_char, capacity: usize) -> usize {
    if !buffer.is_null() && capacity > 0 {
        let written = INIT_ERROR.len().min(capacity - 1);
        std::ptr::copy_nonoverlapping(INIT_ERROR.as_ptr() as *const c_char, buffer, written);
        *buffer.add(written) = 0;
    }
    INIT_ERROR.len()
}

fn symbols(init: xop::bridge::abi::InitFn) -> BridgeSymbols {
    BridgeSymbols {
        init,
        new_instance: no_instance,
        invoke: no_invoke,
        release_instance: no_release,
        last_error: init_error,
    }
}

#[test]
fn concurrent_first_use_initializes_once() {
    const THREADS: usize = 8;
    let cell = BridgeCell::new();
    let barrier = Barrier::new(THREADS);

    let bridges: Vec<Arc<Bridge>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cell.get_or_load(|| Bridge::from_symbols(symbols(counting_init)))
                        .expect("bridge loads")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("loader thread"))
            .collect()
    });

    assert_eq!(INIT_CALLS.load(Ordering::SeqCst), 1);
    assert!(bridges.iter().all(|bridge| Arc::ptr_eq(bridge, &bridges[0])));
    assert!(cell.get().is_some());
}

#[test]
fn failed_init_reports_last_error_and_is_not_retried() {
    let cell = BridgeCell::new();
    let first = cell
        .get_or_load(|| Bridge::from_symbols(symbols(failing_init)))
        .unwrap_err();
    let second = cell
        .get_or_load(|| Bridge::from_symbols(symbols(failing_init)))
        .unwrap_err();

    assert_eq!(first, second);
    match first {
        KernelError::BridgeLoad(message) => {
            assert!(message.contains("interpreter failed to start"), "{message}")
        }
        other => panic!("expected BridgeLoad, got {other:?}"),
    }
    assert_eq!(FAILING_INIT_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn explicit_library_path_skips_candidates() {
    let config = BridgeConfig {
        library: Some(PathBuf::from("/nonexistent/libexplicit_bridge.so")),
        candidates: vec![PathBuf::from("/nonexistent/libcandidate_bridge.so")],
        forward_foreign_logs: false,
    };
    let err = Bridge::open(&config).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("libexplicit_bridge"), "{message}");
    assert!(!message.contains("libcandidate_bridge"), "{message}");
}

#[test]
fn every_candidate_is_reported_when_none_loads() {
    let config = BridgeConfig {
        library: None,
        candidates: vec![
            PathBuf::from("/nonexistent/liba_bridge.so"),
            PathBuf::from("/nonexistent/libb_bridge.so"),
        ],
        forward_foreign_logs: true,
    };
    let message = Bridge::open(&config).unwrap_err().to_string();
    assert!(message.contains("liba_bridge") && message.contains("libb_bridge"), "{message}");
}
