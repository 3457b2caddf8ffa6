//! C ABI between the engine and callables produced by a graph-fusion pass.

use std::os::raw::{c_char, c_void};

pub const KERNEL_API_VERSION: u32 = 1;

pub type AllocateFn =
    unsafe extern "C" fn(allocator: *mut c_void, alignment: usize, size: usize) -> *mut c_void;
pub type ReleaseFn = unsafe extern "C" fn(allocator: *mut c_void, ptr: *mut c_void);

/// Handed to a create-state callable.
///
/// `allocate`, `release` and `allocator` stay valid for the kernel's lifetime and
/// may be retained in the state; the struct itself and `node_name` only for the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ComputeContext {
    pub allocate: AllocateFn,
    pub release: ReleaseFn,
    pub allocator: *mut c_void,
    pub node_name: *const c_char,
}

/// Returns 0 and writes `*state` on success; any other status fails kernel construction.
pub type CreateStateFn =
    unsafe extern "C" fn(context: *const ComputeContext, state: *mut *mut c_void) -> i32;
/// Returns 0 on success; any other status is surfaced to the executor unchanged.
pub type ComputeFn =
    unsafe extern "C" fn(state: *mut c_void, api: *const KernelApi, context: *mut c_void) -> i32;
pub type DestroyStateFn = unsafe extern "C" fn(state: *mut c_void);

/// Read-only description of one input. `data` and `dims` are valid until compute returns.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawTensorView {
    pub data: *const c_void,
    pub type_code: i32,
    pub dims: *const i64,
    pub rank: usize,
}

impl RawTensorView {
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null(),
            type_code: -1,
            dims: std::ptr::null(),
            rank: 0,
        }
    }
}

/// Callback table a compute callable uses to reach the current execution context.
///
/// Every callback takes the `context` pointer compute received.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KernelApi {
    pub version: u32,
    pub input_count: unsafe extern "C" fn(context: *mut c_void) -> usize,
    pub output_count: unsafe extern "C" fn(context: *mut c_void) -> usize,
    /// Fills `view` and returns 0, or returns -1 for a bad index or a string input.
    pub input: unsafe extern "C" fn(
        context: *mut c_void,
        index: usize,
        view: *mut RawTensorView,
    ) -> i32,
    /// Allocates output `index` with the given dims and returns its writable buffer,
    /// or null on failure. Re-allocating an output invalidates its previous buffer.
    pub allocate_output: unsafe extern "C" fn(
        context: *mut c_void,
        index: usize,
        dims: *const i64,
        rank: usize,
    ) -> *mut c_void,
}
