//! C ABI shared with foreign bridge libraries.
//!
//! Layouts and signatures here are the binary contract; both sides must agree
//! on them exactly. Every buffer a foreign runtime hands back is allocated with
//! `malloc` and released by the engine with `free`.

use std::os::raw::{c_char, c_void};

pub const INIT_SYMBOL: &[u8] = b"Initialize\0";
pub const NEW_INSTANCE_SYMBOL: &[u8] = b"NewInstance\0";
pub const INVOKE_SYMBOL: &[u8] = b"InvokePythonFunc\0";
pub const RELEASE_INSTANCE_SYMBOL: &[u8] = b"ReleaseInstance\0";
pub const LAST_ERROR_SYMBOL: &[u8] = b"GetLastErrorMessage\0";

/// One attribute passed to `NewInstance`. Both strings are NUL-terminated and
/// only valid for the duration of the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignAttribute {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Inputs as parallel arrays of `count` entries each.
///
/// For string tensors `data[i]` points to an array of NUL-terminated string
/// pointers, one per element.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignInputs {
    pub data: *const *const c_void,
    pub type_codes: *const i32,
    pub dims: *const *const i64,
    pub ranks: *const usize,
    pub count: usize,
}

/// One output record produced by the foreign side.
///
/// `element_size` is authoritative for the byte length of `data`:
/// `element_size * product(dims)`. String outputs store an array of
/// `product(dims)` malloc'd C strings in `data` and ignore `element_size`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignOutput {
    pub data: *mut c_void,
    pub type_code: i32,
    pub element_size: i64,
    pub dims: *mut i64,
    pub rank: usize,
}

/// Output list written by a successful invoke. `items` is malloc'd by the foreign side.
///
/// On failure the foreign side must leave this untouched and release anything
/// it already allocated itself.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForeignOutputList {
    pub items: *mut ForeignOutput,
    pub count: usize,
}

impl ForeignOutputList {
    pub const fn empty() -> Self {
        Self {
            items: std::ptr::null_mut(),
            count: 0,
        }
    }
}

/// Receives one log line from the foreign runtime while an invoke is running.
pub type LogFn = unsafe extern "C" fn(message: *const c_char);

pub type InitFn = unsafe extern "C" fn() -> bool;
pub type NewInstanceFn = unsafe extern "C" fn(
    module: *const c_char,
    class_name: *const c_char,
    attributes: *const ForeignAttribute,
    attribute_count: usize,
) -> *mut c_void;
pub type InvokeFn = unsafe extern "C" fn(
    instance: *mut c_void,
    entry_point: *const c_char,
    inputs: *const ForeignInputs,
    outputs: *mut ForeignOutputList,
    log: Option<LogFn>,
) -> bool;
pub type ReleaseInstanceFn = unsafe extern "C" fn(instance: *mut c_void);
/// Copies the last error message into `buffer` (truncated, always NUL-terminated
/// when `capacity > 0`) and returns the full message length in bytes.
pub type LastErrorFn = unsafe extern "C" fn(buffer: *mut c_char, capacity: usize) -> usize;
