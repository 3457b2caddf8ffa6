//! Reference foreign runtime for the xop bridge.
//!
//! Exports the five bridge entry points and serves two classes from any module:
//! `Identity` returns copies of its inputs and `Scale` multiplies float32
//! inputs by its `factor` attribute. Both answer `compute` and `shape_infer`.
//! Build as a cdylib and point `XOP_BRIDGE_LIBRARY` at it, or attach in-process
//! through [`bridge_symbols`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::sync::atomic::{AtomicBool, Ordering};

use xop::bridge::abi::{ForeignAttribute, ForeignInputs, ForeignOutput, ForeignOutputList, LogFn};
use xop::{BridgeSymbols, TypeCode};

pub const COMPUTE: &str = "compute";
pub const SHAPE_INFER: &str = "shape_infer";

static INITIALIZED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_error(message: impl Into<String>) {
    let message = CString::new(message.into().replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// The exported entry points as a symbol table for `Bridge::from_symbols`.
pub fn bridge_symbols() -> BridgeSymbols {
    BridgeSymbols {
        init: Initialize,
        new_instance: NewInstance,
        invoke: InvokePythonFunc,
        release_instance: ReleaseInstance,
        last_error: GetLastErrorMessage,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Class {
    Identity,
    Scale(f32),
}

#[derive(Debug)]
struct Instance {
    class_name: String,
    class: Class,
}

impl Instance {
    fn create(
        module: &str,
        class_name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<Self, String> {
        let class = match class_name {
            "Identity" => Class::Identity,
            "Scale" => {
                let raw = attributes
                    .get("factor")
                    .ok_or_else(|| "Scale requires a 'factor' attribute".to_string())?;
                let factor = raw
                    .trim()
                    .parse::<f32>()
                    .map_err(|err| format!("invalid factor {raw:?}: {err}"))?;
                Class::Scale(factor)
            }
            other => return Err(format!("module '{module}' has no class '{other}'")),
        };
        Ok(Self {
            class_name: class_name.to_string(),
            class,
        })
    }

    fn invoke(
        &self,
        entry_point: &str,
        inputs: &[InputTensor<'_>],
    ) -> Result<Vec<OwnedOutput>, String> {
        match entry_point {
            COMPUTE => inputs.iter().map(|input| self.compute_one(input)).collect(),
            SHAPE_INFER => Ok(inputs.iter().map(InputTensor::shape_output).collect()),
            other => Err(format!("'{}' has no entry point '{other}'", self.class_name)),
        }
    }

    fn compute_one(&self, input: &InputTensor<'_>) -> Result<OwnedOutput, String> {
        match self.class {
            Class::Identity => input.copy_output(),
            Class::Scale(factor) => {
                if input.type_code != TypeCode::Float32 {
                    return Err(format!(
                        "Scale only accepts float32 inputs, got {:?}",
                        input.type_code
                    ));
                }
                let mut output = input.copy_output()?;
                output.scale_f32(factor);
                Ok(output)
            }
        }
    }
}

struct InputTensor<'a> {
    data: *const c_void,
    type_code: TypeCode,
    dims: &'a [i64],
}

impl InputTensor<'_> {
    fn element_count(&self) -> usize {
        self.dims.iter().map(|&d| d.max(0) as usize).product()
    }

    fn copy_output(&self) -> Result<OwnedOutput, String> {
        let count = self.element_count();
        let mut output = OwnedOutput::new(self.type_code, self.dims)?;
        if count == 0 || self.data.is_null() {
            return Ok(output);
        }
        match self.type_code.dtype().size_in_bytes() {
            Some(size) => {
                // SAFETY: numeric inputs hold `count * size` bytes.
                let bytes =
                    unsafe { std::slice::from_raw_parts(self.data as *const u8, count * size) };
                output.data = malloc_copy(bytes)? as *mut c_void;
            }
            None => {
                // SAFETY: string inputs hold `count` NUL-terminated pointers.
                let strings = unsafe {
                    std::slice::from_raw_parts(self.data as *const *const c_char, count)
                };
                let copies = strings
                    .iter()
                    .map(|&s| {
                        if s.is_null() {
                            std::ptr::null_mut()
                        } else {
                            // SAFETY: each element is a valid C string during the call.
                            unsafe { libc::strdup(s) }
                        }
                    })
                    .collect::<Vec<_>>();
                output.data = malloc_copy(&copies)? as *mut c_void;
                output.strings = copies.len();
            }
        }
        Ok(output)
    }

    fn shape_output(&self) -> OwnedOutput {
        let mut output = OwnedOutput {
            data: std::ptr::null_mut(),
            type_code: TypeCode::Int64,
            element_size: 8,
            dims: std::ptr::null_mut(),
            rank: 0,
            strings: 0,
        };
        if let Ok(dims) = malloc_copy(&[self.dims.len() as i64]) {
            output.dims = dims;
            output.rank = 1;
        }
        if let Ok(data) = malloc_copy(self.dims) {
            output.data = data as *mut c_void;
        }
        output
    }
}

/// An output under construction; freed on drop unless handed to the engine.
struct OwnedOutput {
    data: *mut c_void,
    type_code: TypeCode,
    element_size: i64,
    dims: *mut i64,
    rank: usize,
    strings: usize,
}

impl OwnedOutput {
    fn new(type_code: TypeCode, dims: &[i64]) -> Result<Self, String> {
        Ok(Self {
            data: std::ptr::null_mut(),
            type_code,
            element_size: type_code.dtype().size_in_bytes().unwrap_or(0) as i64,
            dims: malloc_copy(dims)?,
            rank: dims.len(),
            strings: 0,
        })
    }

    fn scale_f32(&mut self, factor: f32) {
        let count = (self.element_size.max(0) as usize)
            .checked_mul(self.dims().iter().map(|&d| d.max(0) as usize).product())
            .unwrap_or(0)
            / 4;
        if self.data.is_null() || count == 0 {
            return;
        }
        // SAFETY: the buffer was just allocated with `count` f32 values.
        let values = unsafe { std::slice::from_raw_parts_mut(self.data as *mut f32, count) };
        for value in values {
            *value *= factor;
        }
    }

    fn dims(&self) -> &[i64] {
        if self.dims.is_null() {
            return &[];
        }
        // SAFETY: dims holds `rank` values.
        unsafe { std::slice::from_raw_parts(self.dims, self.rank) }
    }

    fn into_raw(self) -> ForeignOutput {
        let raw = ForeignOutput {
            data: self.data,
            type_code: self.type_code.raw(),
            element_size: self.element_size,
            dims: self.dims,
            rank: self.rank,
        };
        std::mem::forget(self);
        raw
    }
}

impl Drop for OwnedOutput {
    fn drop(&mut self) {
        // SAFETY: every pointer here was malloc'd by this runtime and is not shared.
        unsafe {
            if self.strings > 0 && !self.data.is_null() {
                let strings = self.data as *mut *mut c_char;
                for i in 0..self.strings {
                    libc::free(*strings.add(i) as *mut c_void);
                }
            }
            libc::free(self.data);
            libc::free(self.dims as *mut c_void);
        }
    }
}

fn malloc_copy<T: Copy>(values: &[T]) -> Result<*mut T, String> {
    if values.is_empty() {
        return Ok(std::ptr::null_mut());
    }
    let bytes = std::mem::size_of_val(values);
    // SAFETY: malloc with a non-zero size; the copy stays within both buffers.
    unsafe {
        let ptr = libc::malloc(bytes) as *mut T;
        if ptr.is_null() {
            return Err(format!("out of memory allocating {bytes} bytes"));
        }
        std::ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len());
        Ok(ptr)
    }
}

unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{what} is null"));
    }
    // SAFETY: the caller passes a NUL-terminated string.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| format!("{what} is not valid UTF-8"))
}

unsafe fn read_inputs<'a>(inputs: *const ForeignInputs) -> Result<Vec<InputTensor<'a>>, String> {
    // SAFETY: the engine passes a valid input block, or null for none.
    let Some(inputs) = (unsafe { inputs.as_ref() }) else {
        return Ok(Vec::new());
    };
    (0..inputs.count)
        .map(|i| {
            // SAFETY: all four arrays hold `count` entries.
            let (data, code, dims, rank) = unsafe {
                (
                    *inputs.data.add(i),
                    *inputs.type_codes.add(i),
                    *inputs.dims.add(i),
                    *inputs.ranks.add(i),
                )
            };
            let type_code = TypeCode::from_raw(code).map_err(|err| format!("input {i}: {err}"))?;
            let dims = if rank == 0 || dims.is_null() {
                &[][..]
            } else {
                // SAFETY: dims[i] holds ranks[i] values.
                unsafe { std::slice::from_raw_parts(dims, rank) }
            };
            Ok(InputTensor { data, type_code, dims })
        })
        .collect()
}

fn emit_log(log: Option<LogFn>, message: &str) {
    let (Some(log), Ok(message)) = (log, CString::new(message)) else {
        return;
    };
    // SAFETY: the engine's log callback accepts a NUL-terminated string valid for the call.
    unsafe { log(message.as_ptr()) };
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn Initialize() -> bool {
    INITIALIZED.store(true, Ordering::SeqCst);
    true
}

/// # Safety
/// String arguments must be NUL-terminated; `attributes` must hold `attribute_count` entries.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn NewInstance(
    module: *const c_char,
    class_name: *const c_char,
    attributes: *const ForeignAttribute,
    attribute_count: usize,
) -> *mut c_void {
    let created = (|| {
        if !INITIALIZED.load(Ordering::SeqCst) {
            return Err("runtime is not initialized".to_string());
        }
        // SAFETY: forwarded from this function's contract.
        let module = unsafe { c_str(module, "module name") }?;
        let class_name = unsafe { c_str(class_name, "class name") }?;
        let mut attrs = HashMap::with_capacity(attribute_count);
        if attribute_count > 0 && !attributes.is_null() {
            // SAFETY: forwarded from this function's contract.
            for attr in unsafe { std::slice::from_raw_parts(attributes, attribute_count) } {
                let key = unsafe { c_str(attr.key, "attribute key") }?;
                let value = unsafe { c_str(attr.value, "attribute value") }?;
                attrs.insert(key.to_string(), value.to_string());
            }
        }
        Instance::create(module, class_name, &attrs)
    })();
    match created {
        Ok(instance) => Box::into_raw(Box::new(instance)) as *mut c_void,
        Err(message) => {
            set_error(message);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `instance` must come from [`NewInstance`]; `inputs` must follow the bridge ABI and
/// `outputs` must be writable.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn InvokePythonFunc(
    instance: *mut c_void,
    entry_point: *const c_char,
    inputs: *const ForeignInputs,
    outputs: *mut ForeignOutputList,
    log: Option<LogFn>,
) -> bool {
    let produced = (|| {
        // SAFETY: forwarded from this function's contract.
        let instance = unsafe { (instance as *const Instance).as_ref() }
            .ok_or_else(|| "instance is null".to_string())?;
        let entry_point = unsafe { c_str(entry_point, "entry point") }?;
        let inputs = unsafe { read_inputs(inputs) }?;
        emit_log(
            log,
            &format!("{}.{entry_point}: {} inputs", instance.class_name, inputs.len()),
        );
        instance.invoke(entry_point, &inputs)
    })();
    let produced = match produced {
        Ok(produced) => produced,
        Err(message) => {
            set_error(message);
            return false;
        }
    };
    // SAFETY: forwarded from this function's contract.
    let Some(outputs) = (unsafe { outputs.as_mut() }) else {
        set_error("output list is null");
        return false;
    };
    let count = produced.len();
    let items = if count == 0 {
        std::ptr::null_mut()
    } else {
        // SAFETY: non-zero allocation of `count` records.
        let items = unsafe { libc::malloc(count * std::mem::size_of::<ForeignOutput>()) }
            as *mut ForeignOutput;
        if items.is_null() {
            set_error("out of memory allocating output list");
            return false;
        }
        for (i, output) in produced.into_iter().enumerate() {
            // SAFETY: `items` has room for `count` records.
            unsafe { items.add(i).write(output.into_raw()) };
        }
        items
    };
    *outputs = ForeignOutputList { items, count };
    true
}

/// # Safety
/// `instance` must come from [`NewInstance`] and not have been released.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn ReleaseInstance(instance: *mut c_void) {
    if !instance.is_null() {
        // SAFETY: forwarded from this function's contract.
        drop(unsafe { Box::from_raw(instance as *mut Instance) });
    }
}

/// # Safety
/// `buffer` must have room for `capacity` bytes, or be null with `capacity == 0`.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn GetLastErrorMessage(buffer: *mut c_char, capacity: usize) -> usize {
    LAST_ERROR.with(|slot| {
        let slot = slot.borrow();
        let Some(message) = slot.as_ref() else {
            return 0;
        };
        let bytes = message.as_bytes();
        if !buffer.is_null() && capacity > 0 {
            let written = bytes.len().min(capacity - 1);
            // SAFETY: `written + 1 <= capacity`.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buffer, written);
                *buffer.add(written) = 0;
            }
        }
        bytes.len()
    })
}
