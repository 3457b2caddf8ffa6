//! Non-owning input views and owned foreign outputs for one boundary call.

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::raw::{c_char, c_void};

use super::abi::{ForeignInputs, ForeignOutput, ForeignOutputList};
use crate::error::{KernelError, KernelResult};
use crate::tensor::{Shape, Tensor};
use crate::type_code::TypeCode;

/// Non-owning descriptor of an engine tensor crossing the boundary: pointer, type code, shape.
pub struct TensorView<'a> {
    data: *const c_void,
    type_code: TypeCode,
    dims: Vec<i64>,
    // Keeps the C string copies alive for string tensors; `data` points at `pointers`.
    strings: Option<(Vec<CString>, Vec<*const c_char>)>,
    _tensor: PhantomData<&'a Tensor>,
}

impl<'a> TensorView<'a> {
    pub fn of(tensor: &'a Tensor) -> KernelResult<Self> {
        let type_code = TypeCode::from_dtype(tensor.dtype())?;
        let dims = tensor.shape().to_foreign();
        if type_code != TypeCode::String {
            return Ok(Self {
                data: tensor.data_ptr() as *const c_void,
                type_code,
                dims,
                strings: None,
                _tensor: PhantomData,
            });
        }

        let owned = tensor
            .strings()?
            .iter()
            .map(|value| {
                CString::new(value.as_str()).map_err(|_| {
                    KernelError::invalid("string tensor element contains an interior NUL byte")
                })
            })
            .collect::<KernelResult<Vec<_>>>()?;
        let pointers: Vec<*const c_char> = owned.iter().map(|s| s.as_ptr()).collect();
        Ok(Self {
            data: pointers.as_ptr() as *const c_void,
            type_code,
            dims,
            strings: Some((owned, pointers)),
            _tensor: PhantomData,
        })
    }

    pub fn data(&self) -> *const c_void {
        self.data
    }

    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }
}

/// Every input of a call, flattened into the parallel arrays the ABI expects.
pub struct InputViews<'a> {
    views: Vec<TensorView<'a>>,
    data: Vec<*const c_void>,
    type_codes: Vec<i32>,
    dims: Vec<*const i64>,
    ranks: Vec<usize>,
}

impl<'a> InputViews<'a> {
    pub fn gather(tensors: &'a [Tensor]) -> KernelResult<Self> {
        let views = tensors
            .iter()
            .enumerate()
            .map(|(index, tensor)| {
                TensorView::of(tensor).map_err(|err| match err {
                    KernelError::UnsupportedType(message) => {
                        KernelError::UnsupportedType(format!("input {index}: {message}"))
                    }
                    other => other,
                })
            })
            .collect::<KernelResult<Vec<_>>>()?;
        let data = views.iter().map(TensorView::data).collect();
        let type_codes = views.iter().map(|v| v.type_code().raw()).collect();
        let dims = views.iter().map(|v| v.dims.as_ptr()).collect();
        let ranks = views.iter().map(|v| v.dims.len()).collect();
        Ok(Self {
            views,
            data,
            type_codes,
            dims,
            ranks,
        })
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Raw parallel-array form; valid while `self` is alive and unmoved-from.
    pub fn as_raw(&self) -> ForeignInputs {
        ForeignInputs {
            data: self.data.as_ptr(),
            type_codes: self.type_codes.as_ptr(),
            dims: self.dims.as_ptr(),
            ranks: self.ranks.as_ptr(),
            count: self.views.len(),
        }
    }
}

/// Owns the buffers one successful invoke returned; frees each of them exactly once.
///
/// [`release`](Self::release) frees one output's payload as soon as it has been
/// consumed. Whatever is still held when the value drops, including the record
/// array itself, is freed then.
pub struct ForeignOutputs {
    items: *mut ForeignOutput,
    count: usize,
}

// SAFETY: the buffers are plain malloc'd memory owned exclusively by this value.
unsafe impl Send for ForeignOutputs {}

impl ForeignOutputs {
    /// Takes ownership of a list filled in by a successful invoke.
    ///
    /// # Safety
    /// `list` must follow the ownership rules in [`super::abi`]: every non-null
    /// pointer malloc'd, dims holding `rank` values, and nothing else owning them.
    pub(crate) unsafe fn from_raw(list: ForeignOutputList) -> Self {
        let count = if list.items.is_null() { 0 } else { list.count };
        Self {
            items: list.items,
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<ForeignOutputRef<'_>> {
        if index >= self.count {
            return None;
        }
        // SAFETY: index is in bounds of the malloc'd array of `count` records.
        let raw = unsafe { &*self.items.add(index) };
        Some(ForeignOutputRef { raw, index })
    }

    pub fn iter(&self) -> impl Iterator<Item = ForeignOutputRef<'_>> {
        (0..self.count).filter_map(|index| self.get(index))
    }

    /// Frees the payload of output `index` now and leaves an empty record behind.
    pub(crate) fn release(&mut self, index: usize) {
        if index >= self.count {
            return;
        }
        // SAFETY: index is in bounds and no `ForeignOutputRef` outlives `&mut self`.
        let record = unsafe { &mut *self.items.add(index) };
        release_payload(record);
        record.data = std::ptr::null_mut();
        record.dims = std::ptr::null_mut();
        record.rank = 0;
    }
}

impl Drop for ForeignOutputs {
    fn drop(&mut self) {
        for index in 0..self.count {
            self.release(index);
        }
        if !self.items.is_null() {
            // SAFETY: the record array was malloc'd by the foreign side and is freed once here.
            unsafe { release_foreign(self.items as *mut c_void) };
            self.items = std::ptr::null_mut();
            self.count = 0;
        }
    }
}

fn release_payload(raw: &ForeignOutput) {
    if raw.type_code == TypeCode::String.raw() && !raw.data.is_null() {
        let count = if raw.dims.is_null() || raw.rank == 0 {
            1
        } else {
            // SAFETY: a non-null `dims` holds `rank` values.
            let dims = unsafe { std::slice::from_raw_parts(raw.dims, raw.rank) };
            dims.iter()
                .try_fold(1usize, |acc, &d| {
                    usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
                })
                .unwrap_or(0)
        };
        let pointers = raw.data as *mut *mut c_char;
        for i in 0..count {
            // SAFETY: each element is null or a malloc'd string owned by this output.
            unsafe { release_foreign(*pointers.add(i) as *mut c_void) };
        }
    }
    // SAFETY: data and dims are malloc'd or null, and owned by this output.
    unsafe {
        release_foreign(raw.data);
        release_foreign(raw.dims as *mut c_void);
    }
}

/// Frees one buffer the foreign side allocated. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live `malloc` allocation that nothing else frees.
unsafe fn release_foreign(ptr: *mut c_void) {
    #[cfg(test)]
    released::record(ptr);
    libc::free(ptr);
}

#[cfg(test)]
mod released {
    use std::cell::RefCell;
    use std::os::raw::c_void;

    thread_local! {
        static FREED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    pub(crate) fn record(ptr: *mut c_void) {
        if !ptr.is_null() {
            FREED.with(|freed| freed.borrow_mut().push(ptr as usize));
        }
    }

    /// Addresses freed on this thread since the last call, sorted.
    pub(crate) fn take() -> Vec<usize> {
        let mut freed = FREED.with(|freed| std::mem::take(&mut *freed.borrow_mut()));
        freed.sort_unstable();
        freed
    }
}

/// Borrowed view of one foreign output record.
pub struct ForeignOutputRef<'a> {
    raw: &'a ForeignOutput,
    index: usize,
}

impl<'a> ForeignOutputRef<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn raw_type_code(&self) -> i32 {
        self.raw.type_code
    }

    pub fn element_size(&self) -> i64 {
        self.raw.element_size
    }

    pub fn data(&self) -> *const c_void {
        self.raw.data
    }

    pub fn dims(&self) -> &'a [i64] {
        if self.raw.dims.is_null() || self.raw.rank == 0 {
            return &[];
        }
        // SAFETY: the foreign side guarantees `dims` holds `rank` values.
        unsafe { std::slice::from_raw_parts(self.raw.dims, self.raw.rank) }
    }

    pub fn shape(&self) -> KernelResult<Shape> {
        Shape::from_foreign(self.dims())
    }

    /// Authoritative payload size: `element_size * product(dims)`.
    pub fn byte_len(&self) -> KernelResult<usize> {
        let element_size = usize::try_from(self.raw.element_size).map_err(|_| {
            KernelError::invalid(format!(
                "output {} reports negative element size {}",
                self.index, self.raw.element_size
            ))
        })?;
        self.element_count()?
            .checked_mul(element_size)
            .ok_or_else(|| KernelError::invalid(format!("output {} size overflows", self.index)))
    }

    pub fn element_count(&self) -> KernelResult<usize> {
        self.shape()?.checked_num_elements().ok_or_else(|| {
            KernelError::invalid(format!("output {} element count overflows", self.index))
        })
    }

    pub fn bytes(&self) -> KernelResult<&'a [u8]> {
        let len = self.byte_len()?;
        if len == 0 {
            return Ok(&[]);
        }
        if self.raw.data.is_null() {
            return Err(KernelError::invalid(format!(
                "output {} reports {len} bytes but has no buffer",
                self.index
            )));
        }
        // SAFETY: the foreign side allocated `element_size * product(dims)` bytes at `data`.
        Ok(unsafe { std::slice::from_raw_parts(self.raw.data as *const u8, len) })
    }

    /// Reads a string output. Null elements decode as empty strings.
    pub fn strings(&self) -> KernelResult<Vec<String>> {
        let count = self.element_count()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        if self.raw.data.is_null() {
            return Err(KernelError::invalid(format!(
                "string output {} has no buffer",
                self.index
            )));
        }
        let pointers = self.raw.data as *const *const c_char;
        (0..count)
            .map(|i| {
                // SAFETY: string outputs hold `count` C string pointers.
                let ptr = unsafe { *pointers.add(i) };
                if ptr.is_null() {
                    return Ok(String::new());
                }
                // SAFETY: non-null elements are NUL-terminated strings.
                let value = unsafe { CStr::from_ptr(ptr) };
                value.to_str().map(str::to_owned).map_err(|_| {
                    KernelError::invalid(format!(
                        "string output {} element {i} is not valid UTF-8",
                        self.index
                    ))
                })
            })
            .collect()
    }

    /// Interprets the payload as `i64` dims, the encoding shape inference uses.
    ///
    /// The number of values is `dims[0]`.
    pub fn shape_payload(&self) -> KernelResult<Shape> {
        let count = *self.dims().first().ok_or_else(|| {
            KernelError::invalid(format!(
                "shape inference output {} carries no dimension count",
                self.index
            ))
        })?;
        let count = usize::try_from(count).map_err(|_| {
            KernelError::invalid(format!(
                "shape inference output {} has negative rank {count}",
                self.index
            ))
        })?;
        if count == 0 {
            return Ok(Shape::scalar());
        }
        if self.raw.data.is_null() {
            return Err(KernelError::invalid(format!(
                "shape inference output {} has no buffer",
                self.index
            )));
        }
        // SAFETY: shape inference outputs hold `dims[0]` i64 values.
        let values = unsafe { std::slice::from_raw_parts(self.raw.data as *const i64, count) };
        Shape::from_foreign(values)
    }
}
