//! Engine-owned tensor: dtype, shape, memory location, and a single-owner buffer.

use super::buffer::AlignedBuffer;
use super::dtype::DType;
use super::element::Element;
use super::location::MemoryLocation;
use super::shape::Shape;
use crate::error::{KernelError, KernelResult};

/// Backing storage for a tensor. Numeric dtypes share one byte layout; strings are owned values.
#[derive(Debug, Clone)]
enum Storage {
    Bytes(AlignedBuffer),
    Strings(Vec<String>),
}

/// Engine-owned tensor handed to and produced by kernels.
#[derive(Debug, Clone)]
pub struct Tensor {
    dtype: DType,
    shape: Shape,
    location: MemoryLocation,
    storage: Storage,
}

impl Tensor {
    /// Allocates a zero-filled tensor (empty strings for string dtype).
    pub fn zeros(dtype: DType, shape: Shape, location: MemoryLocation) -> KernelResult<Self> {
        let elements = shape.checked_num_elements().ok_or_else(|| {
            KernelError::invalid(format!("element count of shape {shape} overflows"))
        })?;
        let storage = match dtype.size_in_bytes() {
            Some(size) => {
                let bytes = elements.checked_mul(size).ok_or_else(|| {
                    KernelError::invalid(format!("byte size of {dtype} tensor {shape} overflows"))
                })?;
                Storage::Bytes(AlignedBuffer::zeroed(bytes))
            }
            None => Storage::Strings(vec![String::new(); elements]),
        };
        Ok(Tensor {
            dtype,
            shape,
            location,
            storage,
        })
    }

    /// Constructs a host tensor from typed values, validating the length against the shape.
    pub fn from_vec<T: Element>(shape: Shape, data: Vec<T>) -> KernelResult<Self> {
        if data.len() != shape.num_elements() {
            return Err(KernelError::invalid(format!(
                "tensor data length ({}) does not match shape {shape}",
                data.len()
            )));
        }
        let mut buffer = AlignedBuffer::zeroed(data.len() * T::SIZE);
        for (value, chunk) in data
            .into_iter()
            .zip(buffer.as_mut_slice().chunks_exact_mut(T::SIZE))
        {
            value.write_ne(chunk);
        }
        Ok(Tensor {
            dtype: T::DTYPE,
            shape,
            location: MemoryLocation::host(),
            storage: Storage::Bytes(buffer),
        })
    }

    /// Constructs a host string tensor.
    pub fn from_strings(shape: Shape, data: Vec<String>) -> KernelResult<Self> {
        if data.len() != shape.num_elements() {
            return Err(KernelError::invalid(format!(
                "string tensor length ({}) does not match shape {shape}",
                data.len()
            )));
        }
        Ok(Tensor {
            dtype: DType::String,
            shape,
            location: MemoryLocation::host(),
            storage: Storage::Strings(data),
        })
    }

    /// Returns the same tensor tagged with a different memory location.
    pub fn with_location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the numeric payload in bytes; string tensors report zero.
    pub fn byte_len(&self) -> usize {
        match &self.storage {
            Storage::Bytes(buffer) => buffer.len(),
            Storage::Strings(_) => 0,
        }
    }

    pub fn bytes(&self) -> KernelResult<&[u8]> {
        match &self.storage {
            Storage::Bytes(buffer) => Ok(buffer.as_slice()),
            Storage::Strings(_) => Err(KernelError::invalid(
                "string tensor has no contiguous byte payload",
            )),
        }
    }

    pub fn bytes_mut(&mut self) -> KernelResult<&mut [u8]> {
        match &mut self.storage {
            Storage::Bytes(buffer) => Ok(buffer.as_mut_slice()),
            Storage::Strings(_) => Err(KernelError::invalid(
                "string tensor has no contiguous byte payload",
            )),
        }
    }

    pub fn strings(&self) -> KernelResult<&[String]> {
        match &self.storage {
            Storage::Strings(values) => Ok(values),
            Storage::Bytes(_) => Err(KernelError::invalid(format!(
                "{} tensor does not hold strings",
                self.dtype
            ))),
        }
    }

    pub fn strings_mut(&mut self) -> KernelResult<&mut [String]> {
        let dtype = self.dtype;
        match &mut self.storage {
            Storage::Strings(values) => Ok(values),
            Storage::Bytes(_) => Err(KernelError::invalid(format!(
                "{dtype} tensor does not hold strings"
            ))),
        }
    }

    /// Copies the elements out as typed values, checking the dtype first.
    pub fn to_vec<T: Element>(&self) -> KernelResult<Vec<T>> {
        if self.dtype != T::DTYPE {
            return Err(KernelError::invalid(format!(
                "tensor holds {} but {} was requested",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .bytes()?
            .chunks_exact(T::SIZE)
            .map(T::read_ne)
            .collect())
    }

    /// Raw pointer to the numeric payload, or null for string tensors.
    pub(crate) fn data_ptr(&self) -> *const u8 {
        match &self.storage {
            Storage::Bytes(buffer) => buffer.as_ptr(),
            Storage::Strings(_) => std::ptr::null(),
        }
    }

    pub(crate) fn data_mut_ptr(&mut self) -> *mut u8 {
        match &mut self.storage {
            Storage::Bytes(buffer) => buffer.as_mut_ptr(),
            Storage::Strings(_) => std::ptr::null_mut(),
        }
    }
}
