//! Engine-side tensor abstractions consumed by every kernel in this crate.
//!
//! Tensors own their buffers outright (no reference counting); the memory
//! location travels with the tensor so the transfer registry can route copies.

mod buffer;
pub mod dtype;
mod element;
mod host_tensor;
pub mod location;
pub mod shape;

pub use dtype::DType;
pub use element::Element;
pub use host_tensor::Tensor;
pub use location::{DeviceKind, MemType, MemoryLocation};
pub use shape::Shape;
