//! Error type shared by every boundary-crossing component.

use thiserror::Error;

use crate::tensor::MemoryLocation;

/// Errors surfaced by foreign kernels, fused kernels, and the transfer registry.
///
/// Messages that originate on the far side of a boundary are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// The bridge library or one of its symbols could not be resolved, or init failed.
    #[error("failed to load foreign bridge: {0}")]
    BridgeLoad(String),
    #[error("failed to create foreign instance {module}.{class_name}: {message}")]
    InstanceCreation {
        module: String,
        class_name: String,
        message: String,
    },
    #[error("foreign entry point '{entry_point}' failed: {message}")]
    Invocation {
        entry_point: String,
        message: String,
    },
    #[error(
        "foreign entry point '{entry_point}' returned {actual} outputs, node declares {expected}"
    )]
    OutputCount {
        entry_point: String,
        expected: usize,
        actual: usize,
    },
    #[error("no data transfer provider can copy from {src} to {dst}")]
    NoTransferProvider {
        src: MemoryLocation,
        dst: MemoryLocation,
    },
    #[error("unsupported element type: {0}")]
    UnsupportedType(String),
    #[error("node '{node}' has no fused function registered")]
    FusedFunctionMissing { node: String },
    #[error("creating fused state for node '{node}' failed with status {status}")]
    StateCreation { node: String, status: i32 },
    #[error("fused compute for node '{node}' failed with status {status}")]
    FusedCompute { node: String, status: i32 },
    #[error("tensor size mismatch: source has {src} elements, destination has {dst}")]
    SizeMismatch { src: usize, dst: usize },
    #[error("{0}")]
    InvalidArgument(String),
}

impl KernelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        KernelError::InvalidArgument(message.into())
    }

    pub fn unsupported_type(message: impl Into<String>) -> Self {
        KernelError::UnsupportedType(message.into())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
