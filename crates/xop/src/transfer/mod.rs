//! Ordered registry of copy providers between memory locations.
//!
//! Providers are consulted in registration order and the first one whose
//! `can_copy` accepts the pair performs the copy. Registrations are expected
//! not to overlap; when they do, the earlier one silently wins and the
//! precedence is otherwise undefined.

mod cpu;

use std::fmt;

use crate::error::{KernelError, KernelResult};
use crate::tensor::{MemoryLocation, Tensor};

pub use cpu::CpuDataTransfer;

/// Identifies a device execution queue (stream) a copy may be ordered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub i32);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

/// Copies tensors between one or more pairs of memory locations.
pub trait DataTransfer: Send + Sync {
    /// Human-readable provider identifier used in logs.
    fn name(&self) -> &str;

    fn can_copy(&self, src: &MemoryLocation, dst: &MemoryLocation) -> bool;

    /// Copies `src` into `dst`. Providers without queue support ignore `queue`
    /// and complete the copy before returning.
    fn copy_tensor(
        &self,
        src: &Tensor,
        dst: &mut Tensor,
        queue: Option<QueueId>,
    ) -> KernelResult<()>;
}

/// Ordered collection of [`DataTransfer`] providers.
///
/// Registration needs `&mut self`, so it can only happen before the manager is
/// shared; afterwards copies only read the provider list.
#[derive(Default)]
pub struct DataTransferManager {
    providers: Vec<Box<dyn DataTransfer>>,
}

impl DataTransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager with the host-to-host provider already registered.
    pub fn with_cpu() -> Self {
        let mut manager = Self::new();
        manager.register(Box::new(CpuDataTransfer));
        manager
    }

    /// Appends a provider; earlier registrations take priority.
    pub fn register(&mut self, provider: Box<dyn DataTransfer>) {
        tracing::debug!(
            provider = provider.name(),
            priority = self.providers.len(),
            "registered data transfer provider"
        );
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// First registered provider accepting the pair.
    pub fn provider_for(
        &self,
        src: &MemoryLocation,
        dst: &MemoryLocation,
    ) -> Option<&dyn DataTransfer> {
        self.providers
            .iter()
            .find(|provider| provider.can_copy(src, dst))
            .map(|provider| &**provider)
    }

    pub fn copy_tensor(&self, src: &Tensor, dst: &mut Tensor) -> KernelResult<()> {
        self.dispatch(src, dst, None)
    }

    pub fn copy_tensor_on_queue(
        &self,
        src: &Tensor,
        dst: &mut Tensor,
        queue: QueueId,
    ) -> KernelResult<()> {
        self.dispatch(src, dst, Some(queue))
    }

    fn dispatch(&self, src: &Tensor, dst: &mut Tensor, queue: Option<QueueId>) -> KernelResult<()> {
        if src.len() != dst.len() {
            return Err(KernelError::SizeMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        let (from, to) = (src.location(), dst.location());
        let Some(provider) = self.provider_for(&from, &to) else {
            tracing::warn!(src = %from, dst = %to, "no data transfer provider");
            return Err(KernelError::NoTransferProvider { src: from, dst: to });
        };
        tracing::trace!(
            provider = provider.name(),
            src = %from,
            dst = %to,
            queue = ?queue,
            elements = src.len(),
            "copy tensor"
        );
        provider.copy_tensor(src, dst, queue)
    }
}

impl fmt::Debug for DataTransferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|provider| provider.name()))
            .finish()
    }
}
