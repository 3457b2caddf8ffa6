//! Memory locations tensors can live in.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Distinguishes allocations on the same device that need different copy paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemType {
    #[default]
    Default,
    /// Page-locked host memory reachable by an accelerator.
    HostPinned,
}

/// Where a tensor's buffer lives: device kind, memory type, and device ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryLocation {
    pub device: DeviceKind,
    pub mem_type: MemType,
    pub ordinal: i16,
}

impl MemoryLocation {
    pub const fn new(device: DeviceKind, mem_type: MemType, ordinal: i16) -> Self {
        Self {
            device,
            mem_type,
            ordinal,
        }
    }

    /// Ordinary host memory.
    pub const fn host() -> Self {
        Self::new(DeviceKind::Cpu, MemType::Default, 0)
    }

    pub const fn host_pinned() -> Self {
        Self::new(DeviceKind::Cpu, MemType::HostPinned, 0)
    }

    pub const fn gpu(ordinal: i16) -> Self {
        Self::new(DeviceKind::Gpu, MemType::Default, ordinal)
    }

    pub fn is_host(&self) -> bool {
        self.device == DeviceKind::Cpu
    }
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = match self.device {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Gpu => "gpu",
        };
        match self.mem_type {
            MemType::Default => write!(f, "{device}:{}", self.ordinal),
            MemType::HostPinned => write!(f, "{device}:{}(pinned)", self.ordinal),
        }
    }
}
