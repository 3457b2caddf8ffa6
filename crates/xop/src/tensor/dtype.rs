//! Enumerates the scalar element types the engine can hold in a tensor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared by engine tensors and kernel metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// 16-bit floating point with full mantissa (fp16).
    F16,
    /// 16-bit bfloat16 precision as used by many accelerators.
    BF16,
    F32,
    F64,
    /// Variable-length UTF-8 strings, one per element.
    String,
    /// Pair of f32 values. Held by the engine but never crosses a foreign boundary.
    Complex64,
    /// Pair of f64 values. Held by the engine but never crosses a foreign boundary.
    Complex128,
}

impl DType {
    /// Every dtype the engine supports, in declaration order.
    pub const ALL: [DType; 16] = [
        DType::Bool,
        DType::I8,
        DType::U8,
        DType::I16,
        DType::U16,
        DType::I32,
        DType::U32,
        DType::I64,
        DType::U64,
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
        DType::String,
        DType::Complex64,
        DType::Complex128,
    ];

    /// Returns the number of bytes per scalar element.
    ///
    /// Strings have no fixed element size and return `None`.
    pub fn size_in_bytes(self) -> Option<usize> {
        match self {
            DType::Bool | DType::I8 | DType::U8 => Some(1),
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 => Some(2),
            DType::I32 | DType::U32 | DType::F32 => Some(4),
            DType::I64 | DType::U64 | DType::F64 | DType::Complex64 => Some(8),
            DType::Complex128 => Some(16),
            DType::String => None,
        }
    }

    pub fn is_string(self) -> bool {
        matches!(self, DType::String)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I8 => "i8",
            DType::U8 => "u8",
            DType::I16 => "i16",
            DType::U16 => "u16",
            DType::I32 => "i32",
            DType::U32 => "u32",
            DType::I64 => "i64",
            DType::U64 => "u64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::String => "string",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
