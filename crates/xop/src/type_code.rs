//! Fixed numeric codes identifying element types on every boundary crossing.
//!
//! The values are a wire contract with foreign runtimes and must never be
//! renumbered; gaps (7, 8, 13..17, 19..22) are codes the engine does not use.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::tensor::DType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TypeCode {
    Bool = 0,
    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 9,
    UInt64 = 10,
    Float32 = 11,
    Float64 = 12,
    String = 18,
    /// Any 16-bit float: both fp16 and bfloat16 travel under this code.
    Half = 23,
}

impl TypeCode {
    pub const ALL: [TypeCode; 13] = [
        TypeCode::Bool,
        TypeCode::Int8,
        TypeCode::UInt8,
        TypeCode::Int16,
        TypeCode::UInt16,
        TypeCode::Int32,
        TypeCode::UInt32,
        TypeCode::Int64,
        TypeCode::UInt64,
        TypeCode::Float32,
        TypeCode::Float64,
        TypeCode::String,
        TypeCode::Half,
    ];

    /// Looks up the code for an engine dtype.
    pub fn from_dtype(dtype: DType) -> KernelResult<Self> {
        let code = match dtype {
            DType::Bool => TypeCode::Bool,
            DType::I8 => TypeCode::Int8,
            DType::U8 => TypeCode::UInt8,
            DType::I16 => TypeCode::Int16,
            DType::U16 => TypeCode::UInt16,
            DType::I32 => TypeCode::Int32,
            DType::U32 => TypeCode::UInt32,
            DType::I64 => TypeCode::Int64,
            DType::U64 => TypeCode::UInt64,
            DType::F32 => TypeCode::Float32,
            DType::F64 => TypeCode::Float64,
            DType::String => TypeCode::String,
            DType::F16 | DType::BF16 => TypeCode::Half,
            DType::Complex64 | DType::Complex128 => {
                return Err(KernelError::unsupported_type(format!(
                    "{dtype} has no boundary type code"
                )))
            }
        };
        Ok(code)
    }

    /// Decodes a raw code received from a foreign runtime.
    pub fn from_raw(raw: i32) -> KernelResult<Self> {
        TypeCode::ALL
            .into_iter()
            .find(|code| code.raw() == raw)
            .ok_or_else(|| KernelError::unsupported_type(format!("unknown type code {raw}")))
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    /// The canonical engine dtype for this code. `Half` decodes to fp16.
    pub fn dtype(self) -> DType {
        match self {
            TypeCode::Bool => DType::Bool,
            TypeCode::Int8 => DType::I8,
            TypeCode::UInt8 => DType::U8,
            TypeCode::Int16 => DType::I16,
            TypeCode::UInt16 => DType::U16,
            TypeCode::Int32 => DType::I32,
            TypeCode::UInt32 => DType::U32,
            TypeCode::Int64 => DType::I64,
            TypeCode::UInt64 => DType::U64,
            TypeCode::Float32 => DType::F32,
            TypeCode::Float64 => DType::F64,
            TypeCode::String => DType::String,
            TypeCode::Half => DType::F16,
        }
    }

    /// Whether a tensor of `dtype` may be carried under this code.
    pub fn admits(self, dtype: DType) -> bool {
        TypeCode::from_dtype(dtype).map(|code| code == self).unwrap_or(false)
    }
}

/// Verifies at construction time that every declared dtype can cross the boundary.
pub fn ensure_codes(dtypes: &[DType], what: &str) -> KernelResult<Vec<TypeCode>> {
    dtypes
        .iter()
        .enumerate()
        .map(|(index, &dtype)| {
            TypeCode::from_dtype(dtype).map_err(|_| {
                KernelError::unsupported_type(format!(
                    "{what} {index} has dtype {dtype}, which has no boundary type code"
                ))
            })
        })
        .collect()
}
