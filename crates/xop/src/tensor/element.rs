//! Defines the scalar element trait used for typed access to tensor bytes.

use half::{bf16, f16};

use super::dtype::DType;

/// Scalar types that can be read from and written to a numeric tensor buffer.
///
/// Conversion goes through native-endian byte arrays, so typed access never
/// reinterprets the buffer in place.
pub trait Element: Copy + Send + Sync + 'static {
    /// The dtype a tensor must carry to hold this element type.
    const DTYPE: DType;
    /// Width of one element in bytes.
    const SIZE: usize;

    fn read_ne(bytes: &[u8]) -> Self;

    fn write_ne(self, out: &mut [u8]);
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$ty>::from_ne_bytes(raw)
            }

            fn write_ne(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_element!(i8, DType::I8);
impl_element!(u8, DType::U8);
impl_element!(i16, DType::I16);
impl_element!(u16, DType::U16);
impl_element!(i32, DType::I32);
impl_element!(u32, DType::U32);
impl_element!(i64, DType::I64);
impl_element!(u64, DType::U64);
impl_element!(f32, DType::F32);
impl_element!(f64, DType::F64);
impl_element!(f16, DType::F16);
impl_element!(bf16, DType::BF16);

impl Element for bool {
    const DTYPE: DType = DType::Bool;
    const SIZE: usize = 1;

    fn read_ne(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_ne(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}
