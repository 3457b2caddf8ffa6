//! Byte storage with an alignment guarantee suitable for handing to foreign code.

/// Heap bytes backed by `u64` words, so the data pointer is always 8-byte aligned.
///
/// Foreign kernels read tensor data through raw typed pointers; a plain
/// `Vec<u8>` gives no alignment guarantee for that.
#[derive(Clone, Default)]
pub(crate) struct AlignedBuffer {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuffer {
    pub(crate) fn zeroed(len: usize) -> Self {
        let words = len.div_ceil(8);
        Self {
            words: vec![0u64; words],
            len,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: the word vector owns at least `len` initialized bytes, and u8
        // has no alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: same as `as_slice`, and the borrow is unique through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::AlignedBuffer;

    #[test]
    fn pointer_is_word_aligned() {
        let mut buffer = AlignedBuffer::zeroed(3);
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3]);
        assert_eq!(buffer.as_ptr() as usize % 8, 0);
        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
    }
}
