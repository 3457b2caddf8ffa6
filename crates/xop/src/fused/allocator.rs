//! Host allocators exposed to fused functions through raw callbacks.

use std::alloc::{self, Layout};
use std::fmt;

/// Host-memory allocator a fused function can reach through its compute context.
pub trait HostAllocator: Send + Sync {
    fn name(&self) -> &str;

    /// Returns null when the request cannot be satisfied.
    fn allocate(&self, size: usize, alignment: usize) -> *mut u8;

    /// Releases a pointer previously returned by [`HostAllocator::allocate`]. Null is ignored.
    fn release(&self, ptr: *mut u8);
}

/// Global-allocator backed host allocator.
///
/// Each block carries a header in front of the returned pointer recording the
/// layout, so `release` does not need the caller to repeat the size.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuAllocator;

const MIN_ALIGNMENT: usize = 16;
const HEADER_WORDS: usize = 2;

impl CpuAllocator {
    pub fn new() -> Self {
        Self
    }

    fn header_len(alignment: usize) -> usize {
        let header = HEADER_WORDS * std::mem::size_of::<usize>();
        header.div_ceil(alignment) * alignment
    }
}

impl HostAllocator for CpuAllocator {
    fn name(&self) -> &str {
        "cpu"
    }

    fn allocate(&self, size: usize, alignment: usize) -> *mut u8 {
        let alignment = alignment.max(MIN_ALIGNMENT);
        if !alignment.is_power_of_two() {
            return std::ptr::null_mut();
        }
        let header = Self::header_len(alignment);
        let Some(total) = size.checked_add(header) else {
            return std::ptr::null_mut();
        };
        let Ok(layout) = Layout::from_size_align(total, alignment) else {
            return std::ptr::null_mut();
        };
        // SAFETY: layout has non-zero size because the header is never empty.
        let base = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            return base;
        }
        // SAFETY: header >= 2 words, so both writes stay inside the block and are usize-aligned.
        unsafe {
            let user = base.add(header);
            let words = user as *mut usize;
            words.sub(1).write(total);
            words.sub(2).write(alignment);
            user
        }
    }

    fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: ptr came from `allocate`, which stored the block layout in the
        // two words before it.
        unsafe {
            let words = ptr as *mut usize;
            let total = words.sub(1).read();
            let alignment = words.sub(2).read();
            let header = Self::header_len(alignment);
            let layout = Layout::from_size_align_unchecked(total, alignment);
            alloc::dealloc(ptr.sub(header), layout);
        }
    }
}

impl fmt::Debug for dyn HostAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAllocator")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honours_requested_alignment() {
        let allocator = CpuAllocator::new();
        for alignment in [1usize, 8, 64, 256] {
            let ptr = allocator.allocate(100, alignment);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % alignment.max(MIN_ALIGNMENT), 0);
            unsafe { ptr.write_bytes(0xAB, 100) };
            allocator.release(ptr);
        }
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        assert!(CpuAllocator::new().allocate(8, 24).is_null());
    }
}
