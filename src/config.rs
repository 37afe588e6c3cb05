//! Compile-time parameters and the alignment helper shared across the
//! allocator's modules.

use std::sync::OnceLock;

/// Every descriptor size and every payload size is rounded up to this unit.
pub(crate) const ALIGNMENT: usize = 8;

/// Requests (payload + header) at or above this size are satisfied by
/// `mmap` instead of `sbrk` under `alloc`/`resize`.
pub(crate) const MMAP_THRESHOLD: usize = 128 * 1024;

/// The first `sbrk`-backed request preallocates this much arena in one
/// syscall and carves the requested size off of it.
pub(crate) const PREALLOC_SIZE: usize = 128 * 1024;

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
pub(crate) const fn align_up(n: usize) -> usize {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

/// The kernel page size, used as the `calloc` mmap threshold since
/// zero-filled pages come for free from the kernel. Queried once per
/// process and cached.
pub(crate) fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| crate::sys::page_size_query())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_next_multiple_of_eight() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(align_up(9), 16);
        assert_eq!(align_up(100), 104);
    }
}
