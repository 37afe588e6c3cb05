//! The block descriptor: the metadata record prefixing every payload.

use crate::config::align_up;
use std::mem::size_of;
use std::ptr::NonNull;

/// The state of a block descriptor. `Free`/`HeapAllocated` apply only to
/// `sbrk`-backed blocks; `Mapped` applies only to `mmap`-backed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free,
    HeapAllocated,
    Mapped,
}

/// Metadata prefixing every live allocation and every free region inside
/// the `sbrk` arena. `size` is the payload size, excluding this header,
/// always a multiple of [`crate::config::ALIGNMENT`].
#[repr(C)]
pub(crate) struct BlockHeader {
    pub size: usize,
    pub state: BlockState,
    pub next: Option<NonNull<BlockHeader>>,
}

impl BlockHeader {
    /// The header's own size, rounded up to the alignment unit, so the
    /// payload that follows it is aligned too.
    pub const HEADER_SIZE: usize = align_up(size_of::<BlockHeader>());

    /// The payload pointer for a descriptor: immediately past its header.
    ///
    /// # Safety
    /// `block` must point at a live, initialized descriptor.
    pub unsafe fn payload(block: NonNull<BlockHeader>) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(Self::HEADER_SIZE)) }
    }

    /// Recovers the descriptor from a payload pointer previously returned
    /// by [`Self::payload`].
    ///
    /// # Safety
    /// `payload` must have been produced by [`Self::payload`] on a live
    /// descriptor.
    pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
        unsafe { NonNull::new_unchecked(payload.as_ptr().sub(Self::HEADER_SIZE).cast()) }
    }

    /// One past the last occupied byte of this descriptor's region
    /// (header + payload).
    ///
    /// # Safety
    /// `block` must point at a live, initialized descriptor.
    pub unsafe fn end_addr(block: NonNull<BlockHeader>) -> usize {
        let size = unsafe { (*block.as_ptr()).size };
        block.as_ptr() as usize + Self::HEADER_SIZE + size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(BlockHeader::HEADER_SIZE % crate::config::ALIGNMENT, 0);
        assert!(BlockHeader::HEADER_SIZE >= size_of::<BlockHeader>());
    }
}
