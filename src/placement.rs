//! Chooses between the two backends, preallocates the `sbrk` arena on
//! first use, and extends it at the tail when a best-fit search has
//! already failed.

use crate::config::{self, align_up};
use crate::descriptor::{BlockHeader, BlockState};
use crate::diagnostics::alloc_trace;
use crate::registry::Registry;
use crate::surgery;
use crate::sys;
use std::ptr::NonNull;

/// The allocation kind, which determines which threshold classifies a
/// request into the `mmap` backend.
#[derive(Clone, Copy)]
pub(crate) enum Kind {
    General,
    Zeroed,
}

fn threshold(kind: Kind) -> usize {
    match kind {
        Kind::General => config::MMAP_THRESHOLD,
        Kind::Zeroed => config::page_size(),
    }
}

/// Whether `size` (already aligned) bytes of payload, plus one header,
/// meets the threshold for `kind` and should therefore be satisfied by
/// `mmap` rather than `sbrk`.
pub(crate) fn is_mmap_sized(size: usize, kind: Kind) -> bool {
    size + BlockHeader::HEADER_SIZE >= threshold(kind)
}

/// Obtains a descriptor satisfying `size` bytes of payload under
/// allocation kind `kind`: classifies the request by size, then either
/// maps it directly or routes it through the `sbrk` arena (preallocating
/// it first if it doesn't exist yet, otherwise extending its tail).
///
/// # Safety
/// Every descriptor reachable from `registry` must be live.
pub(crate) unsafe fn obtain(
    registry: &mut Registry,
    size: usize,
    kind: Kind,
) -> NonNull<BlockHeader> {
    debug_assert_eq!(size, align_up(size));
    if size + BlockHeader::HEADER_SIZE >= threshold(kind) {
        anon_map_path(registry, size)
    } else if unsafe { registry.has_heap_backed() } {
        grow(registry, size)
    } else {
        preallocate(registry, size)
    }
}

unsafe fn anon_map_path(registry: &mut Registry, size: usize) -> NonNull<BlockHeader> {
    let total = size + BlockHeader::HEADER_SIZE;
    let addr = sys::anon_map(total);
    let block = addr.as_ptr().cast::<BlockHeader>();
    unsafe {
        (*block).size = size;
        (*block).state = BlockState::Mapped;
        (*block).next = None;
    }
    let block = unsafe { NonNull::new_unchecked(block) };
    unsafe { registry.push_back(block) };
    alloc_trace!("mmap {total} bytes for a {size}-byte request");
    block
}

unsafe fn preallocate(registry: &mut Registry, size: usize) -> NonNull<BlockHeader> {
    let addr = unsafe { sys::heap_extend(config::PREALLOC_SIZE) };
    let block = addr.as_ptr().cast::<BlockHeader>();
    unsafe {
        (*block).size = config::PREALLOC_SIZE - BlockHeader::HEADER_SIZE;
        (*block).state = BlockState::HeapAllocated;
        (*block).next = None;
    }
    let block = unsafe { NonNull::new_unchecked(block) };
    unsafe { surgery::split(block, size) };
    unsafe { registry.push_back(block) };
    alloc_trace!("preallocated {} bytes of sbrk arena", config::PREALLOC_SIZE);
    block
}

/// Finds the last `sbrk`-backed descriptor (stopping before the first
/// `Mapped` descriptor encountered, a quirk of the original search that's
/// preserved deliberately — see the design notes). If it is `Free`,
/// extends it in place; otherwise extends the true tail of the registry
/// with a fresh descriptor.
unsafe fn grow(registry: &mut Registry, size: usize) -> NonNull<BlockHeader> {
    let last = unsafe { registry.last_heap_backed_before_mapped() }
        .expect("has_heap_backed() implies a heap-backed descriptor exists");
    let header = unsafe { &mut *last.as_ptr() };

    if header.state == BlockState::Free {
        debug_assert!(size > header.size, "best-fit would have matched otherwise");
        let delta = size - header.size;
        unsafe { sys::heap_extend(delta) };
        header.state = BlockState::HeapAllocated;
        header.size = size;
        alloc_trace!("extended last free sbrk block in place to {size} bytes");
        return last;
    }

    let total = size + BlockHeader::HEADER_SIZE;
    let addr = unsafe { sys::heap_extend(total) };
    let block = addr.as_ptr().cast::<BlockHeader>();
    unsafe {
        (*block).size = size;
        (*block).state = BlockState::HeapAllocated;
        (*block).next = None;
    }
    let block = unsafe { NonNull::new_unchecked(block) };
    unsafe { registry.push_back(block) };
    alloc_trace!("grew sbrk arena by {total} bytes for a {size}-byte request");
    block
}
