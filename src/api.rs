//! The four public entry points (`alloc`, `zeroed_alloc`, `resize`,
//! `release`) that compose the registry, placement engine and block
//! surgery into the allocator's observable behavior.

use crate::config::align_up;
use crate::descriptor::{BlockHeader, BlockState};
use crate::diagnostics::alloc_trace;
use crate::placement::{self, Kind};
use crate::registry::Registry;
use crate::surgery;
use crate::sys;
use std::ptr::NonNull;

/// The allocator. A single process-wide instance owns the registry; see
/// the crate docs for why a [`spin::Mutex`] guards it even though this
/// allocator makes no multithreading guarantee.
pub struct Allocator {
    pub(crate) registry: spin::Mutex<Registry>,
}

impl Allocator {
    pub const fn new() -> Self {
        Self {
            registry: spin::Mutex::new(Registry::new()),
        }
    }

    /// Allocates `size` bytes. Returns `None` for `size == 0`.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let aligned = align_up(size);
        let mut registry = self.registry.lock();
        let block = obtain_for(&mut registry, aligned, Kind::General);
        Some(unsafe { BlockHeader::payload(block) })
    }

    /// Allocates space for `n` elements of `size` bytes each, zeroed.
    /// Returns `None` on `n == 0`, `size == 0`, or `n * size` overflow.
    pub fn zeroed_alloc(&self, n: usize, size: usize) -> Option<NonNull<u8>> {
        if n == 0 || size == 0 {
            return None;
        }
        let total = n.checked_mul(size)?;
        let aligned = align_up(total);
        let mut registry = self.registry.lock();
        let block = obtain_for(&mut registry, aligned, Kind::Zeroed);
        let payload = unsafe { BlockHeader::payload(block) };
        // Zero exactly the caller's unaligned `total` bytes; any alignment
        // tail is left as-is.
        unsafe { std::ptr::write_bytes(payload.as_ptr(), 0, total) };
        Some(payload)
    }

    /// Releases `payload`. A no-op for `None`, an unknown pointer, or a
    /// pointer that is already free.
    pub fn release(&self, payload: Option<NonNull<u8>>) {
        let Some(payload) = payload else { return };
        let mut registry = self.registry.lock();
        release_locked(&mut registry, payload);
    }

    /// Resizes the allocation at `payload` to `size` bytes, preserving the
    /// first `min(old_size, size)` bytes. `size == 0` releases and returns
    /// `None`; `payload == None` behaves like [`Self::alloc`].
    pub fn resize(&self, payload: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            self.release(payload);
            return None;
        }
        let Some(payload) = payload else {
            return self.alloc(size);
        };

        let aligned = align_up(size);
        let mut registry = self.registry.lock();
        let (target, _prev) = unsafe { registry.locate_coalescing(payload) };
        let target = target?;
        let header = unsafe { &mut *target.as_ptr() };
        if header.state == BlockState::Free {
            return None;
        }

        if header.state == BlockState::Mapped {
            let old_size = header.size;
            let new_block = obtain_for(&mut registry, aligned, Kind::General);
            let new_payload = unsafe { BlockHeader::payload(new_block) };
            let copy_len = old_size.min(aligned);
            unsafe {
                std::ptr::copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), copy_len);
            }
            release_locked(&mut registry, payload);
            return Some(new_payload);
        }

        // HeapAllocated: shrink-or-fit in place.
        if aligned <= header.size {
            unsafe { surgery::split(target, aligned) };
            return Some(payload);
        }

        // Merge with a free successor if that's enough room.
        if let Some(next) = header.next {
            let next_header = unsafe { &*next.as_ptr() };
            if next_header.state == BlockState::Free
                && header.size + BlockHeader::HEADER_SIZE + next_header.size >= aligned
            {
                header.size += BlockHeader::HEADER_SIZE + next_header.size;
                header.next = next_header.next;
                unsafe { surgery::split(target, aligned) };
                return Some(payload);
            }
        }

        // Last resort: if this is the tail of the sbrk arena, mark it free
        // so the placement engine's "grow last free" rule extends it in
        // place; otherwise this degenerates into an ordinary copy + free.
        let is_tail = match header.next {
            None => true,
            Some(next) => unsafe { (*next.as_ptr()).state } == BlockState::Mapped,
        };
        let old_size = header.size;
        if is_tail {
            header.state = BlockState::Free;
        }

        let new_block = obtain_for(&mut registry, aligned, Kind::General);
        let new_payload = unsafe { BlockHeader::payload(new_block) };
        let copy_len = old_size.min(aligned);
        if new_payload != payload {
            unsafe {
                std::ptr::copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), copy_len);
            }
            release_locked(&mut registry, payload);
        }
        Some(new_payload)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Allocator {
    /// Snapshots the registry as `(address, size, state)` triples in list
    /// order, for asserting on its shape in tests.
    pub(crate) fn snapshot(&self) -> Vec<(usize, usize, BlockState)> {
        unsafe { self.registry.lock().snapshot() }
    }
}

/// Shared by `alloc`/`zeroed_alloc`/the growth arm of `resize`: run a
/// best-fit search first (skipped when the registry is empty or the
/// request is `mmap`-sized), falling back to the placement engine.
fn obtain_for(registry: &mut Registry, size: usize, kind: Kind) -> NonNull<BlockHeader> {
    unsafe {
        if registry.is_empty() || placement::is_mmap_sized(size, kind) {
            return placement::obtain(registry, size, kind);
        }
        match registry.best_fit(size) {
            Some(node) => {
                (*node.as_ptr()).state = BlockState::HeapAllocated;
                surgery::split(node, size);
                alloc_trace!("best-fit reused a free block for {size} bytes");
                node
            }
            None => placement::obtain(registry, size, kind),
        }
    }
}

fn release_locked(registry: &mut Registry, payload: NonNull<u8>) {
    let (target, prev) = unsafe { registry.locate_coalescing(payload) };
    let Some(target) = target else { return };
    let header = unsafe { &mut *target.as_ptr() };
    match header.state {
        BlockState::Free => {}
        BlockState::HeapAllocated => {
            header.state = BlockState::Free;
            unsafe { surgery::try_coalesce(target) };
            if let Some(p) = prev {
                unsafe { surgery::try_coalesce(p) };
            }
            alloc_trace!("freed and coalesced a heap-backed block");
        }
        BlockState::Mapped => {
            let total = header.size + BlockHeader::HEADER_SIZE;
            unsafe { registry.unlink(target, prev) };
            unsafe { sys::unmap(NonNull::new_unchecked(target.as_ptr().cast()), total) };
            alloc_trace!("unmapped a {total}-byte mmap-backed block");
        }
    }
}
