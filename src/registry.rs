//! The process-wide singly-linked list of block descriptors, kept in
//! increasing address order.

use crate::descriptor::{BlockHeader, BlockState};
use std::ptr::NonNull;

pub(crate) struct Registry {
    head: Option<NonNull<BlockHeader>>,
}

// All access to a `Registry` is mediated through the `spin::Mutex` holding
// it (see `Allocator`), so the raw pointers inside never cross threads
// unsynchronized.
unsafe impl Send for Registry {}

impl Registry {
    pub const fn new() -> Self {
        Self { head: None }
    }

    pub fn head(&self) -> Option<NonNull<BlockHeader>> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends `block` after the true last descriptor in the list (or
    /// installs it as the head if the list is empty).
    ///
    /// # Safety
    /// Every descriptor currently reachable from `self.head` must be live.
    pub unsafe fn push_back(&mut self, block: NonNull<BlockHeader>) {
        match self.head {
            None => self.head = Some(block),
            Some(head) => {
                let mut cur = head;
                loop {
                    match unsafe { (*cur.as_ptr()).next } {
                        Some(next) => cur = next,
                        None => break,
                    }
                }
                unsafe { (*cur.as_ptr()).next = Some(block) };
            }
        }
    }

    /// Whether the `sbrk` arena has been initialized: any descriptor that
    /// isn't `Mapped` proves at least one `sbrk` call has happened.
    ///
    /// # Safety
    /// Every descriptor currently reachable from `self.head` must be live.
    pub unsafe fn has_heap_backed(&self) -> bool {
        let mut cur = self.head;
        while let Some(node) = cur {
            if unsafe { (*node.as_ptr()).state } != BlockState::Mapped {
                return true;
            }
            cur = unsafe { (*node.as_ptr()).next };
        }
        false
    }

    /// Walks from the head, advancing only while the *next* descriptor is
    /// not `Mapped`, and returns where the walk stopped. This deliberately
    /// reproduces the original allocator's search for "the last `sbrk`-
    /// backed descriptor": it stops at the node just before the first
    /// `Mapped` descriptor encountered in list order, which is not
    /// necessarily the overall last `sbrk`-backed node if a mapped region
    /// was interleaved earlier. See the design notes for why this quirk
    /// is preserved rather than fixed.
    ///
    /// # Safety
    /// Every descriptor currently reachable from `self.head` must be live.
    pub unsafe fn last_heap_backed_before_mapped(&self) -> Option<NonNull<BlockHeader>> {
        let mut cur = self.head?;
        loop {
            match unsafe { (*cur.as_ptr()).next } {
                Some(next) if unsafe { (*next.as_ptr()).state } != BlockState::Mapped => {
                    cur = next;
                }
                _ => return Some(cur),
            }
        }
    }

    /// Returns the free descriptor whose size is `>= size` and minimal
    /// among such, breaking ties by lowest address. `Mapped` descriptors
    /// are skipped.
    ///
    /// # Safety
    /// Every descriptor currently reachable from `self.head` must be live.
    pub unsafe fn best_fit(&self, size: usize) -> Option<NonNull<BlockHeader>> {
        let mut best: Option<NonNull<BlockHeader>> = None;
        let mut cur = self.head;
        while let Some(node) = cur {
            let n = unsafe { &*node.as_ptr() };
            if n.state == BlockState::Free && n.size >= size {
                let better = match best {
                    None => true,
                    Some(b) => n.size < unsafe { (*b.as_ptr()).size },
                };
                if better {
                    best = Some(node);
                }
            }
            cur = n.next;
        }
        best
    }

    /// Finds the descriptor whose payload equals `payload`, opportunistically
    /// coalescing each visited descriptor with its successor along the way
    /// (mirroring the original allocator's walk in `free`/`realloc`).
    /// Returns the matching descriptor and its immediate predecessor, if any.
    ///
    /// # Safety
    /// Every descriptor currently reachable from `self.head` must be live,
    /// and `payload` must not alias any descriptor header.
    pub unsafe fn locate_coalescing(
        &mut self,
        payload: NonNull<u8>,
    ) -> (Option<NonNull<BlockHeader>>, Option<NonNull<BlockHeader>>) {
        let mut prev: Option<NonNull<BlockHeader>> = None;
        let mut cur = self.head;
        while let Some(node) = cur {
            unsafe { crate::surgery::try_coalesce(node) };
            if unsafe { BlockHeader::payload(node) } == payload {
                return (Some(node), prev);
            }
            prev = Some(node);
            cur = unsafe { (*node.as_ptr()).next };
        }
        (None, prev)
    }

    /// Unlinks `target` from the list, given its predecessor (`None` if
    /// `target` is the head).
    ///
    /// # Safety
    /// `target` and `prev` (if any) must be live descriptors currently in
    /// this list, with `prev`'s `next` equal to `target` (or `target` equal
    /// to `self.head` when `prev` is `None`).
    pub unsafe fn unlink(&mut self, target: NonNull<BlockHeader>, prev: Option<NonNull<BlockHeader>>) {
        let next = unsafe { (*target.as_ptr()).next };
        match prev {
            Some(p) => unsafe { (*p.as_ptr()).next = next },
            None => self.head = next,
        }
    }

    /// Collects `(address, size, state)` triples in list order. Test/debug
    /// helper for asserting registry-shape invariants.
    #[cfg(test)]
    pub unsafe fn snapshot(&self) -> Vec<(usize, usize, BlockState)> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(node) = cur {
            let n = unsafe { &*node.as_ptr() };
            out.push((node.as_ptr() as usize, n.size, n.state));
            cur = n.next;
        }
        out
    }
}
