//! The narrow syscall surface the allocator consumes: growing the program
//! break, anonymous mmap, munmap, and the page size query. Every failure
//! path here is fatal, per the allocator's error-handling design — these
//! functions never return an error to their caller, they either succeed
//! or terminate the process.

use crate::diagnostics::fatal;
use std::io;
use std::ptr::NonNull;

/// Grows the program break by `delta` bytes and returns the address of
/// the *previous* break (i.e. the start of the newly extended region).
///
/// # Safety
/// Must only be called while holding the allocator's exclusive access to
/// the process break (no other code in this process may also call
/// `sbrk`/`brk`).
pub(crate) unsafe fn heap_extend(delta: usize) -> NonNull<u8> {
    let prev = unsafe { libc::sbrk(delta as libc::intptr_t) };
    if prev as isize == -1 {
        fatal("sbrk", io::Error::last_os_error());
    }
    unsafe { NonNull::new_unchecked(prev.cast()) }
}

/// Reserves a writable, private, anonymous mapping of `length` bytes.
pub(crate) fn anon_map(length: usize) -> NonNull<u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            length,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        fatal("mmap", io::Error::last_os_error());
    }
    unsafe { NonNull::new_unchecked(ptr.cast()) }
}

/// Releases a region previously returned by [`anon_map`].
///
/// # Safety
/// `addr`/`length` must exactly describe a live mapping produced by
/// [`anon_map`] that has not already been unmapped.
pub(crate) unsafe fn unmap(addr: NonNull<u8>, length: usize) {
    let rc = unsafe { libc::munmap(addr.as_ptr().cast(), length) };
    if rc != 0 {
        fatal("munmap", io::Error::last_os_error());
    }
}

/// Queries the system page size. Callers should go through
/// [`crate::config::page_size`], which caches this.
pub(crate) fn page_size_query() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n < 0 {
        fatal("sysconf(_SC_PAGESIZE)", io::Error::last_os_error());
    }
    n as usize
}
