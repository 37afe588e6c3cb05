//! Zero-overhead-unless-enabled allocator diagnostics.
//!
//! The fatal path (a real syscall failure) is always compiled in: the
//! allocator never silently limps on after `sbrk`/`mmap`/`munmap` fails.
//! Everything else — tracing which backend and which codepath a given
//! request took — is gated behind the `trace` feature, mirroring the
//! feature-gated log levels of kernel-style allocators: compiled to
//! nothing unless a developer opts in.

use std::io::Error as OsError;

/// Prints a diagnostic naming the failing syscall and terminates the
/// process with the OS error code. The allocator never silently limps
/// on after a failed `sbrk`/`mmap`/`munmap`.
#[cold]
pub(crate) fn fatal(call: &str, err: OsError) -> ! {
    eprintln!("osmem: {call} failed: {err}");
    std::process::exit(err.raw_os_error().unwrap_or(1));
}

#[cfg(feature = "trace")]
macro_rules! alloc_trace {
    ($($arg:tt)*) => {
        eprintln!("osmem[trace]: {}", format_args!($($arg)*));
    };
}

#[cfg(not(feature = "trace"))]
macro_rules! alloc_trace {
    ($($arg:tt)*) => {};
}

pub(crate) use alloc_trace;
