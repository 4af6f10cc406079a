//! # ime-preload
//!
//! LD_PRELOAD layer that redirects POSIX file calls to the IME native client.
//!
//! ```bash
//! IM_CLIENT_BFS_PATH=/bfs LD_PRELOAD=target/release/libime_preload.so ./app
//! ```
//!
//! Until glibc's `__libc_start_main` has run through this library, every
//! call reaches the original libc definition. Routing lives in
//! `ime-redirect`; this crate only owns the exports, the process-wide
//! interceptor and the native client binding.

#![allow(clippy::missing_safety_doc)]

pub mod bootstrap;
pub mod interpose;
pub mod native;

use ime_redirect::{Interceptor, NextSymbol};

use crate::native::NativeBackend;

/// The process-wide interception state.
pub static INTERCEPTOR: Interceptor<NextSymbol, NativeBackend> = Interceptor::new(NextSymbol);

/// Status export for diagnostics tooling.
/// Writes a NUL-terminated JSON document into `buf`.
/// Returns the length written, or -1 if the buffer is too small.
#[no_mangle]
pub unsafe extern "C" fn ime_preload_status(buf: *mut libc::c_char, buf_size: usize) -> libc::c_int {
    if buf.is_null() || buf_size == 0 {
        return -1;
    }

    let out = INTERCEPTOR.status_json().to_string();

    let len = out.len();
    if len >= buf_size {
        return -1;
    }
    std::ptr::copy_nonoverlapping(out.as_ptr(), buf as *mut u8, len);
    *buf.add(len) = 0;

    len as libc::c_int
}
