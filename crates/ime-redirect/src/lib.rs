//! # ime-redirect
//!
//! Interception and redirection engine for the IME preload layer.
//!
//! Everything here is independent of symbol interposition itself: the
//! `ime-preload` cdylib exports the libc names and forwards each call to an
//! [`Interceptor`]. That keeps the routing logic testable in an ordinary
//! process.
//!
//! ## Call flow
//!
//! 1. Null path on a path-taking call → `ENOENT`, nothing else consulted.
//! 2. Gate not ready → original libc symbol, resolved lazily via `RTLD_NEXT`.
//! 3. Gate ready → [`Dispatcher`] picks a [`Route`] (pass-through, managed,
//!    backing) per call.
//!
//! ## Reentrancy
//!
//! Nothing on the call path may reach an intercepted symbol: diagnostics go
//! through [`raw`] (direct `SYS_write`), backing-store node creation through
//! a direct `mknodat` syscall.

#![allow(clippy::missing_safety_doc)]

pub mod dirbuf;
pub mod dispatch;
pub mod gate;
pub mod interceptor;
pub mod ops;
pub mod path;
pub mod raw;
pub mod resolver;

pub use dispatch::{Context, Dispatcher};
pub use gate::{InitGate, Phase};
pub use interceptor::Interceptor;
pub use ops::{Backing, BackendError, FileOperations, ManagedBackend, PassThrough, Route};
pub use path::{Classifier, FixedPath};
pub use resolver::{NextSymbol, Op, RealSymbol, SymbolResolver, SymbolTable};

pub use nix::errno::Errno;

/// Result of a redirected call; the error is the errno to hand back.
pub type SysResult<T> = Result<T, Errno>;

/// Store `e` in the calling thread's errno.
#[inline]
pub fn set_errno(e: Errno) {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    unsafe {
        *libc::__errno_location() = e as libc::c_int;
    }
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error() = e as libc::c_int;
    }
}
