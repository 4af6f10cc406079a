//! File operation capabilities the dispatcher routes between.
//!
//! - [`PassThrough`]: the process's original libc definitions.
//! - managed: the IME native client, behind [`ManagedBackend`].
//! - [`Backing`]: direct syscalls against the backing filesystem.

use libc::{c_char, c_int, c_void, dev_t, mode_t, off_t, size_t, ssize_t, DIR};
use std::ffi::CStr;

use crate::path::FixedPath;
use crate::resolver::{cast_fn, Op, SymbolResolver, SymbolTable};
use crate::{raw, Errno, SysResult};

/// Which capability services a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PassThrough,
    Managed,
    Backing,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to load {lib}: {reason}")]
    Load { lib: String, reason: String },
    #[error("{lib} does not export {symbol}")]
    MissingSymbol { lib: String, symbol: String },
    #[error("backend init failed: {0}")]
    Init(Errno),
    #[error("bootstrap already claimed")]
    AlreadyStarted,
}

/// The intercepted POSIX surface. Every method mirrors its libc namesake;
/// errors carry the errno the caller would have seen.
///
/// Capabilities only implement what they service; the rest report `ENOSYS`.
#[allow(unused_variables)]
pub trait FileOperations {
    unsafe fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> SysResult<ssize_t> {
        Err(Errno::ENOSYS)
    }

    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> SysResult<ssize_t> {
        Err(Errno::ENOSYS)
    }

    fn close(&self, fd: c_int) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    fn fsync(&self, fd: c_int) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    unsafe fn stat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    unsafe fn lstat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    fn access(&self, path: &CStr, mode: c_int) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> SysResult<off_t> {
        Err(Errno::ENOSYS)
    }

    fn unlink(&self, path: &CStr) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    fn mkdir(&self, path: &CStr, mode: mode_t) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    fn rmdir(&self, path: &CStr) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    fn mknod(&self, path: &CStr, mode: mode_t, dev: dev_t) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    unsafe fn statvfs(&self, path: &CStr, buf: *mut libc::statvfs) -> SysResult<c_int> {
        Err(Errno::ENOSYS)
    }

    unsafe fn opendir(&self, path: &CStr) -> SysResult<*mut DIR> {
        Err(Errno::ENOSYS)
    }
}

/// The managed storage client.
///
/// Only the backend knows the managed mount layout, so classification lives
/// here too. `stat` doubles as the metadata lookup for `lstat`.
pub trait ManagedBackend: FileOperations + Send + Sync {
    fn init(&self) -> Result<(), BackendError>;

    /// `true` when `path` is inside the managed namespace; `suffix` then
    /// holds its namespace-relative remainder (leading '/').
    fn classify(&self, path: &CStr, suffix: &mut FixedPath) -> bool;
}

type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type FdFn = unsafe extern "C" fn(c_int) -> c_int;
type StatFn = unsafe extern "C" fn(*const c_char, *mut libc::stat) -> c_int;
type AccessFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
type LseekFn = unsafe extern "C" fn(c_int, off_t, c_int) -> off_t;
type PathFn = unsafe extern "C" fn(*const c_char) -> c_int;
type MkdirFn = unsafe extern "C" fn(*const c_char, mode_t) -> c_int;
type MknodFn = unsafe extern "C" fn(*const c_char, mode_t, dev_t) -> c_int;
type StatvfsFn = unsafe extern "C" fn(*const c_char, *mut libc::statvfs) -> c_int;
type OpendirFn = unsafe extern "C" fn(*const c_char) -> *mut DIR;

/// Original libc definitions, looked up through the symbol table.
pub struct PassThrough<'a, R: ?Sized> {
    table: &'a SymbolTable,
    resolver: &'a R,
}

impl<'a, R: SymbolResolver + ?Sized> PassThrough<'a, R> {
    pub fn new(table: &'a SymbolTable, resolver: &'a R) -> Self {
        Self { table, resolver }
    }

    /// Typed original for `op`; aborts if the process has none.
    ///
    /// # Safety
    /// `F` must be the C signature of `op`'s symbol.
    pub unsafe fn original<F: Copy>(&self, op: Op) -> F {
        let p = self.table.get(op, self.resolver);
        if p.is_null() {
            raw::fatal_unresolved(op.name());
        }
        cast_fn(p)
    }
}

impl<'a, R: SymbolResolver + ?Sized> FileOperations for PassThrough<'a, R> {
    unsafe fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> SysResult<c_int> {
        let f: OpenFn = self.original(Op::Open);
        Errno::result(f(path.as_ptr(), flags, mode))
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> SysResult<ssize_t> {
        let f: ReadFn = self.original(Op::Read);
        Errno::result(f(fd, buf, count))
    }

    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> SysResult<ssize_t> {
        let f: WriteFn = self.original(Op::Write);
        Errno::result(f(fd, buf, count))
    }

    fn close(&self, fd: c_int) -> SysResult<c_int> {
        unsafe {
            let f: FdFn = self.original(Op::Close);
            Errno::result(f(fd))
        }
    }

    fn fsync(&self, fd: c_int) -> SysResult<c_int> {
        unsafe {
            let f: FdFn = self.original(Op::Fsync);
            Errno::result(f(fd))
        }
    }

    unsafe fn stat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        let f: StatFn = self.original(Op::Stat);
        Errno::result(f(path.as_ptr(), buf))
    }

    unsafe fn lstat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        let f: StatFn = self.original(Op::Lstat);
        Errno::result(f(path.as_ptr(), buf))
    }

    fn access(&self, path: &CStr, mode: c_int) -> SysResult<c_int> {
        unsafe {
            let f: AccessFn = self.original(Op::Access);
            Errno::result(f(path.as_ptr(), mode))
        }
    }

    fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> SysResult<off_t> {
        unsafe {
            let f: LseekFn = self.original(Op::Lseek);
            Errno::result(f(fd, offset, whence))
        }
    }

    fn unlink(&self, path: &CStr) -> SysResult<c_int> {
        unsafe {
            let f: PathFn = self.original(Op::Unlink);
            Errno::result(f(path.as_ptr()))
        }
    }

    fn mkdir(&self, path: &CStr, mode: mode_t) -> SysResult<c_int> {
        unsafe {
            let f: MkdirFn = self.original(Op::Mkdir);
            Errno::result(f(path.as_ptr(), mode))
        }
    }

    fn rmdir(&self, path: &CStr) -> SysResult<c_int> {
        unsafe {
            let f: PathFn = self.original(Op::Rmdir);
            Errno::result(f(path.as_ptr()))
        }
    }

    fn mknod(&self, path: &CStr, mode: mode_t, dev: dev_t) -> SysResult<c_int> {
        unsafe {
            let f: MknodFn = self.original(Op::Mknod);
            Errno::result(f(path.as_ptr(), mode, dev))
        }
    }

    unsafe fn statvfs(&self, path: &CStr, buf: *mut libc::statvfs) -> SysResult<c_int> {
        let f: StatvfsFn = self.original(Op::Statvfs);
        Errno::result(f(path.as_ptr(), buf))
    }

    unsafe fn opendir(&self, path: &CStr) -> SysResult<*mut DIR> {
        let f: OpendirFn = self.original(Op::Opendir);
        let dir = f(path.as_ptr());
        if dir.is_null() {
            Err(Errno::last())
        } else {
            Ok(dir)
        }
    }
}

/// Direct syscalls against the backing filesystem, bypassing both libc and
/// the managed client.
#[derive(Debug, Default, Clone, Copy)]
pub struct Backing;

impl FileOperations for Backing {
    fn mknod(&self, path: &CStr, mode: mode_t, dev: dev_t) -> SysResult<c_int> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_mknodat,
                libc::AT_FDCWD,
                path.as_ptr(),
                mode as libc::c_uint,
                dev,
            )
        };
        Errno::result(ret).map(|r| r as c_int)
    }
}
