//! Binding to the IME native client.
//!
//! The client library is opened at bootstrap rather than linked, so a
//! missing or broken client leaves the process in pass-through instead of
//! failing to start.

use ime_config::{log_backend_info, Config};
use ime_redirect::resolver::cast_fn;
use ime_redirect::{BackendError, Errno, FileOperations, FixedPath, ManagedBackend, SysResult};
use libc::{c_char, c_int, c_void, dev_t, mode_t, off_t, size_t, ssize_t};
use std::ffi::{CStr, CString};

type InitFn = unsafe extern "C" fn();
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
type ConvertFn = unsafe extern "C" fn(*const c_char, *mut c_char) -> bool;

/// Entry points of the loaded client. The library is never unloaded.
pub struct NativeBackend {
    init: InitFn,
    open: OpenFn,
    read: ReadFn,
    write: WriteFn,
    close: FdFn,
    fsync: FdFn,
    stat: StatFn,
    access: AccessFn,
    lseek: LseekFn,
    unlink: PathFn,
    mkdir: MkdirFn,
    rmdir: PathFn,
    mknod: MknodFn,
    statvfs: StatvfsFn,
    convert: ConvertFn,
}

fn dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

struct Library<'a> {
    name: &'a str,
    handle: *mut c_void,
}

impl<'a> Library<'a> {
    fn open(name: &'a str) -> Result<Self, BackendError> {
        let c_name = CString::new(name).map_err(|_| BackendError::Load {
            lib: name.to_string(),
            reason: "name contains a NUL byte".to_string(),
        })?;
        let handle = unsafe { libc::dlopen(c_name.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            return Err(BackendError::Load {
                lib: name.to_string(),
                reason: dl_error(),
            });
        }
        Ok(Self { name, handle })
    }

    /// # Safety
    /// `F` must be the C signature of `symbol`.
    unsafe fn get<F: Copy>(&self, symbol: &CStr) -> Result<F, BackendError> {
        let p = libc::dlsym(self.handle, symbol.as_ptr());
        if p.is_null() {
            return Err(BackendError::MissingSymbol {
                lib: self.name.to_string(),
                symbol: symbol.to_string_lossy().into_owned(),
            });
        }
        Ok(cast_fn(p))
    }
}

impl NativeBackend {
    /// Open `config.native_lib` and bind every entry point.
    pub fn load(config: &Config) -> Result<Self, BackendError> {
        let lib = Library::open(&config.native_lib)?;
        let backend = unsafe {
            Self {
                init: lib.get(c"ime_native_init")?,
                open: lib.get(c"ime_native_open")?,
                read: lib.get(c"ime_native_read")?,
                write: lib.get(c"ime_native_write")?,
                close: lib.get(c"ime_native_close")?,
                fsync: lib.get(c"ime_client_native2_fsync")?,
                stat: lib.get(c"ime_native_stat")?,
                access: lib.get(c"ime_native_access")?,
                lseek: lib.get(c"ime_native_lseek")?,
                unlink: lib.get(c"ime_native_unlink")?,
                mkdir: lib.get(c"ime_native_mkdir")?,
                rmdir: lib.get(c"ime_native_rmdir")?,
                mknod: lib.get(c"ime_native_mknod")?,
                statvfs: lib.get(c"ime_native_statvfs")?,
                convert: lib.get(c"ime_client_native2_is_fuse_path_and_convert")?,
            }
        };
        log_backend_info!("native client bound", lib = config.native_lib.as_str());
        Ok(backend)
    }
}

impl FileOperations for NativeBackend {
    unsafe fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> SysResult<c_int> {
        Errno::result((self.open)(path.as_ptr(), flags, mode))
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> SysResult<ssize_t> {
        Errno::result((self.read)(fd, buf, count))
    }

    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> SysResult<ssize_t> {
        Errno::result((self.write)(fd, buf, count))
    }

    fn close(&self, fd: c_int) -> SysResult<c_int> {
        Errno::result(unsafe { (self.close)(fd) })
    }

    fn fsync(&self, fd: c_int) -> SysResult<c_int> {
        Errno::result(unsafe { (self.fsync)(fd) })
    }

    unsafe fn stat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        Errno::result((self.stat)(path.as_ptr(), buf))
    }

    unsafe fn lstat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        Errno::result((self.stat)(path.as_ptr(), buf))
    }

    fn access(&self, path: &CStr, mode: c_int) -> SysResult<c_int> {
        Errno::result(unsafe { (self.access)(path.as_ptr(), mode) })
    }

    fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> SysResult<off_t> {
        Errno::result(unsafe { (self.lseek)(fd, offset, whence) })
    }

    fn unlink(&self, path: &CStr) -> SysResult<c_int> {
        Errno::result(unsafe { (self.unlink)(path.as_ptr()) })
    }

    fn mkdir(&self, path: &CStr, mode: mode_t) -> SysResult<c_int> {
        Errno::result(unsafe { (self.mkdir)(path.as_ptr(), mode) })
    }

    fn rmdir(&self, path: &CStr) -> SysResult<c_int> {
        Errno::result(unsafe { (self.rmdir)(path.as_ptr()) })
    }

    fn mknod(&self, path: &CStr, mode: mode_t, dev: dev_t) -> SysResult<c_int> {
        Errno::result(unsafe { (self.mknod)(path.as_ptr(), mode, dev) })
    }

    unsafe fn statvfs(&self, path: &CStr, buf: *mut libc::statvfs) -> SysResult<c_int> {
        Errno::result((self.statvfs)(path.as_ptr(), buf))
    }
}

impl ManagedBackend for NativeBackend {
    fn init(&self) -> Result<(), BackendError> {
        unsafe { (self.init)() };
        Ok(())
    }

    fn classify(&self, path: &CStr, suffix: &mut FixedPath) -> bool {
        suffix.clear();
        let managed = unsafe { (self.convert)(path.as_ptr(), suffix.as_mut_c_buf()) };
        if managed {
            suffix.sync_len();
        }
        managed
    }
}
