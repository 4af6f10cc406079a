//! Exported libc names.
//!
//! Every export forwards to the process-wide [`INTERCEPTOR`]; none of them
//! holds logic of its own.

use libc::{c_char, c_int, c_void, dev_t, mode_t, off_t, size_t, ssize_t, DIR};

use crate::INTERCEPTOR;

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    INTERCEPTOR.open(path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn __open_2(path: *const c_char, flags: c_int) -> c_int {
    INTERCEPTOR.open_2(path, flags)
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    INTERCEPTOR.read(fd, buf, count)
}

#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    INTERCEPTOR.write(fd, buf, count)
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    INTERCEPTOR.close(fd)
}

#[no_mangle]
pub unsafe extern "C" fn fsync(fd: c_int) -> c_int {
    INTERCEPTOR.fsync(fd)
}

#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    INTERCEPTOR.stat(path, buf)
}

#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    INTERCEPTOR.lstat(path, buf)
}

#[no_mangle]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    INTERCEPTOR.access(path, mode)
}

#[no_mangle]
pub unsafe extern "C" fn lseek(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    INTERCEPTOR.lseek(fd, offset, whence)
}

#[no_mangle]
pub unsafe extern "C" fn unlink(path: *const c_char) -> c_int {
    INTERCEPTOR.unlink(path)
}

#[no_mangle]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: mode_t) -> c_int {
    INTERCEPTOR.mkdir(path, mode)
}

#[no_mangle]
pub unsafe extern "C" fn rmdir(path: *const c_char) -> c_int {
    INTERCEPTOR.rmdir(path)
}

#[no_mangle]
pub unsafe extern "C" fn mknod(path: *const c_char, mode: mode_t, dev: dev_t) -> c_int {
    INTERCEPTOR.mknod(path, mode, dev)
}

#[no_mangle]
pub unsafe extern "C" fn statvfs(path: *const c_char, buf: *mut libc::statvfs) -> c_int {
    INTERCEPTOR.statvfs(path, buf)
}

#[no_mangle]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut DIR {
    INTERCEPTOR.opendir(path)
}

// The caller's environment is dropped so LD_PRELOAD does not follow the
// exec into the new image.
#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    INTERCEPTOR.execve(path, argv, envp)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub use start::__libc_start_main;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod start {
    use ime_redirect::Op;
    use libc::{c_char, c_int, c_void};

    use crate::INTERCEPTOR;

    type MainFn = unsafe extern "C" fn(c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;
    type HookFn = unsafe extern "C" fn();
    type StartMainFn = unsafe extern "C" fn(
        Option<MainFn>,
        c_int,
        *mut *mut c_char,
        Option<HookFn>,
        Option<HookFn>,
        Option<HookFn>,
        *mut c_void,
    ) -> c_int;

    /// glibc's program entry: bootstrap, then hand over to the real one.
    #[no_mangle]
    pub unsafe extern "C" fn __libc_start_main(
        main: Option<MainFn>,
        argc: c_int,
        argv: *mut *mut c_char,
        init: Option<HookFn>,
        fini: Option<HookFn>,
        rtld_fini: Option<HookFn>,
        stack_end: *mut c_void,
    ) -> c_int {
        crate::bootstrap::run();
        let real: StartMainFn = INTERCEPTOR.original(Op::LibcStartMain);
        real(main, argc, argv, init, fini, rtld_fini, stack_end)
    }
}
