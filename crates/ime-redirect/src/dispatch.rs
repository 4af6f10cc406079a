//! Redirect Dispatcher
//!
//! Picks the capability that services each call once the gate is ready.
//! Most calls go straight to the managed backend; two paths use the backing
//! store:
//!
//! - creating opens on managed paths first create the node in the backing
//!   filesystem with a direct `mknodat`, then let the backend open the
//!   original path without `O_CREAT`;
//! - `opendir` on a managed path lists the backing directory through the
//!   original libc, optionally on a grown read buffer.

use ime_config::{log_redirect_debug, log_redirect_trace, Config};
use libc::{c_int, c_void, dev_t, mode_t, off_t, size_t, ssize_t, DIR};
use std::ffi::CStr;

use crate::dirbuf::{self, LibcAllocator, LARGE_DIR_BUFFER_SIZE};
use crate::ops::{FileOperations, ManagedBackend, Route};
use crate::path::{Classifier, FixedPath};
use crate::{Errno, SysResult};

/// Everything published through the gate: the snapshot and the backend it
/// was loaded for.
pub struct Context<M> {
    pub config: Config,
    pub backend: M,
}

impl<M> Context<M> {
    pub fn new(config: Config, backend: M) -> Self {
        Self { config, backend }
    }
}

pub struct Dispatcher<'a, M, P, B> {
    config: &'a Config,
    managed: &'a M,
    pass: &'a P,
    backing: &'a B,
}

impl<'a, M, P, B> Dispatcher<'a, M, P, B>
where
    M: ManagedBackend,
    P: FileOperations,
    B: FileOperations,
{
    pub fn new(config: &'a Config, managed: &'a M, pass: &'a P, backing: &'a B) -> Self {
        Self {
            config,
            managed,
            pass,
            backing,
        }
    }

    pub fn ops(&self, route: Route) -> &dyn FileOperations {
        match route {
            Route::PassThrough => self.pass,
            Route::Managed => self.managed,
            Route::Backing => self.backing,
        }
    }

    fn classifier(&self) -> Classifier<'a> {
        Classifier::new(self.config.backing_root())
    }

    /// Backing-store path for `path` if `enabled` and the backend manages it.
    pub fn backing_path(&self, enabled: bool, path: &CStr) -> SysResult<Option<FixedPath>> {
        self.classifier().convert(enabled, path, self.managed)
    }

    pub unsafe fn open(&self, path: &CStr, flags: c_int, mode: mode_t) -> SysResult<c_int> {
        let creating = flags & libc::O_CREAT != 0 && flags & libc::O_DIRECTORY == 0;
        if creating {
            if let Some(target) = self.backing_path(self.config.create_via_mknod, path)? {
                self.create_backing_node(&target, mode)?;
                return self.ops(Route::Managed).open(path, flags & !libc::O_CREAT, 0);
            }
        }
        self.ops(Route::Managed).open(path, flags, mode)
    }

    /// Regular file at `target`, created without going through the backend.
    /// An existing node counts as created.
    fn create_backing_node(&self, target: &FixedPath, mode: mode_t) -> SysResult<()> {
        let node_mode = libc::S_IFREG | (mode & 0o7777);
        match self.ops(Route::Backing).mknod(target.as_cstr(), node_mode, 0) {
            Ok(_) => {
                log_redirect_debug!("backing node created", path = tracing::field::display(target));
                Ok(())
            }
            Err(Errno::EEXIST) => {
                log_redirect_trace!("backing node exists", path = tracing::field::display(target));
                Ok(())
            }
            Err(e) => {
                log_redirect_debug!(
                    "backing node creation failed",
                    path = tracing::field::display(target),
                    errno = tracing::field::display(e),
                );
                Err(e)
            }
        }
    }

    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> SysResult<ssize_t> {
        self.ops(Route::Managed).read(fd, buf, count)
    }

    pub unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> SysResult<ssize_t> {
        self.ops(Route::Managed).write(fd, buf, count)
    }

    pub fn close(&self, fd: c_int) -> SysResult<c_int> {
        self.ops(Route::Managed).close(fd)
    }

    pub fn fsync(&self, fd: c_int) -> SysResult<c_int> {
        self.ops(Route::Managed).fsync(fd)
    }

    pub unsafe fn stat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        self.ops(Route::Managed).stat(path, buf)
    }

    /// The backend has a single metadata lookup; symlinks are not told apart.
    pub unsafe fn lstat(&self, path: &CStr, buf: *mut libc::stat) -> SysResult<c_int> {
        self.ops(Route::Managed).stat(path, buf)
    }

    pub fn access(&self, path: &CStr, mode: c_int) -> SysResult<c_int> {
        self.ops(Route::Managed).access(path, mode)
    }

    pub fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> SysResult<off_t> {
        self.ops(Route::Managed).lseek(fd, offset, whence)
    }

    pub fn unlink(&self, path: &CStr) -> SysResult<c_int> {
        self.ops(Route::Managed).unlink(path)
    }

    pub fn mkdir(&self, path: &CStr, mode: mode_t) -> SysResult<c_int> {
        self.ops(Route::Managed).mkdir(path, mode)
    }

    pub fn rmdir(&self, path: &CStr) -> SysResult<c_int> {
        self.ops(Route::Managed).rmdir(path)
    }

    pub fn mknod(&self, path: &CStr, mode: mode_t, dev: dev_t) -> SysResult<c_int> {
        self.ops(Route::Managed).mknod(path, mode, dev)
    }

    pub unsafe fn statvfs(&self, path: &CStr, buf: *mut libc::statvfs) -> SysResult<c_int> {
        self.ops(Route::Managed).statvfs(path, buf)
    }

    pub unsafe fn opendir(&self, path: &CStr) -> SysResult<*mut DIR> {
        let Some(target) = self.backing_path(self.config.redirect_opendir, path)? else {
            return self.ops(Route::PassThrough).opendir(path);
        };

        let dir = self.ops(Route::PassThrough).opendir(target.as_cstr())?;
        if !self.config.grow_dir_buffer {
            return Ok(dir);
        }
        let grown = dirbuf::grow(dir, LARGE_DIR_BUFFER_SIZE, &LibcAllocator);
        log_redirect_debug!(
            "directory redirected",
            path = tracing::field::display(&target),
            grown = grown != dir,
        );
        Ok(grown)
    }
}
