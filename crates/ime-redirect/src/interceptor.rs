//! Entry logic behind every exported libc name.
//!
//! Each method here takes and returns raw C values. The order is fixed:
//! reject a null path, consult the gate, then either call the original
//! definition (not ready) or hand the call to the [`Dispatcher`] (ready).
//! Errors leave through `errno` with the usual `-1` / null return.

use ime_config::{log_preload_info, log_preload_warn, Config};
use libc::{c_char, c_int, c_void, dev_t, mode_t, off_t, size_t, ssize_t, DIR};
use std::ffi::CStr;
use std::ptr;

use crate::dispatch::{Context, Dispatcher};
use crate::gate::InitGate;
use crate::ops::{Backing, BackendError, FileOperations, ManagedBackend, PassThrough};
use crate::resolver::{cast_fn, Op, SymbolResolver, SymbolTable};
use crate::{raw, set_errno, Errno, SysResult};

type Open2Fn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;

pub struct Interceptor<R, M> {
    resolver: R,
    reals: SymbolTable,
    gate: InitGate<Context<M>>,
}

/// Borrow `p` as a C string; `None` for null.
#[inline]
unsafe fn c_path<'p>(p: *const c_char) -> Option<&'p CStr> {
    if p.is_null() {
        None
    } else {
        Some(CStr::from_ptr(p))
    }
}

/// Hand `r` back to C: the value, or `failed` with errno set.
#[inline]
fn finish<T>(r: SysResult<T>, failed: T) -> T {
    match r {
        Ok(v) => v,
        Err(e) => {
            set_errno(e);
            failed
        }
    }
}

/// `mode` is only meaningful when `flags` create a file. The exports are not
/// variadic, so otherwise the third argument is whatever the register held.
#[inline]
fn open_mode(flags: c_int, mode: mode_t) -> mode_t {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let tmpfile = flags & libc::O_TMPFILE == libc::O_TMPFILE;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let tmpfile = false;
    if flags & libc::O_CREAT != 0 || tmpfile {
        mode
    } else {
        0
    }
}

#[inline]
fn enoent<T>(failed: T) -> T {
    set_errno(Errno::ENOENT);
    failed
}

impl<R: SymbolResolver, M: ManagedBackend> Interceptor<R, M> {
    pub const fn new(resolver: R) -> Self {
        Self {
            resolver,
            reals: SymbolTable::new(),
            gate: InitGate::new(),
        }
    }

    pub fn gate(&self) -> &InitGate<Context<M>> {
        &self.gate
    }

    pub fn reals(&self) -> &SymbolTable {
        &self.reals
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn context(&self) -> Option<&Context<M>> {
        self.gate.get()
    }

    /// Diagnostics snapshot: gate phase, resolved originals and, once
    /// ready, the published configuration.
    pub fn status_json(&self) -> serde_json::Value {
        serde_json::json!({
            "pid": std::process::id(),
            "phase": self.gate.phase().as_str(),
            "redirect_active": self.gate.is_ready(),
            "resolved_symbols": self.reals.resolved_count(),
            "config": self.gate.get().map(|ctx| ctx.config.to_json()),
        })
    }

    fn pass(&self) -> PassThrough<'_, R> {
        PassThrough::new(&self.reals, &self.resolver)
    }

    /// Typed original for `op`; aborts if the process has none.
    ///
    /// # Safety
    /// `F` must be the C signature of `op`'s symbol.
    pub unsafe fn original<F: Copy>(&self, op: Op) -> F {
        self.pass().original(op)
    }

    /// One-time transition to ready.
    ///
    /// Pre-populates the symbol table, builds the backend with `load` and
    /// initializes it, then publishes `config` alongside it. On any failure
    /// the gate is left not ready and every call keeps passing through.
    pub fn bootstrap<L>(&self, config: Config, load: L) -> Result<&Context<M>, BackendError>
    where
        L: FnOnce(&Config) -> Result<M, BackendError>,
    {
        if !self.gate.try_begin() {
            return Err(BackendError::AlreadyStarted);
        }

        for op in self.reals.populate(&self.resolver) {
            log_preload_warn!("original symbol not found", symbol = op.name());
        }

        let backend = match load(&config).and_then(|b| b.init().map(|()| b)) {
            Ok(b) => b,
            Err(e) => {
                self.gate.abandon();
                return Err(e);
            }
        };

        let ctx = self
            .gate
            .publish(Context::new(config, backend))
            .map_err(|_| BackendError::AlreadyStarted)?;
        log_preload_info!(
            "redirection ready",
            symbols = self.reals.resolved_count(),
            backing = ctx.config.backing_root().unwrap_or("-"),
        );
        Ok(ctx)
    }

    #[inline]
    fn with_dispatcher<T>(
        &self,
        ctx: &Context<M>,
        f: impl FnOnce(&Dispatcher<'_, M, PassThrough<'_, R>, Backing>) -> T,
    ) -> T {
        let pass = self.pass();
        let dispatcher = Dispatcher::new(&ctx.config, &ctx.backend, &pass, &Backing);
        f(&dispatcher)
    }

    pub unsafe fn open(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let mode = open_mode(flags, mode);
        let r = match self.gate.get() {
            None => self.pass().open(path, flags, mode),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.open(path, flags, mode)),
        };
        finish(r, -1)
    }

    /// Fortified `open`; never carries a mode.
    pub unsafe fn open_2(&self, path: *const c_char, flags: c_int) -> c_int {
        let Some(c) = c_path(path) else {
            return enoent(-1);
        };
        match self.gate.get() {
            None => {
                let f: Open2Fn = self.original(Op::Open2);
                f(path, flags)
            }
            Some(ctx) => finish(self.with_dispatcher(ctx, |d| d.open(c, flags, 0)), -1),
        }
    }

    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        let r = match self.gate.get() {
            None => self.pass().read(fd, buf, count),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.read(fd, buf, count)),
        };
        finish(r, -1)
    }

    pub unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        let r = match self.gate.get() {
            None => self.pass().write(fd, buf, count),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.write(fd, buf, count)),
        };
        finish(r, -1)
    }

    pub unsafe fn close(&self, fd: c_int) -> c_int {
        let r = match self.gate.get() {
            None => self.pass().close(fd),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.close(fd)),
        };
        finish(r, -1)
    }

    pub unsafe fn fsync(&self, fd: c_int) -> c_int {
        let r = match self.gate.get() {
            None => self.pass().fsync(fd),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.fsync(fd)),
        };
        finish(r, -1)
    }

    pub unsafe fn stat(&self, path: *const c_char, buf: *mut libc::stat) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().stat(path, buf),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.stat(path, buf)),
        };
        finish(r, -1)
    }

    pub unsafe fn lstat(&self, path: *const c_char, buf: *mut libc::stat) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().lstat(path, buf),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.lstat(path, buf)),
        };
        finish(r, -1)
    }

    pub unsafe fn access(&self, path: *const c_char, mode: c_int) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().access(path, mode),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.access(path, mode)),
        };
        finish(r, -1)
    }

    pub unsafe fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> off_t {
        let r = match self.gate.get() {
            None => self.pass().lseek(fd, offset, whence),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.lseek(fd, offset, whence)),
        };
        finish(r, -1)
    }

    pub unsafe fn unlink(&self, path: *const c_char) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().unlink(path),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.unlink(path)),
        };
        finish(r, -1)
    }

    pub unsafe fn mkdir(&self, path: *const c_char, mode: mode_t) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().mkdir(path, mode),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.mkdir(path, mode)),
        };
        finish(r, -1)
    }

    pub unsafe fn rmdir(&self, path: *const c_char) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().rmdir(path),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.rmdir(path)),
        };
        finish(r, -1)
    }

    pub unsafe fn mknod(&self, path: *const c_char, mode: mode_t, dev: dev_t) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().mknod(path, mode, dev),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.mknod(path, mode, dev)),
        };
        finish(r, -1)
    }

    pub unsafe fn statvfs(&self, path: *const c_char, buf: *mut libc::statvfs) -> c_int {
        let Some(path) = c_path(path) else {
            return enoent(-1);
        };
        let r = match self.gate.get() {
            None => self.pass().statvfs(path, buf),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.statvfs(path, buf)),
        };
        finish(r, -1)
    }

    pub unsafe fn opendir(&self, path: *const c_char) -> *mut DIR {
        let Some(path) = c_path(path) else {
            return enoent(ptr::null_mut());
        };
        let r = match self.gate.get() {
            None => self.pass().opendir(path),
            Some(ctx) => self.with_dispatcher(ctx, |d| d.opendir(path)),
        };
        finish(r, ptr::null_mut())
    }

    /// Run `path` with an empty environment, whatever `envp` says.
    ///
    /// The original is looked up again on every call and never cached.
    pub unsafe fn execve(
        &self,
        path: *const c_char,
        argv: *const *const c_char,
        _envp: *const *const c_char,
    ) -> c_int {
        let p = self.resolver.resolve(Op::Execve.symbol());
        if p.is_null() {
            raw::fatal_unresolved(Op::Execve.name());
        }
        let f: ExecveFn = cast_fn(p);
        let empty_env: [*const c_char; 1] = [ptr::null()];
        f(path, argv, empty_env.as_ptr())
    }
}
