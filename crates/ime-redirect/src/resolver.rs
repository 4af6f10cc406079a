//! Real Symbol Storage
//!
//! Provides access to the original libc definitions of every intercepted
//! function without recursing into this layer's own exports.
//!
//! Each [`Op`] owns one [`RealSymbol`] slot in the [`SymbolTable`]. A slot is
//! filled at most once per value (by the bootstrap pre-population or by the
//! first pre-init call that needs it) and is never cleared. Concurrent lazy
//! fills race benignly: every resolver answer for a name is the same pointer.

use libc::c_void;
use std::ffi::CStr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Looks up the next definition of a symbol after this layer.
pub trait SymbolResolver: Sync {
    /// Null when no such symbol exists anywhere in the process.
    fn resolve(&self, name: &CStr) -> *mut c_void;
}

/// `dlsym(RTLD_NEXT, ..)`: the standard dynamic-link search order starting
/// after the object that contains this code.
#[derive(Debug, Default, Clone, Copy)]
pub struct NextSymbol;

impl SymbolResolver for NextSymbol {
    fn resolve(&self, name: &CStr) -> *mut c_void {
        unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
    }
}

/// Every intercepted entry point, plus the start hook it chains to.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open = 0,
    Open2,
    Read,
    Write,
    Close,
    Fsync,
    Stat,
    Lstat,
    Access,
    Lseek,
    Unlink,
    Mkdir,
    Rmdir,
    Mknod,
    Statvfs,
    Opendir,
    Execve,
    LibcStartMain,
}

impl Op {
    pub const COUNT: usize = 18;

    pub const ALL: [Op; Op::COUNT] = [
        Op::Open,
        Op::Open2,
        Op::Read,
        Op::Write,
        Op::Close,
        Op::Fsync,
        Op::Stat,
        Op::Lstat,
        Op::Access,
        Op::Lseek,
        Op::Unlink,
        Op::Mkdir,
        Op::Rmdir,
        Op::Mknod,
        Op::Statvfs,
        Op::Opendir,
        Op::Execve,
        Op::LibcStartMain,
    ];

    pub const fn symbol(self) -> &'static CStr {
        match self {
            Op::Open => c"open",
            Op::Open2 => c"__open_2",
            Op::Read => c"read",
            Op::Write => c"write",
            Op::Close => c"close",
            Op::Fsync => c"fsync",
            Op::Stat => c"stat",
            Op::Lstat => c"lstat",
            Op::Access => c"access",
            Op::Lseek => c"lseek",
            Op::Unlink => c"unlink",
            Op::Mkdir => c"mkdir",
            Op::Rmdir => c"rmdir",
            Op::Mknod => c"mknod",
            Op::Statvfs => c"statvfs",
            Op::Opendir => c"opendir",
            Op::Execve => c"execve",
            Op::LibcStartMain => c"__libc_start_main",
        }
    }

    pub fn name(self) -> &'static str {
        self.symbol().to_str().unwrap_or("?")
    }

    /// execve is re-resolved on every call and never read from the table.
    pub const fn is_cached(self) -> bool {
        !matches!(self, Op::Execve)
    }
}

/// One cached original-function pointer.
pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
}

impl RealSymbol {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Cached pointer, resolving `name` on first use.
    pub fn get<R: SymbolResolver + ?Sized>(&self, name: &CStr, resolver: &R) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        let f = resolver.resolve(name);
        if !f.is_null() {
            self.ptr.store(f, Ordering::Release);
        }
        f
    }

    pub fn cached(&self) -> *mut c_void {
        self.ptr.load(Ordering::Acquire)
    }
}

impl Default for RealSymbol {
    fn default() -> Self {
        Self::new()
    }
}

/// Indirection table from [`Op`] to the libc definition it shadows.
pub struct SymbolTable {
    slots: [RealSymbol; Op::COUNT],
}

impl SymbolTable {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: RealSymbol = RealSymbol::new();
        Self {
            slots: [EMPTY; Op::COUNT],
        }
    }

    pub fn get<R: SymbolResolver + ?Sized>(&self, op: Op, resolver: &R) -> *mut c_void {
        self.slots[op as usize].get(op.symbol(), resolver)
    }

    pub fn is_resolved(&self, op: Op) -> bool {
        !self.slots[op as usize].cached().is_null()
    }

    /// Resolve every cached slot up front. Returns the ops that could not be
    /// found; those stay empty and abort only if actually called.
    pub fn populate<R: SymbolResolver + ?Sized>(&self, resolver: &R) -> Vec<Op> {
        Op::ALL
            .iter()
            .copied()
            .filter(|op| op.is_cached())
            .filter(|op| self.get(*op, resolver).is_null())
            .collect()
    }

    pub fn resolved_count(&self) -> usize {
        Op::ALL.iter().filter(|op| self.is_resolved(**op)).count()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Reinterpret a resolved symbol as the function type `F`.
///
/// # Safety
/// `p` must be non-null and point at a function whose ABI matches `F`.
#[inline]
pub unsafe fn cast_fn<F: Copy>(p: *mut c_void) -> F {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*mut c_void>());
    std::mem::transmute_copy::<*mut c_void, F>(&p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingResolver {
        calls: AtomicUsize,
        answer: *mut c_void,
    }

    unsafe impl Sync for CountingResolver {}

    impl SymbolResolver for CountingResolver {
        fn resolve(&self, _name: &CStr) -> *mut c_void {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.answer
        }
    }

    #[test]
    fn test_op_table_is_complete() {
        for (i, op) in Op::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
        assert_eq!(Op::Open2.name(), "__open_2");
        assert_eq!(Op::LibcStartMain.name(), "__libc_start_main");
    }

    #[test]
    fn test_real_symbol_caches() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            answer: 0x1000 as *mut c_void,
        };
        let slot = RealSymbol::new();
        assert_eq!(slot.get(c"open", &resolver), 0x1000 as *mut c_void);
        assert_eq!(slot.get(c"open", &resolver), 0x1000 as *mut c_void);
        assert_eq!(resolver.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_missing_symbol_is_not_cached() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            answer: std::ptr::null_mut(),
        };
        let slot = RealSymbol::new();
        assert!(slot.get(c"nope", &resolver).is_null());
        assert!(slot.get(c"nope", &resolver).is_null());
        assert_eq!(resolver.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_populate_skips_execve() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
            answer: 0x2000 as *mut c_void,
        };
        let table = SymbolTable::new();
        assert!(table.populate(&resolver).is_empty());
        assert!(!table.is_resolved(Op::Execve));
        assert!(table.is_resolved(Op::Opendir));
        assert_eq!(table.resolved_count(), Op::COUNT - 1);
    }

    #[test]
    fn test_next_symbol_finds_libc() {
        let p = NextSymbol.resolve(c"getpid");
        assert!(!p.is_null());
        let getpid: unsafe extern "C" fn() -> libc::pid_t = unsafe { cast_fn(p) };
        assert_eq!(unsafe { getpid() }, std::process::id() as libc::pid_t);
    }

    #[test]
    fn test_next_symbol_unknown_is_null() {
        assert!(NextSymbol.resolve(c"ime_no_such_symbol_anywhere").is_null());
    }
}
