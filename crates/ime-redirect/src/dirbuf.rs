//! Directory stream buffer growth.
//!
//! glibc's `DIR` is a fixed header followed by the getdents buffer, sized by
//! the `allocation` field. Listings served from the backing filesystem are
//! large, so a freshly opened stream is moved into a block with a bigger
//! trailing buffer before anything has been read from it.
//!
//! Only the header travels: the old buffer holds nothing yet. The descriptor
//! is not closed; the old block is released with `free(3)` exactly as
//! `closedir(3)` would have.

use libc::{c_int, off_t, size_t, DIR};
use std::mem;
use std::ptr;

/// Target capacity of a grown directory buffer.
pub const LARGE_DIR_BUFFER_SIZE: usize = 1 << 20;

/// Alignment of the trailing buffer (`max_align_t`).
const DATA_ALIGN: usize = 16;

/// Leading fields of glibc's `struct __dirstream`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirHeader {
    pub fd: c_int,
    pub lock: c_int,
    pub allocation: size_t,
    pub size: size_t,
    pub offset: size_t,
    pub filepos: off_t,
    pub errcode: c_int,
}

/// Byte offset of the trailing buffer inside a `DIR` block.
pub const DIR_DATA_OFFSET: usize =
    (mem::size_of::<DirHeader>() + DATA_ALIGN - 1) & !(DATA_ALIGN - 1);

/// Allocator for `DIR` blocks. Whatever it hands out must be releasable by
/// `closedir(3)`.
pub trait DirAllocator {
    /// Zeroed block of `size` bytes, or null.
    unsafe fn alloc_zeroed(&self, size: usize) -> *mut u8;
    unsafe fn release(&self, block: *mut u8);
}

/// `calloc`/`free`, the pair glibc itself uses for `DIR`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAllocator;

impl DirAllocator for LibcAllocator {
    unsafe fn alloc_zeroed(&self, size: usize) -> *mut u8 {
        libc::calloc(1, size) as *mut u8
    }

    unsafe fn release(&self, block: *mut u8) {
        libc::free(block as *mut libc::c_void)
    }
}

/// Copy of the header of `dir`.
///
/// # Safety
/// `dir` must be a live glibc directory stream.
pub unsafe fn header(dir: *const DIR) -> DirHeader {
    ptr::read(dir as *const DirHeader)
}

/// Move `dir` into a block whose buffer holds `capacity` bytes.
///
/// Returns the replacement stream, or `dir` untouched when the allocation
/// fails or the stream is already at least that large. The caller must not
/// use `dir` again if a different pointer comes back.
///
/// # Safety
/// `dir` must come straight from `opendir(3)`, with no entries read yet, and
/// must not be visible to any other thread.
pub unsafe fn grow<A: DirAllocator + ?Sized>(dir: *mut DIR, capacity: usize, alloc: &A) -> *mut DIR {
    if dir.is_null() || !cfg!(all(target_os = "linux", target_env = "gnu")) {
        return dir;
    }

    let old = header(dir);
    if old.allocation >= capacity {
        return dir;
    }
    let Some(total) = DIR_DATA_OFFSET.checked_add(capacity) else {
        return dir;
    };

    let block = alloc.alloc_zeroed(total);
    if block.is_null() {
        return dir;
    }

    let grown = DirHeader {
        allocation: capacity,
        ..old
    };
    ptr::write(block as *mut DirHeader, grown);
    alloc.release(dir as *mut u8);

    block as *mut DIR
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingAllocator;

    impl DirAllocator for FailingAllocator {
        unsafe fn alloc_zeroed(&self, _size: usize) -> *mut u8 {
            ptr::null_mut()
        }

        unsafe fn release(&self, _block: *mut u8) {
            panic!("nothing should be released when allocation fails");
        }
    }

    unsafe fn fake_dir(h: DirHeader) -> *mut DIR {
        let block = LibcAllocator.alloc_zeroed(DIR_DATA_OFFSET + h.allocation);
        assert!(!block.is_null());
        ptr::write(block as *mut DirHeader, h);
        block as *mut DIR
    }

    fn sample_header() -> DirHeader {
        DirHeader {
            fd: 42,
            lock: 0,
            allocation: 32768,
            size: 0,
            offset: 0,
            filepos: 0,
            errcode: 0,
        }
    }

    #[test]
    fn test_data_offset_is_aligned() {
        assert_eq!(DIR_DATA_OFFSET % DATA_ALIGN, 0);
        assert!(DIR_DATA_OFFSET >= mem::size_of::<DirHeader>());
    }

    #[test]
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn test_grow_preserves_header() {
        unsafe {
            let h = DirHeader {
                filepos: 1234,
                ..sample_header()
            };
            let dir = fake_dir(h);
            let grown = grow(dir, LARGE_DIR_BUFFER_SIZE, &LibcAllocator);
            assert_ne!(grown, dir);

            let after = header(grown);
            assert_eq!(after.allocation, LARGE_DIR_BUFFER_SIZE);
            assert_eq!(DirHeader { allocation: h.allocation, ..after }, h);
            LibcAllocator.release(grown as *mut u8);
        }
    }

    #[test]
    fn test_allocation_failure_keeps_original() {
        unsafe {
            let dir = fake_dir(sample_header());
            let same = grow(dir, LARGE_DIR_BUFFER_SIZE, &FailingAllocator);
            assert_eq!(same, dir);
            assert_eq!(header(same), sample_header());
            LibcAllocator.release(dir as *mut u8);
        }
    }

    #[test]
    fn test_never_shrinks() {
        unsafe {
            let big = DirHeader {
                allocation: 2 * LARGE_DIR_BUFFER_SIZE,
                ..sample_header()
            };
            let dir = fake_dir(big);
            assert_eq!(grow(dir, LARGE_DIR_BUFFER_SIZE, &FailingAllocator), dir);
            LibcAllocator.release(dir as *mut u8);
        }
    }

    #[test]
    fn test_null_passes_through() {
        let dir = unsafe { grow(ptr::null_mut(), LARGE_DIR_BUFFER_SIZE, &FailingAllocator) };
        assert!(dir.is_null());
    }

    /// A real glibc stream must still list its directory after growth.
    #[test]
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn test_real_stream_reads_after_grow() {
        use std::collections::BTreeSet;
        use std::ffi::{CStr, CString};
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(tmp.path().join(name), b"").unwrap();
        }
        let c_dir = CString::new(tmp.path().as_os_str().as_bytes()).unwrap();

        unsafe {
            let dir = libc::opendir(c_dir.as_ptr());
            assert!(!dir.is_null());
            let fd_before = libc::dirfd(dir);

            let dir = grow(dir, LARGE_DIR_BUFFER_SIZE, &LibcAllocator);
            assert_eq!(header(dir).allocation, LARGE_DIR_BUFFER_SIZE);
            assert_eq!(libc::dirfd(dir), fd_before);

            let mut names = BTreeSet::new();
            loop {
                let ent = libc::readdir(dir);
                if ent.is_null() {
                    break;
                }
                let name = CStr::from_ptr((*ent).d_name.as_ptr()).to_string_lossy().into_owned();
                names.insert(name);
            }
            assert_eq!(libc::closedir(dir), 0);

            for name in ["a", "b", "c"] {
                assert!(names.contains(name), "missing {}", name);
            }
        }
    }
}
