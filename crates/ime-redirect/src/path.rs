use libc::c_char;
use std::ffi::CStr;
use std::fmt;

use crate::ops::ManagedBackend;
use crate::{Errno, SysResult};

pub const PATH_MAX: usize = libc::PATH_MAX as usize;

/// NUL-terminated path in a `PATH_MAX` stack buffer.
///
/// Holds either a namespace-relative suffix filled in by the backend or a
/// fully qualified backing-store path. Never heap-allocates.
pub struct FixedPath {
    data: [u8; PATH_MAX],
    len: usize,
}

impl FixedPath {
    pub const fn new() -> Self {
        Self {
            data: [0u8; PATH_MAX],
            len: 0,
        }
    }

    /// `root` followed by `suffix`. `ENAMETOOLONG` if the result and its NUL
    /// do not fit.
    pub fn join(root: &[u8], suffix: &[u8]) -> SysResult<Self> {
        let mut out = Self::new();
        out.push(root)?;
        out.push(suffix)?;
        Ok(out)
    }

    pub fn push(&mut self, bytes: &[u8]) -> SysResult<()> {
        if bytes.contains(&0) {
            return Err(Errno::EINVAL);
        }
        let end = self.len + bytes.len();
        if end >= PATH_MAX {
            return Err(Errno::ENAMETOOLONG);
        }
        self.data[self.len..end].copy_from_slice(bytes);
        self.data[end] = 0;
        self.len = end;
        Ok(())
    }

    /// Buffer for a C callee that writes a NUL-terminated string of at most
    /// `PATH_MAX` bytes. Call [`sync_len`](Self::sync_len) afterwards.
    pub fn as_mut_c_buf(&mut self) -> *mut c_char {
        self.data.as_mut_ptr() as *mut c_char
    }

    /// Recompute the length after a C callee filled the buffer.
    pub fn sync_len(&mut self) {
        self.data[PATH_MAX - 1] = 0;
        self.len = self.data.iter().position(|b| *b == 0).unwrap_or(PATH_MAX - 1);
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.data[0] = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_cstr(&self) -> &CStr {
        // push() refuses interior NULs and always terminates
        unsafe { CStr::from_bytes_with_nul_unchecked(&self.data[..=self.len]) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for FixedPath {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FixedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for FixedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Decides whether a path is managed and maps it into the backing store.
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    backing_root: Option<&'a str>,
}

impl<'a> Classifier<'a> {
    pub fn new(backing_root: Option<&'a str>) -> Self {
        Self { backing_root }
    }

    /// Backing-store equivalent of `path`, or `None` for pass-through.
    ///
    /// `enabled` is the feature flag guarding the calling redirection. When
    /// it is off, or no backing root is configured, the backend is not asked.
    pub fn convert<B: ManagedBackend + ?Sized>(
        &self,
        enabled: bool,
        path: &CStr,
        backend: &B,
    ) -> SysResult<Option<FixedPath>> {
        if !enabled {
            return Ok(None);
        }
        let Some(root) = self.backing_root else {
            return Ok(None);
        };

        let mut suffix = FixedPath::new();
        if !backend.classify(path, &mut suffix) {
            return Ok(None);
        }
        FixedPath::join(root.as_bytes(), suffix.as_bytes()).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        let p = FixedPath::join(b"/bfs", b"/data/f.txt").unwrap();
        assert_eq!(p.as_bytes(), b"/bfs/data/f.txt");
        assert_eq!(p.as_cstr(), c"/bfs/data/f.txt");
        assert_eq!(p.len(), 15);
    }

    #[test]
    fn test_join_too_long() {
        let root = vec![b'a'; PATH_MAX - 4];
        assert_eq!(
            FixedPath::join(&root, b"/abc").err(),
            Some(Errno::ENAMETOOLONG)
        );
        // Exactly PATH_MAX - 1 bytes still fits with its NUL
        let p = FixedPath::join(&root, b"/ab").unwrap();
        assert_eq!(p.len(), PATH_MAX - 1);
    }

    #[test]
    fn test_interior_nul_rejected() {
        let mut p = FixedPath::new();
        assert_eq!(p.push(b"a\0b"), Err(Errno::EINVAL));
        assert!(p.is_empty());
    }

    #[test]
    fn test_sync_len_after_c_fill() {
        let mut p = FixedPath::new();
        let src = c"/data/f.txt";
        unsafe {
            libc::strcpy(p.as_mut_c_buf(), src.as_ptr());
        }
        p.sync_len();
        assert_eq!(p.as_cstr(), src);
    }

    #[test]
    fn test_clear() {
        let mut p = FixedPath::join(b"/a", b"/b").unwrap();
        p.clear();
        assert!(p.is_empty());
        assert_eq!(p.as_cstr(), c"");
    }
}
