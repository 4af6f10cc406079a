//! Allocation-free output that bypasses every intercepted symbol.
//!
//! Once the gate is ready, `write(2)` belongs to the managed backend, so
//! anything this layer prints itself goes straight to the kernel.

use std::fmt::Write as _;
use std::io;

/// Write all of `bytes` to `fd` with `SYS_write`, retrying on `EINTR`.
pub fn raw_write(fd: libc::c_int, mut bytes: &[u8]) -> io::Result<usize> {
    let total = bytes.len();
    while !bytes.is_empty() {
        let n = unsafe {
            libc::syscall(
                libc::SYS_write,
                fd,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        bytes = &bytes[n as usize..];
    }
    Ok(total)
}

/// Format `value` and a newline into a stack buffer and write it to `fd`.
pub fn write_line(fd: libc::c_int, value: &dyn std::fmt::Display) {
    let mut buf = [0u8; 1024];
    let mut writer = StackWriter::new(&mut buf);
    let _ = writeln!(writer, "{}", value);
    let _ = raw_write(fd, writer.as_bytes());
}

/// Report an unresolvable original symbol and abort.
///
/// There is no safe pass-through left for the caller at this point.
pub fn fatal_unresolved(symbol: &str) -> ! {
    let mut buf = [0u8; 256];
    let mut writer = StackWriter::new(&mut buf);
    let _ = writeln!(
        writer,
        "[ime-preload] fatal: no original definition of `{}` in this process",
        symbol
    );
    let _ = raw_write(libc::STDERR_FILENO, writer.as_bytes());
    unsafe { libc::abort() }
}

/// Stderr sink for the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawStderr;

impl io::Write for RawStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        raw_write(libc::STDERR_FILENO, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `fmt::Write` over a fixed byte buffer; output past the end is dropped.
pub struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> StackWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.pos]).unwrap_or("")
    }
}

impl<'a> std::fmt::Write for StackWriter<'a> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buf.len() - self.pos;
        let to_copy = std::cmp::min(bytes.len(), remaining);
        self.buf[self.pos..self.pos + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.pos += to_copy;
        Ok(())
    }
}
