//! Bounded text rendering for diagnostic output.
//!
//! Diagnostics end up on a serial console or a small display, so rendering
//! goes into caller-owned fixed buffers. Output that does not fit is cut at
//! the last whole character; nothing is ever written past the buffer.

use core::fmt;

/// `fmt::Write` sink over a byte slice that silently drops overflow.
struct SliceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl fmt::Write for SliceWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.pos;
        let mut n = s.len().min(room);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.buf[self.pos..self.pos + n].copy_from_slice(&s.as_bytes()[..n]);
        self.pos += n;
        Ok(())
    }
}

/// Renders `args` into `buf` as a NUL-terminated string.
///
/// At most `buf.len() - 1` bytes of text are written, followed by a `0`
/// terminator. The returned `&str` covers the text without the terminator.
/// An empty buffer receives nothing and yields `""`.
///
/// # Example
///
/// ```rust
/// use rs_dcc::text::write_c_str;
///
/// let mut buf = [0xaa_u8; 6];
/// let s = write_c_str(&mut buf, format_args!("reset {}", 42));
/// assert_eq!(s, "reset");
/// assert_eq!(buf[5], 0);
/// ```
pub fn write_c_str<'b>(buf: &'b mut [u8], args: fmt::Arguments<'_>) -> &'b str {
    let Some(cap) = buf.len().checked_sub(1) else {
        return "";
    };
    let len = {
        let mut w = SliceWriter {
            buf: &mut buf[..cap],
            pos: 0,
        };
        let _ = fmt::write(&mut w, args);
        w.pos
    };
    buf[len] = 0;
    core::str::from_utf8(&buf[..len]).unwrap_or("")
}

/// `fmt::Write` sink over a `heapless::String` that stops when full.
struct StringWriter<'a, const N: usize>(&'a mut heapless::String<N>);

impl<const N: usize> fmt::Write for StringWriter<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Renders `args` into a fixed-capacity string, truncating at `N` bytes.
pub fn bounded_string<const N: usize>(args: fmt::Arguments<'_>) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let _ = fmt::write(&mut StringWriter(&mut out), args);
    out
}
