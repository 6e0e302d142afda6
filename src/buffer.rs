//! Growable byte buffer with scatter-read-with-spill growth.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

const SPILL_SIZE: usize = 65_535;

/// Contiguous byte region with `read ≤ write ≤ capacity`. Readable span is
/// `[read, write)`, writable span is `[write, capacity)`, prependable space
/// is `[0, read)`.
pub struct Buffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity], read: 0, write: 0 }
    }

    pub fn readable_len(&self) -> usize {
        self.write - self.read
    }

    pub fn writable_len(&self) -> usize {
        self.data.len() - self.write
    }

    fn prependable_len(&self) -> usize {
        self.read
    }

    pub fn peek(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Advances `read` by `n`; resets both indices to 0 once fully drained
    /// so a long-lived connection doesn't creep toward the end of its
    /// backing `Vec`.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.readable_len());
        self.read += n;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
    }

    /// Consumes up to an absolute offset within the readable span, as
    /// returned by a CRLF search over `peek()`.
    pub fn consume_until(&mut self, offset: usize) {
        self.consume(offset - self.read);
    }

    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    pub fn take_all_as_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.reset();
        s
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
    }

    /// Grows capacity to exactly `write + n + 1` if relocating the live
    /// bytes to offset 0 wouldn't free enough room; otherwise compacts in
    /// place without growing.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable_len() >= n {
            return;
        }
        if self.writable_len() + self.prependable_len() >= n {
            let len = self.readable_len();
            self.data.copy_within(self.read..self.write, 0);
            self.read = 0;
            self.write = len;
        } else {
            self.data.resize(self.write + n + 1, 0);
        }
    }

    /// Scatter-reads from `src` into the writable tail plus a 64 KiB stack
    /// spill, so a single syscall drains whatever the kernel has regardless
    /// of current slack. Returns the byte count; the buffer is left
    /// untouched if the read errors.
    pub fn read_from(&mut self, src: &mut impl Read) -> io::Result<usize> {
        let mut spill = [0u8; SPILL_SIZE];
        let writable = self.writable_len();
        let start = self.write;
        let n = {
            let mut slices = [
                IoSliceMut::new(&mut self.data[start..]),
                IoSliceMut::new(&mut spill),
            ];
            src.read_vectored(&mut slices)?
        };
        if n <= writable {
            self.write += n;
        } else {
            self.write = self.data.len();
            self.append(&spill[..n - writable]);
        }
        Ok(n)
    }

    /// Gather-writes the readable span to `dst` and retires exactly the
    /// bytes the syscall accepted.
    pub fn write_to(&mut self, dst: &mut impl Write) -> io::Result<usize> {
        let n = dst.write(self.peek())?;
        self.consume(n);
        Ok(n)
    }

    pub fn as_io_slice(&self) -> IoSlice<'_> {
        IoSlice::new(self.peek())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_peek_roundtrips() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"hello");
        assert_eq!(buf.peek(), b"hello");
    }

    #[test]
    fn consume_reduces_readable_len_by_exactly_n() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"hello world");
        let before = buf.readable_len();
        buf.consume(6);
        assert_eq!(buf.readable_len(), before - 6);
        assert_eq!(buf.peek(), b"world");
    }

    #[test]
    fn invariants_hold_after_operations() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"abcdefgh");
        assert!(buf.read <= buf.write);
        assert!(buf.write <= buf.data.len());
    }

    #[test]
    fn growth_compacts_when_slack_suffices() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.consume(8);
        let cap_before = buf.data.len();
        buf.ensure_writable(12);
        assert_eq!(buf.data.len(), cap_before);
        assert_eq!(buf.read, 0);
    }

    #[test]
    fn growth_expands_to_write_plus_n_plus_one_when_slack_insufficient() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"ab");
        let write_before = buf.write;
        buf.ensure_writable(10);
        assert_eq!(buf.data.len(), write_before + 10 + 1);
    }
}
