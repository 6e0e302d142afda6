//! Per-socket state: read/write buffers, the in-flight request/response,
//! and the mmap-backed write retirement, grounded on `httpconn.cpp`'s
//! `read`/`write`/`process`.
//!
//! The source's `write` retires bytes from `iov[1]` (the mapped file)
//! before `iov[0]` is fully drained, which corrupts the response whenever
//! a partial `writev` splits mid-header. This version retires `iov[0]`
//! (the header buffer) completely first, then whatever's left of the
//! syscall's return value comes out of `iov[1]` — see spec.md §9.

use std::collections::HashMap;
use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use mio::net::TcpStream;

use crate::buffer::Buffer;
use crate::db_pool::DbPool;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;

const BUF_INIT_CAPACITY: usize = 4096;
/// Below this many pending write bytes, a level-triggered connection stops
/// looping and waits for the next writable notification instead of
/// hammering `write_vectored` for diminishing returns.
const WRITE_LOOP_THRESHOLD: usize = 10 * 1024;

pub struct HttpConn {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    read_buf: Buffer,
    write_buf: Buffer,
    request: HttpRequest,
    response: HttpResponse,
    doc_root: PathBuf,
    error_pages: Arc<HashMap<u16, String>>,
    db: Option<Arc<DbPool>>,
    mmap_offset: usize,
    closed: bool,
}

impl HttpConn {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        doc_root: PathBuf,
        error_pages: Arc<HashMap<u16, String>>,
        db: Option<Arc<DbPool>>,
    ) -> Self {
        Self {
            stream,
            addr,
            read_buf: Buffer::with_capacity(BUF_INIT_CAPACITY),
            write_buf: Buffer::with_capacity(BUF_INIT_CAPACITY),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            doc_root,
            error_pages,
            db,
            mmap_offset: 0,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Idempotent: a connection already torn down by one event source
    /// (e.g. a read error) won't be shut down twice by a later one.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// Drains the socket into `read_buf`. Edge-triggered callers loop
    /// until `WouldBlock`; level-triggered callers take a single pass.
    /// A `0`-byte read (peer half-closed) ends the loop immediately —
    /// the caller treats a `total == 0` first read as connection close.
    pub fn read(&mut self, edge_triggered: bool) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            match self.read_buf.read_from(&mut self.stream) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    total += n;
                    if !edge_triggered {
                        return Ok(total);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    }

    /// Bytes still owed to the peer: the unsent tail of the header
    /// buffer plus the unsent tail of the mapped file.
    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable_len() + self.mmap_remaining()
    }

    fn mmap_remaining(&self) -> usize {
        self.response.file_mapping().map(|m| m.len()).unwrap_or(0).saturating_sub(self.mmap_offset)
    }

    /// One or more `write_vectored` calls against `[write_buf, mmap]`.
    /// Each call retires `iov[0]` first: the write buffer is consumed by
    /// `min(n, iov[0].len())` bytes, and only the remainder of `n`
    /// advances the mmap offset — never the other way around.
    pub fn write(&mut self, edge_triggered: bool) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            if self.to_write_bytes() == 0 {
                return Ok(total);
            }
            let iov0_len = self.write_buf.readable_len();
            let n = {
                let iov0 = self.write_buf.peek();
                let mmap_slice = self.response.file_mapping().unwrap_or(&[]);
                let start = self.mmap_offset.min(mmap_slice.len());
                let iov1 = &mmap_slice[start..];
                let slices = [IoSlice::new(iov0), IoSlice::new(iov1)];
                match self.stream.write_vectored(&slices) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                return Ok(total);
            }
            total += n;
            if n <= iov0_len {
                self.write_buf.consume(n);
            } else {
                self.write_buf.consume(iov0_len);
                self.mmap_offset += n - iov0_len;
            }
            if !edge_triggered && self.to_write_bytes() <= WRITE_LOOP_THRESHOLD {
                return Ok(total);
            }
        }
    }

    /// Parses as much of `read_buf` as is buffered and, once a full
    /// request lands, builds the response into `write_buf`. Returns
    /// `false` when more bytes are needed before anything can be built
    /// (the caller leaves the connection registered for readability).
    pub fn process(&mut self) -> bool {
        self.request.init();
        if self.read_buf.readable_len() == 0 {
            return false;
        }
        match self.request.parse(&mut self.read_buf, self.db.as_deref()) {
            Ok(true) => {
                self.response.init(self.doc_root.clone(), self.request.path.clone(), self.request.is_keep_alive(), -1);
            }
            Ok(false) => return false,
            Err(_) => {
                self.response.init(self.doc_root.clone(), self.request.path.clone(), false, 400);
            }
        }
        self.write_buf.reset();
        self.mmap_offset = 0;
        self.response.build(&mut self.write_buf, self.error_pages.as_ref());
        true
    }

    pub fn is_keep_alive(&self) -> bool {
        self.response.keep_alive()
    }
}
