//! Status-line/header builder and mmap-backed file body, grounded on
//! `httpresponse.cpp`'s `MakeResponse`/`AddHeader_`/`AddContent_` sequence.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::buffer::Buffer;

const WORLD_READ: u32 = 0o004;

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Unknown",
    }
}

/// Last-dot-suffix lookup against the fixed table; unknown → `text/plain`.
fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html",
        "xml" => "text/xml",
        "xhtml" => "application/xhtml+xml",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        "pdf" => "application/pdf",
        "word" => "application/nsword",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "au" => "audio/basic",
        "mpeg" | "mpg" => "video/mpeg",
        "avi" => "video/x-msvideo",
        "gz" => "application/x-gzip",
        "tar" => "application/x-tar",
        "css" => "text/css",
        "js" => "text/javascript",
        _ => "text/plain",
    }
}

/// Sentinel for "not yet decided" — mirrors the source's `code_ == -1`.
const UNSET: i32 = -1;

pub struct HttpResponse {
    code: i32,
    keep_alive: bool,
    path: String,
    doc_root: PathBuf,
    file_len: u64,
    mmap: Option<Mmap>,
}

impl HttpResponse {
    pub fn new() -> Self {
        Self { code: UNSET, keep_alive: false, path: String::new(), doc_root: PathBuf::new(), file_len: 0, mmap: None }
    }

    /// Resets state and releases any prior mapping before the connection's
    /// next request reuses this response.
    pub fn init(&mut self, doc_root: impl Into<PathBuf>, path: impl Into<String>, keep_alive: bool, code: i32) {
        self.mmap = None;
        self.doc_root = doc_root.into();
        self.path = path.into();
        self.keep_alive = keep_alive;
        self.code = code;
        self.file_len = 0;
    }

    pub fn status_code(&self) -> u16 {
        if self.code < 0 { 200 } else { self.code as u16 }
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn file_mapping(&self) -> Option<&[u8]> {
        self.mmap.as_deref()
    }

    fn resolved_path(&self) -> PathBuf {
        self.doc_root.join(self.path.trim_start_matches('/'))
    }

    /// File-stat-driven status detection (404/403/200) runs only while
    /// `code` is still the sentinel: a caller that already knows the
    /// status (e.g. 400 on a malformed request line) keeps it, and the
    /// file lookup below degenerates to an inline error body rather than
    /// a second, file-system-driven opinion about what the code should be.
    pub fn build(&mut self, write_buf: &mut Buffer, error_pages: &HashMap<u16, String>) {
        let mut full_path = self.resolved_path();
        if self.code == UNSET {
            match std::fs::metadata(&full_path) {
                Ok(meta) if meta.is_dir() => self.code = 404,
                Ok(meta) if meta.mode() & WORLD_READ == 0 => self.code = 403,
                Ok(_) => self.code = 200,
                Err(_) => self.code = 404,
            }
        }

        let code = self.code as u16;
        if let Some(error_page) = error_pages.get(&code) {
            self.path = error_page.clone();
            full_path = self.resolved_path();
        }

        write_buf.append(format!("HTTP/1.1 {} {}\r\n", self.status_code(), reason_phrase(self.status_code())).as_bytes());
        if self.keep_alive {
            write_buf.append(b"Connection: keep-alive\r\n");
            write_buf.append(b"keep-alive: max=6, timeout=120\r\n");
        } else {
            write_buf.append(b"Connection: close\r\n");
        }
        write_buf.append(format!("Content-type: {}\r\n", mime_type(&full_path)).as_bytes());

        match File::open(&full_path) {
            Ok(file) => match unsafe { memmap2::MmapOptions::new().map_copy_read_only(&file) } {
                Ok(mmap) => {
                    self.file_len = mmap.len() as u64;
                    self.mmap = Some(mmap);
                    write_buf.append(format!("Content-length: {}\r\n\r\n", self.file_len).as_bytes());
                }
                Err(_) => self.write_inline_error(write_buf),
            },
            Err(_) => self.write_inline_error(write_buf),
        }
    }

    fn write_inline_error(&mut self, write_buf: &mut Buffer) {
        let body = format!(
            "<html><head><title>{code} {reason}</title></head><body>{code} {reason}</body></html>",
            code = self.status_code(),
            reason = reason_phrase(self.status_code())
        );
        write_buf.append(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
        write_buf.append(body.as_bytes());
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn mime_table_matches_known_extensions() {
        assert_eq!(mime_type(Path::new("a.html")), "text/html");
        assert_eq!(mime_type(Path::new("a.css")), "text/css");
        assert_eq!(mime_type(Path::new("a.unknownext")), "text/plain");
    }

    #[test]
    fn missing_file_yields_404() {
        let dir = std::env::temp_dir().join(format!("webserver_test_missing_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut resp = HttpResponse::new();
        resp.init(dir.clone(), "/nope.html", true, UNSET);
        let mut buf = Buffer::with_capacity(512);
        resp.build(&mut buf, &HashMap::new());
        assert_eq!(resp.status_code(), 404);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unreadable_file_yields_403() {
        let dir = std::env::temp_dir().join(format!("webserver_test_403_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("secret.html");
        {
            let mut f = File::create(&file_path).unwrap();
            f.write_all(b"top secret").unwrap();
        }
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let mut resp = HttpResponse::new();
        resp.init(dir.clone(), "/secret.html", true, UNSET);
        let mut buf = Buffer::with_capacity(512);
        resp.build(&mut buf, &HashMap::new());
        assert_eq!(resp.status_code(), 403);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn existing_world_readable_file_yields_200_with_mapping() {
        let dir = std::env::temp_dir().join(format!("webserver_test_200_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("index.html");
        {
            let mut f = File::create(&file_path).unwrap();
            f.write_all(b"<html>hi</html>").unwrap();
        }
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let mut resp = HttpResponse::new();
        resp.init(dir.clone(), "/index.html", true, UNSET);
        let mut buf = Buffer::with_capacity(512);
        resp.build(&mut buf, &HashMap::new());
        assert_eq!(resp.status_code(), 200);
        assert!(resp.file_mapping().is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
