//! Incremental HTTP/1.1 request parser: request-line → headers → body.
//!
//! Resumable over a persistent [`Buffer`](crate::buffer::Buffer): a partial
//! buffer leaves state unchanged and the next read continues where it left
//! off, matching the source's `ParsePath_`/`ParseRequestLine_`/`ParseHeader_`
//! flow minus the chunked/multipart machinery spec.md excludes.

use std::collections::HashMap;
use std::fmt;

use crate::buffer::Buffer;
use crate::db_pool::DbPool;
use crate::user_verify;

const SHORT_NAMES: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    BadRequestLine,
    #[error("unsupported method")]
    UnsupportedMethod,
    #[error("malformed header line")]
    BadHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsingState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub post: HashMap<String, String>,
    pub body: String,
    state: ParsingState,
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            method: Method::Get,
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            post: HashMap::new(),
            body: String::new(),
            state: ParsingState::RequestLine,
        }
    }

    /// Resets every field to a freshly-constructed value — bit-equal to
    /// `HttpRequest::new()`.
    pub fn init(&mut self) {
        *self = Self::new();
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParsingState::Finish
    }

    pub fn is_keep_alive(&self) -> bool {
        self.version == "1.1"
            && self.headers.get("Connection").map(|v| v.eq_ignore_ascii_case("keep-alive")).unwrap_or(false)
    }

    /// Drives the state machine as far as the buffered bytes allow. Returns
    /// `Ok(true)` once `Finish` is reached, `Ok(false)` if more bytes are
    /// needed, `Err` on a malformed request line or header.
    pub fn parse(&mut self, buf: &mut Buffer, db: Option<&DbPool>) -> Result<bool, ParseError> {
        loop {
            match self.state {
                ParsingState::Finish => return Ok(true),
                ParsingState::RequestLine => {
                    let Some(line_end) = find_crlf(buf.peek()) else { return Ok(false) };
                    self.parse_request_line(&buf.peek()[..line_end])?;
                    buf.consume(line_end + 2);
                    self.state = ParsingState::Headers;
                }
                ParsingState::Headers => {
                    let Some(line_end) = find_crlf(buf.peek()) else { return Ok(false) };
                    if line_end == 0 {
                        buf.consume(2);
                        self.state =
                            if buf.readable_len() <= 2 { ParsingState::Finish } else { ParsingState::Body };
                    } else {
                        self.parse_header_line(&buf.peek()[..line_end])?;
                        buf.consume(line_end + 2);
                    }
                }
                ParsingState::Body => {
                    self.body = buf.take_all_as_string();
                    if self.method == Method::Post
                        && self
                            .headers
                            .get("Content-Type")
                            .map(|v| v.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
                            .unwrap_or(false)
                    {
                        self.decode_form_body();
                        self.run_user_verification(db);
                    }
                    self.state = ParsingState::Finish;
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::BadRequestLine)?;
        let mut parts = line.splitn(3, ' ');
        let (Some(method), Some(path), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::BadRequestLine);
        };
        let version = version.strip_prefix("HTTP/").ok_or(ParseError::BadRequestLine)?;
        self.method = match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => return Err(ParseError::UnsupportedMethod),
        };
        self.path = normalize_path(path);
        self.version = version.to_string();
        Ok(())
    }

    fn parse_header_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::BadHeader)?;
        let idx = line.find(':').ok_or(ParseError::BadHeader)?;
        let name = line[..idx].trim().to_string();
        let value = line[idx + 1..].strip_prefix(' ').unwrap_or(&line[idx + 1..]).to_string();
        self.headers.insert(name, value);
        Ok(())
    }

    fn decode_form_body(&mut self) {
        for pair in self.body.split('&') {
            if pair.is_empty() {
                continue;
            }
            let mut kv = pair.splitn(2, '=');
            let key = kv.next().unwrap_or_default();
            let value = kv.next().unwrap_or_default();
            self.post.insert(url_decode(key), url_decode(value));
        }
    }

    fn run_user_verification(&mut self, db: Option<&DbPool>) {
        let is_login = match self.path.as_str() {
            "/login.html" => true,
            "/register.html" => false,
            _ => return,
        };
        let Some(db) = db else { return };
        let username = self.post.get("username").cloned().unwrap_or_default();
        let password = self.post.get("password").cloned().unwrap_or_default();
        let ok = user_verify::verify(db, &username, &password, is_login);
        self.path = if ok { "/welcome.html".to_string() } else { "/error.html".to_string() };
    }
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// `""`/`"/"` → `/index.html`; the remaining short names gain a `.html`
/// suffix; everything else passes through unchanged.
fn normalize_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/index.html".to_string();
    }
    if SHORT_NAMES.contains(&path) {
        return format!("{path}.html");
    }
    path.to_string()
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buf: &mut Buffer, bytes: &[u8]) {
        buf.append(bytes);
    }

    #[test]
    fn parses_simple_get_request() {
        let mut buf = Buffer::with_capacity(256);
        feed(&mut buf, b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
        let mut req = HttpRequest::new();
        assert_eq!(req.parse(&mut buf, None).unwrap(), true);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.version, "1.1");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn path_normalization_boundaries() {
        assert_eq!(normalize_path(""), "/index.html");
        assert_eq!(normalize_path("/"), "/index.html");
        assert_eq!(normalize_path("/index"), "/index.html");
        assert_eq!(normalize_path("/index.html"), "/index.html");
    }

    #[test]
    fn parser_is_resumable_byte_at_a_time() {
        let whole = b"GET /login HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();
        let mut one_shot_buf = Buffer::with_capacity(256);
        one_shot_buf.append(&whole);
        let mut one_shot_req = HttpRequest::new();
        one_shot_req.parse(&mut one_shot_buf, None).unwrap();

        let mut incremental_buf = Buffer::with_capacity(256);
        let mut incremental_req = HttpRequest::new();
        for &b in &whole {
            incremental_buf.append(&[b]);
            incremental_req.parse(&mut incremental_buf, None).unwrap();
        }
        assert_eq!(one_shot_req.path, incremental_req.path);
        assert_eq!(one_shot_req.version, incremental_req.version);
        assert!(incremental_req.is_finished());
    }

    #[test]
    fn malformed_request_line_errors() {
        let mut buf = Buffer::with_capacity(64);
        feed(&mut buf, b"GET /\r\n\r\n");
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf, None).is_err());
    }

    #[test]
    fn form_body_round_trips_percent_and_plus_encoding() {
        let mut buf = Buffer::with_capacity(256);
        let body = b"username=alice+bob&password=hu%6eter2";
        let request = format!(
            "POST /register.html HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        feed(&mut buf, request.as_bytes());
        feed(&mut buf, body);
        let mut req = HttpRequest::new();
        req.parse(&mut buf, None).unwrap();
        assert_eq!(req.post.get("username").unwrap(), "alice bob");
        assert_eq!(req.post.get("password").unwrap(), "hunter2");
    }

    #[test]
    fn init_resets_to_fresh_state() {
        let mut buf = Buffer::with_capacity(64);
        feed(&mut buf, b"GET / HTTP/1.1\r\n\r\n");
        let mut req = HttpRequest::new();
        req.parse(&mut buf, None).unwrap();
        req.init();
        assert_eq!(req.path, "");
        assert_eq!(req.method, Method::Get);
        assert!(req.headers.is_empty());
    }
}
