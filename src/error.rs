use std::fmt::{self, Debug, Display, Formatter};

/// Every fault kind the reactor, parser, and collaborators can raise.
/// `IoWouldBlock` has no variant here by design — it is matched inline on
/// `io::ErrorKind::WouldBlock` at call sites and never boxed into a value
/// that crosses a rearm boundary.
#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("malformed request: {0}")]
    Parse(#[from] crate::http::request::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("resource not found")]
    NotFound,
    #[error("resource forbidden")]
    Forbidden,
    #[error("connection limit reached")]
    ResourceExhausted,
    #[error("database error: {0}")]
    Db(#[from] mysql::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Colorizes a fatal startup error the way a terminal-facing CLI should;
/// mirrors the ANSI-red "ERROR: " prefix the teacher's `CleanError` used.
pub struct BootError(pub ServerError);

impl Debug for BootError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Display for BootError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<ServerError> for BootError {
    fn from(e: ServerError) -> Self {
        BootError(e)
    }
}
