//! Double-buffered, level-filtered, daily-rotating log sink.
//!
//! A background writer thread drains a bounded queue of already-formatted
//! lines and appends them to the active log file, rotating by day and by
//! line count. Call [`init`] once at process startup; the [`log_debug`],
//! [`log_info`], [`log_warn`] and [`log_error`] macros are no-ops until then.

use chrono::Local;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread;

const MAX_LINES_PER_FILE: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    fn title(self) -> &'static str {
        match self {
            Level::Debug => "[debug]: ",
            Level::Info => "[info] : ",
            Level::Warn => "[warn] : ",
            Level::Error => "[error]: ",
        }
    }
}

/// A bounded deque guarded by two condvars, one per side of the pipe.
/// Mirrors the producer/consumer discipline of a classic blocking queue:
/// producers wait while full, the consumer waits while empty, and `close`
/// wakes everyone up so nobody blocks forever past shutdown.
struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> BlockingQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState { items: VecDeque::new(), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn push(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        while state.items.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap();
        }
        if state.closed {
            return;
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        while state.items.is_empty() && !state.closed {
            state = self.not_empty.wait(state).unwrap();
        }
        let item = state.items.pop_front();
        drop(state);
        self.not_full.notify_one();
        item
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

const SUFFIX: &str = ".log";

fn file_name(date: chrono::NaiveDate, bucket: Option<usize>) -> String {
    match bucket {
        Some(n) => format!("{}-{n}{SUFFIX}", date.format("%Y_%m_%d")),
        None => format!("{}{SUFFIX}", date.format("%Y_%m_%d")),
    }
}

struct RotatingFile {
    dir: PathBuf,
    today: chrono::NaiveDate,
    line_count: usize,
    file: File,
}

impl RotatingFile {
    fn open(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let today = Local::now().date_naive();
        let file = OpenOptions::new().create(true).append(true).open(dir.join(file_name(today, None)))?;
        Ok(Self { dir: dir.to_path_buf(), today, line_count: 0, file })
    }

    fn write_line(&mut self, line: &str) {
        let today = Local::now().date_naive();
        if today != self.today {
            self.today = today;
            self.line_count = 0;
            if let Ok(f) = OpenOptions::new().create(true).append(true).open(self.dir.join(file_name(self.today, None))) {
                self.file = f;
            }
        } else if self.line_count > 0 && self.line_count % MAX_LINES_PER_FILE == 0 {
            let bucket = self.line_count / MAX_LINES_PER_FILE;
            if let Ok(f) = OpenOptions::new().create(true).append(true).open(self.dir.join(file_name(self.today, Some(bucket)))) {
                self.file = f;
            }
        }
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.write_all(b"\n");
        self.line_count += 1;
    }
}

enum Sink {
    Sync(Mutex<RotatingFile>),
    Async { queue: std::sync::Arc<BlockingQueue<String>>, file: Mutex<RotatingFile> },
}

pub struct AsyncLog {
    level: Level,
    sink: Sink,
}

static LOGGER: OnceLock<AsyncLog> = OnceLock::new();

/// Installs the process-wide logger. `queue_capacity == 0` runs in
/// synchronous mode: every call writes under the file mutex directly from
/// the caller's thread instead of handing the line to a writer thread.
pub fn init(dir: impl AsRef<Path>, level: Level, queue_capacity: usize) -> std::io::Result<()> {
    let file = RotatingFile::open(dir.as_ref())?;
    let sink = if queue_capacity == 0 {
        Sink::Sync(Mutex::new(file))
    } else {
        Sink::Async { queue: std::sync::Arc::new(BlockingQueue::new(queue_capacity)), file: Mutex::new(file) }
    };
    if LOGGER.set(AsyncLog { level, sink }).is_err() {
        return Ok(());
    }
    // `LOGGER` is a `static`, so this reference is valid for the remaining
    // lifetime of the process — safe to hand to the writer thread as-is.
    if let Sink::Async { queue, file } = &LOGGER.get().unwrap().sink {
        let queue = queue.clone();
        let file: &'static Mutex<RotatingFile> = file;
        thread::spawn(move || {
            while let Some(line) = queue.pop() {
                file.lock().unwrap().write_line(&line);
            }
        });
    }
    Ok(())
}

pub fn flush() {
    if let Some(logger) = LOGGER.get() {
        if let Sink::Async { queue, .. } = &logger.sink {
            // Give the writer thread a chance to drain; there is no ack
            // channel, so this is a best-effort yield rather than a barrier.
            while !queue.state.lock().unwrap().items.is_empty() {
                thread::yield_now();
            }
        }
    }
}

#[doc(hidden)]
pub fn log(level: Level, msg: String) {
    let Some(logger) = LOGGER.get() else { return };
    if level < logger.level {
        return;
    }
    let now = Local::now();
    let line = format!(
        "{} {}{}",
        now.format("%Y-%m-%d %H:%M:%S%.6f"),
        level.title(),
        msg
    );
    match &logger.sink {
        Sink::Sync(file) => file.lock().unwrap().write_line(&line),
        Sink::Async { queue, .. } => queue.push(line),
    }
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::log($crate::Level::Debug, format!($($arg)*)) };
}
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::log($crate::Level::Info, format!($($arg)*)) };
}
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::log($crate::Level::Warn, format!($($arg)*)) };
}
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::log($crate::Level::Error, format!($($arg)*)) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_queue_preserves_order() {
        let q = BlockingQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        q.close();
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn level_ordering_filters_below_threshold() {
        assert!(Level::Error > Level::Warn);
        assert!(Level::Warn > Level::Info);
        assert!(Level::Info > Level::Debug);
    }
}
