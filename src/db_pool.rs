//! Fixed set of pre-opened SQL handles, leased out behind a counting
//! semaphore and returned through an RAII guard.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use mysql::{Conn, Opts, OptsBuilder};

use crate::error::Result;

/// Mutex+condvar counting semaphore — the same primitive the original's
/// `blockqueue.h`/`threadpool.h` build their waits on, used here in place
/// of the source's raw `sem_t`.
struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    fn new(initial: usize) -> Self {
        Self { count: Mutex::new(initial), cond: Condvar::new() }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        drop(count);
        self.cond.notify_one();
    }
}

pub struct DbPool {
    queue: Mutex<VecDeque<Conn>>,
    sem: Semaphore,
    capacity: usize,
}

impl DbPool {
    /// Pre-opens `size` connections and initializes the semaphore to `size`.
    pub fn init(host: &str, port: u16, user: &str, password: &str, db: &str, size: usize) -> Result<Self> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(host))
            .tcp_port(port)
            .user(Some(user))
            .pass(Some(password))
            .db_name(Some(db))
            .into();
        let mut conns = VecDeque::with_capacity(size);
        for _ in 0..size {
            conns.push_back(Conn::new(opts.clone())?);
        }
        Ok(Self { queue: Mutex::new(conns), sem: Semaphore::new(size), capacity: size })
    }

    /// Fast-path empty check returns `None` immediately (the caller logs
    /// "busy" and gives up) rather than blocking when the pool is visibly
    /// drained; otherwise waits on the semaphore and pops the head.
    pub fn acquire(&self) -> Option<DbGuard<'_>> {
        if self.queue.lock().unwrap().is_empty() {
            proxy_log::log_warn!("DbPool busy!");
            return None;
        }
        self.sem.wait();
        let conn = self.queue.lock().unwrap().pop_front()?;
        Some(DbGuard { pool: self, conn: Some(conn) })
    }

    fn release(&self, conn: Conn) {
        self.queue.lock().unwrap().push_back(conn);
        self.sem.post();
    }

    pub fn available(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn close(&self) {
        self.queue.lock().unwrap().clear();
    }
}

/// Scoped lease: the destructor returns the handle on every exit path,
/// including early returns and panics, mirroring `sqlconnRAII.h`.
pub struct DbGuard<'a> {
    pool: &'a DbPool,
    conn: Option<Conn>,
}

impl<'a> std::ops::Deref for DbGuard<'a> {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("conn taken only on drop")
    }
}

impl<'a> std::ops::DerefMut for DbGuard<'a> {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("conn taken only on drop")
    }
}

impl<'a> Drop for DbGuard<'a> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
