//! Main event loop: accept, dispatch readable/writable connections to the
//! worker pool, and evict idle connections from the timer heap, grounded
//! on `webserver.cpp`'s `Start`/`DealListen_`/`OnRead_`/`OnWrite_`/`OnProcess`.
//!
//! `mio` has no `EPOLLONESHOT` equivalent, so oneshot delivery is modeled
//! by hand: a connection handed to the worker pool is removed from
//! `connections` for the duration of the call and only reinserted (with a
//! fresh `reregister`) once the worker reports back over `results`. Any
//! readiness event that lands on a token while it's in flight finds
//! nothing in the map and is silently dropped — the worker's own
//! completion reregisters interest a moment later, so nothing is lost,
//! just coalesced.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use socket2::{Domain, Socket, Type};

use crate::config::AppConfig;
use crate::db_pool::DbPool;
use crate::error::{Result, ServerError};
use crate::http::HttpConn;
use crate::poller::Poller;
use crate::timer::TimerHeap;
use crate::worker_pool::WorkerPool;

const LISTENER: Token = Token(0);
/// `webserver.cpp`'s `listen(listenFd_, 6)`.
const LISTEN_BACKLOG: i32 = 6;

enum Outcome {
    Readable,
    Writable,
    Closed,
}

struct WorkerReport {
    token: usize,
    conn: HttpConn,
    outcome: Outcome,
}

pub struct Reactor {
    listener: TcpListener,
    poller: Poller,
    timers: TimerHeap,
    workers: WorkerPool,
    db_pool: Option<Arc<DbPool>>,
    doc_root: std::path::PathBuf,
    error_pages: Arc<HashMap<u16, String>>,
    connections: HashMap<usize, HttpConn>,
    in_flight: std::collections::HashSet<usize>,
    max_connections: usize,
    next_token: usize,
    listen_et: bool,
    conn_et: bool,
    timeout_ms: i64,
    report_tx: mpsc::Sender<WorkerReport>,
    report_rx: mpsc::Receiver<WorkerReport>,
    expired_tx: mpsc::Sender<usize>,
    expired_rx: mpsc::Receiver<usize>,
    closing: bool,
}

impl Reactor {
    pub fn new(config: &AppConfig, db_pool: Option<Arc<DbPool>>, error_pages: HashMap<u16, String>) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", config.host, config.port).parse().map_err(|e| ServerError::Config(format!("invalid host/port: {e}")))?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        if config.open_linger {
            socket.set_linger(Some(std::time::Duration::from_secs(1)))?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        let mut listener = TcpListener::from_std(socket.into());

        let mut poller = Poller::new(1024)?;
        poller.add(&mut listener, LISTENER, Interest::READABLE)?;

        let (listen_et, conn_et) = config.trigger_flags();
        let (report_tx, report_rx) = mpsc::channel();
        let (expired_tx, expired_rx) = mpsc::channel();

        proxy_log::log_info!(
            "Listen Mode: {}, OpenConn Mode: {}",
            if listen_et { "ET" } else { "LT" },
            if conn_et { "ET" } else { "LT" }
        );

        Ok(Self {
            listener,
            poller,
            timers: TimerHeap::new(),
            workers: WorkerPool::new(config.worker_threads),
            db_pool,
            doc_root: std::path::PathBuf::from(&config.doc_root),
            error_pages: Arc::new(error_pages),
            connections: HashMap::new(),
            in_flight: std::collections::HashSet::new(),
            max_connections: config.max_connections,
            next_token: 1,
            listen_et,
            conn_et,
            timeout_ms: config.timeout_ms,
            report_tx,
            report_rx,
            expired_tx,
            expired_rx,
            closing: false,
        })
    }

    pub fn request_shutdown(&mut self) {
        self.closing = true;
    }

    /// Runs until `request_shutdown` marks the loop for exit.
    pub fn run(&mut self) -> Result<()> {
        proxy_log::log_info!("========== Server start ==========");
        while !self.closing {
            let wait_ms = if self.timeout_ms > 0 { self.timers.next_tick_ms() } else { -1 };
            self.poller.wait(wait_ms)?;

            let events: Vec<(usize, bool, bool, bool)> = self
                .poller
                .events()
                .map(|e| (e.token().0, e.is_readable(), e.is_writable(), e.is_error() || e.is_read_closed()))
                .collect();

            for (token, readable, writable, hangup) in events {
                if token == LISTENER.0 {
                    self.deal_listen();
                    continue;
                }
                if hangup {
                    self.close_conn(token);
                } else if readable {
                    self.extend_time(token);
                    self.dispatch(token, true);
                } else if writable {
                    self.extend_time(token);
                    self.dispatch(token, false);
                }
            }

            self.drain_reports();
            if self.timeout_ms > 0 {
                self.timers.tick();
            }
            self.drain_expired();
        }
        Ok(())
    }

    /// Timer callbacks run synchronously on this thread inside
    /// `tick()`/`next_tick_ms()`; they only post a token back to this
    /// same loop iteration, which then does the actual socket teardown.
    fn drain_expired(&mut self) {
        while let Ok(token) = self.expired_rx.try_recv() {
            if !self.in_flight.contains(&token) {
                self.close_conn(token);
            }
        }
    }

    fn deal_listen(&mut self) {
        loop {
            let (mut stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    proxy_log::log_warn!("accept error: {e}");
                    return;
                }
            };
            if self.connections.len() + self.in_flight.len() >= self.max_connections {
                proxy_log::log_warn!("Clients is full!");
                send_busy(&mut stream);
                drop(stream);
                if !self.listen_et {
                    return;
                }
                continue;
            }
            self.add_client(stream, addr);
            if !self.listen_et {
                return;
            }
        }
    }

    fn add_client(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        let token = self.next_token;
        self.next_token += 1;
        if let Err(e) = self.poller.add(&mut stream, Token(token), Interest::READABLE) {
            proxy_log::log_warn!("register client[{token}] failed: {e}");
            return;
        }
        let conn = HttpConn::new(stream, addr, self.doc_root.clone(), self.error_pages.clone(), self.db_pool.clone());
        self.connections.insert(token, conn);
        if self.timeout_ms > 0 {
            let tx = self.expired_tx.clone();
            self.timers.add(token, self.timeout_ms, Box::new(move || {
                let _ = tx.send(token);
            }));
        }
        proxy_log::log_info!("Client[{token}] in!");
    }

    fn extend_time(&mut self, token: usize) {
        if self.timeout_ms > 0 {
            self.timers.adjust(token, self.timeout_ms);
        }
    }

    /// Removes the connection from `connections`, marks it in-flight, and
    /// hands the blocking read/process/write call to the worker pool. The
    /// worker reports the outcome — and gives the connection back —
    /// through `report_tx`.
    fn dispatch(&mut self, token: usize, is_read: bool) {
        if self.in_flight.contains(&token) {
            return;
        }
        let Some(mut conn) = self.connections.remove(&token) else { return };
        self.in_flight.insert(token);
        let conn_et = self.conn_et;
        let tx = self.report_tx.clone();
        self.workers.submit(move || {
            let outcome = if is_read { on_read(&mut conn, conn_et) } else { on_write(&mut conn, conn_et) };
            let _ = tx.send(WorkerReport { token, conn, outcome });
        });
    }

    fn drain_reports(&mut self) {
        while let Ok(report) = self.report_rx.try_recv() {
            let WorkerReport { token, mut conn, outcome } = report;
            self.in_flight.remove(&token);
            let interest = match outcome {
                Outcome::Readable => Interest::READABLE,
                Outcome::Writable => Interest::WRITABLE,
                Outcome::Closed => {
                    proxy_log::log_info!("Client[{token}] quit!");
                    let _ = self.poller.remove(&mut conn.stream);
                    conn.close();
                    self.timers.cancel(token);
                    continue;
                }
            };
            if let Err(e) = self.poller.modify(&mut conn.stream, Token(token), interest) {
                proxy_log::log_warn!("rearm client[{token}] failed: {e}");
                self.timers.cancel(token);
                continue;
            }
            self.connections.insert(token, conn);
        }
    }

    fn close_conn(&mut self, token: usize) {
        if let Some(mut conn) = self.connections.remove(&token) {
            proxy_log::log_info!("Client[{token}] quit!");
            let _ = self.poller.remove(&mut conn.stream);
            conn.close();
        }
        self.timers.cancel(token);
    }
}

/// `webserver.cpp`'s `SendError_`: a raw best-effort write of a fixed
/// message to a socket about to be dropped, not a full HTTP response.
fn send_busy(stream: &mut TcpStream) {
    use std::io::Write;
    if let Err(e) = stream.write_all(b"Server busy!") {
        proxy_log::log_warn!("send error to client error: {e}");
    }
}

fn on_read(conn: &mut HttpConn, edge_triggered: bool) -> Outcome {
    match conn.read(edge_triggered) {
        Ok(0) => Outcome::Closed,
        Ok(_) => on_process(conn),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => on_process(conn),
        Err(_) => Outcome::Closed,
    }
}

fn on_process(conn: &mut HttpConn) -> Outcome {
    if conn.process() {
        Outcome::Writable
    } else {
        Outcome::Readable
    }
}

fn on_write(conn: &mut HttpConn, edge_triggered: bool) -> Outcome {
    match conn.write(edge_triggered) {
        Ok(_) => {
            if conn.to_write_bytes() == 0 {
                if conn.is_keep_alive() {
                    on_process(conn)
                } else {
                    Outcome::Closed
                }
            } else {
                Outcome::Writable
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Outcome::Writable,
        Err(_) => Outcome::Closed,
    }
}
