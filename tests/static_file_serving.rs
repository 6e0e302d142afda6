//! End-to-end: a real `Reactor` bound to a loopback port, driven over a
//! plain `TcpStream`, the way `server_chunked.rs` exercised the teacher's
//! server before the vhost/chunked features it covered were dropped.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use std::{fs, thread};

use webserver::config::AppConfig;
use webserver::server::Reactor;

fn spawn_server(doc_root: &str, port: u16) {
    let config = AppConfig {
        host: "127.0.0.1".to_string(),
        port,
        trigger_mode: 3,
        timeout_ms: 0,
        open_linger: false,
        sql_host: String::new(),
        sql_port: 3306,
        sql_user: String::new(),
        sql_password: String::new(),
        sql_db: String::new(),
        db_pool_size: 1,
        worker_threads: 2,
        log_enable: false,
        log_level: 3,
        log_queue_capacity: 16,
        doc_root: doc_root.to_string(),
        log_dir: "log".to_string(),
        max_connections: 64,
    };
    thread::spawn(move || {
        let mut reactor = Reactor::new(&config, None, std::collections::HashMap::new()).expect("reactor binds");
        reactor.run().ok();
    });
    thread::sleep(Duration::from_millis(200));
}

fn read_response(stream: &mut TcpStream) -> String {
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 8192];
    let n = stream.read(&mut buf).expect("response read");
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

/// Reads until the peer closes or the timeout elapses, concatenating every
/// chunk — used for keep-alive exchanges where two responses may land in
/// one `read` or split across several, depending on scheduling.
fn read_until_close(stream: &mut TcpStream) -> String {
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => panic!("read error: {e}"),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[test]
fn serves_an_existing_file_as_200() {
    let root = "./tmp_test_static_200";
    let _ = fs::remove_dir_all(root);
    fs::create_dir_all(root).unwrap();
    fs::write(format!("{root}/index.html"), "<html>hi</html>").unwrap();

    spawn_server(root, 18080);
    let mut stream = TcpStream::connect("127.0.0.1:18080").expect("connect");
    stream.write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();
    let response = read_response(&mut stream);

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with("<html>hi</html>"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_file_yields_404() {
    let root = "./tmp_test_static_404";
    let _ = fs::remove_dir_all(root);
    fs::create_dir_all(root).unwrap();

    spawn_server(root, 18081);
    let mut stream = TcpStream::connect("127.0.0.1:18081").expect("connect");
    stream.write_all(b"GET /nope.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();
    let response = read_response(&mut stream);

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn malformed_request_line_yields_400_and_closes() {
    let root = "./tmp_test_static_400";
    let _ = fs::remove_dir_all(root);
    fs::create_dir_all(root).unwrap();

    spawn_server(root, 18082);
    let mut stream = TcpStream::connect("127.0.0.1:18082").expect("connect");
    stream.write_all(b"GET /\r\n\r\n").unwrap();
    let response = read_response(&mut stream);

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn keep_alive_connection_serves_a_second_pipelined_request() {
    let root = "./tmp_test_static_keepalive";
    let _ = fs::remove_dir_all(root);
    fs::create_dir_all(root).unwrap();
    fs::write(format!("{root}/index.html"), "hi").unwrap();

    spawn_server(root, 18083);
    let mut stream = TcpStream::connect("127.0.0.1:18083").expect("connect");
    let two_requests = b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n\
                          GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
    stream.write_all(two_requests).unwrap();

    let combined = read_until_close(&mut stream);
    assert_eq!(combined.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(combined.contains("Connection: keep-alive\r\n"));
    assert!(combined.contains("Connection: close\r\n"));
    let _ = fs::remove_dir_all(root);
}
