use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use pmocdp::{DiscoveryError, discover_endpoint};

const MARKER: &str = "orpheus://";

/// Serves a single HTTP response on an ephemeral port and returns the port
/// together with the request line that was received.
fn serve_once(status: &'static str, body: String) -> (u16, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            if header == "\r\n" || header.is_empty() {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).unwrap();
        stream.flush().unwrap();
        request_line.trim_end().to_string()
    });

    (port, handle)
}

#[test]
fn test_discovers_page_over_http() {
    let body = r#"[{
        "id": "F00D",
        "type": "page",
        "url": "orpheus://orpheus/pub/app.html#/m/song",
        "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/F00D"
    }]"#
    .to_string();
    let (port, server) = serve_once("200 OK", body);

    let endpoint = discover_endpoint(port, MARKER, Duration::from_secs(2)).unwrap();
    assert_eq!(endpoint, "ws://127.0.0.1:9222/devtools/page/F00D");

    let request_line = server.join().unwrap();
    assert_eq!(request_line, "GET /json HTTP/1.1");
}

#[test]
fn test_foreign_debugger_reports_conflict() {
    let body = r#"[{"url":"https://example.org/","webSocketDebuggerUrl":"ws://127.0.0.1/x"}]"#
        .to_string();
    let (port, server) = serve_once("200 OK", body);

    let result = discover_endpoint(port, MARKER, Duration::from_secs(2));
    assert!(
        matches!(result, Err(DiscoveryError::PortConflict { port: p, .. }) if p == port),
        "unexpected result: {result:?}"
    );
    server.join().unwrap();
}

#[test]
fn test_non_success_status_is_reported() {
    let (port, server) = serve_once("404 Not Found", "not here".to_string());

    let result = discover_endpoint(port, MARKER, Duration::from_secs(2));
    assert_eq!(result, Err(DiscoveryError::HttpStatus { port, status: 404 }));
    server.join().unwrap();
}
