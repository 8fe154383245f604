//! Client and driver against an in-process stand-in for the NetEase page:
//! a one-shot `/json` HTTP answer plus a WebSocket evaluating nothing but
//! returning canned probe results.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pmonetease::{
    ClientOptions, ConnectionState, DriverConfig, NeteaseClient, NeteaseDriver, NeteaseError,
    PlayerSession,
};
use serde_json::{Value, json};
use tungstenite::Message;

/// Serves the page list once, pointing at `ws_port`.
fn serve_page_list(ws_port: u16) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let body = json!([{
        "id": "NCM",
        "type": "page",
        "title": "网易云音乐",
        "url": "orpheus://orpheus/pub/app.html",
        "webSocketDebuggerUrl": format!("ws://127.0.0.1:{ws_port}/devtools/page/NCM")
    }])
    .to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).unwrap();
    });

    port
}

/// Page WebSocket: `answer(is_poll)` gives the evaluated value of each
/// command.
fn serve_page<F>(answer: F) -> u16
where
    F: Fn(bool) -> Value + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        loop {
            let text = match ws.read() {
                Ok(Message::Text(text)) => text.to_string(),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let command: Value = serde_json::from_str(&text).unwrap();
            let expression = command["params"]["expression"].as_str().unwrap_or("");
            let value = answer(expression.contains("querySelector"));
            let reply = json!({
                "id": command["id"],
                "result": { "result": { "type": "object", "value": value } }
            });
            if ws.send(Message::Text(reply.to_string().into())).is_err() {
                break;
            }
        }
    });

    port
}

fn fake_netease<F>(answer: F) -> u16
where
    F: Fn(bool) -> Value + Send + 'static,
{
    serve_page_list(serve_page(answer))
}

fn client() -> NeteaseClient {
    NeteaseClient::new(ClientOptions {
        discovery_timeout: Duration::from_secs(2),
        ..ClientOptions::default()
    })
}

#[test]
fn test_client_registers_and_polls() {
    let port = fake_netease(|is_poll| {
        if is_poll {
            json!({ "songId": "1901371647", "currentTime": 42.5, "duration": 215.3 })
        } else {
            json!({ "success": true })
        }
    });

    let mut client = client();
    client.connect(port).unwrap();
    assert!(client.is_connected());
    assert!(client.endpoint().unwrap().ends_with("/devtools/page/NCM"));

    client.register_listener().unwrap();
    let sample = client.poll_progress().unwrap();
    assert_eq!(sample.current_time, 42.5);
    assert_eq!(sample.total_duration, Some(215.3));
    assert_eq!(sample.track_id.as_deref(), Some("1901371647"));

    client.disconnect();
    assert!(!client.is_connected());
}

#[test]
fn test_client_reports_rejection_reason() {
    let port = fake_netease(|is_poll| {
        if is_poll {
            json!({ "songId": "", "currentTime": 0, "duration": null })
        } else {
            json!({ "success": false, "error": "NO_CHANNEL" })
        }
    });

    let mut client = client();
    client.connect(port).unwrap();

    match client.register_listener() {
        Err(NeteaseError::ListenerRejected { reason }) => assert_eq!(reason, "NO_CHANNEL"),
        other => panic!("unexpected registration result: {other:?}"),
    }

    // Without a listener the page mirror stays empty.
    assert!(matches!(
        client.poll_progress(),
        Err(NeteaseError::ProbeParse { .. })
    ));
    assert!(client.is_connected());
}

#[test]
fn test_driver_follows_playback() {
    let position = Arc::new(Mutex::new(0.0_f64));
    let clock = Arc::clone(&position);
    let port = fake_netease(move |is_poll| {
        if !is_poll {
            return json!({ "success": true });
        }
        let mut t = clock.lock().unwrap();
        *t += 0.5;
        json!({ "songId": "1901371647", "currentTime": *t, "duration": 215.3 })
    });

    let tracks = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&tracks);
    let driver = NeteaseDriver::builder()
        .config(DriverConfig {
            poll_interval: Duration::from_millis(20),
            discovery_timeout: Duration::from_secs(2),
            ..DriverConfig::default()
        })
        .on_track_changed(move |id| seen.lock().unwrap().push(id.to_string()))
        .build();

    assert!(driver.connect(port));
    assert_eq!(driver.connection_state(), ConnectionState::Connected);

    let deadline = Instant::now() + Duration::from_secs(5);
    while driver.state().current_progress < 1.0 {
        assert!(Instant::now() < deadline, "no progress published");
        thread::sleep(Duration::from_millis(10));
    }

    let state = driver.state();
    assert!(state.is_playing);
    assert_eq!(state.total_duration, 215.3);
    assert_eq!(state.track_id, "1901371647");
    assert_eq!(driver.raw_state().track_id(), "1901371647");
    assert_eq!(*tracks.lock().unwrap(), vec!["1901371647"]);

    driver.disconnect();
    assert!(!driver.state().is_playing);
    assert!(!driver.is_monitoring());
}
