use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A canned response served by [`spawn_scripted_server`].
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status_line: String,
    pub body: String,
    /// Wait this long before answering, to exercise client timeouts.
    pub delay: Duration,
}

impl MockResponse {
    pub fn new(status_line: &str, body: &str) -> Self {
        Self {
            status_line: status_line.to_string(),
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::new("200 OK", body)
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Spawn a one-shot HTTP mock server that accepts a single request, captures it,
/// and responds with the given status line and body. Returns the base URL and a
/// receiver that yields the captured request.
pub fn spawn_one_shot_server(
    status_line: &str,
    response_body: &str,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    spawn_scripted_server(vec![MockResponse::new(status_line, response_body)])
}

/// Spawn a mock server that answers one request per scripted response, in order,
/// then stops accepting. Every request is captured on the returned receiver.
pub fn spawn_scripted_server(
    responses: Vec<MockResponse>,
) -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("read mock server addr");
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let req = read_http_request(&mut stream);
            if tx.send(req).is_err() {
                return;
            }
            if !response.delay.is_zero() {
                thread::sleep(response.delay);
            }

            let raw = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                response.status_line,
                response.body.len(),
                response.body
            );
            // The client may have hung up after a timeout
            let _ = stream.write_all(raw.as_bytes());
        }
    });

    (format!("http://{addr}"), rx)
}

fn read_http_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut header_end = None;
    let mut content_length = 0usize;

    loop {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).expect("read request bytes");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if header_end.is_none() {
            header_end = buf
                .windows(4)
                .position(|window| window == b"\r\n\r\n")
                .map(|idx| idx + 4);
            if let Some(end) = header_end {
                let headers = String::from_utf8_lossy(&buf[..end]);
                for line in headers.lines() {
                    if let Some((key, value)) = line.split_once(':') {
                        if key.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse::<usize>().unwrap_or(0);
                        }
                    }
                }
            }
        }
        if let Some(end) = header_end {
            if buf.len() >= end + content_length {
                break;
            }
        }
    }

    let end = header_end.expect("request headers must be present");
    let headers_raw = String::from_utf8_lossy(&buf[..end]);
    let mut lines = headers_raw.lines();
    let request_line = lines.next().expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().expect("method").to_string();
    let path = parts.next().expect("path").to_string();
    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let body = String::from_utf8(buf[end..end + content_length].to_vec()).expect("utf8 body");

    CapturedRequest {
        method,
        path,
        headers,
        body,
    }
}

/// Poll `f` until it returns true, panicking with `what` once `timeout` elapses.
pub async fn wait_until(what: &str, timeout: Duration, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, timeout, Duration::from_millis(10), f).await;
}

pub async fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        tokio::time::sleep(poll).await;
    }
    panic!("{what}: condition not met within {timeout:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_request(addr: &str, request: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(request).unwrap();
        let mut resp = String::new();
        stream.read_to_string(&mut resp).unwrap();
        resp
    }

    #[test]
    fn mock_server_captures_get() {
        let (url, rx) = spawn_one_shot_server("200 OK", r#"{"ok":true}"#);
        let addr = url.trim_start_matches("http://");
        let resp = raw_request(
            addr,
            b"GET /test-path HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(resp.contains("200 OK"));
        let req = rx.recv().unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/test-path");
    }

    #[test]
    fn scripted_server_answers_in_order() {
        let (url, rx) = spawn_scripted_server(vec![
            MockResponse::new("503 Service Unavailable", "{}"),
            MockResponse::ok("[]"),
        ]);
        let addr = url.trim_start_matches("http://");

        let first = raw_request(
            addr,
            b"POST /a HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\nX-Test: yes\r\n\r\n{}",
        );
        assert!(first.contains("503"));
        let second = raw_request(addr, b"GET /b HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(second.contains("200 OK"));

        let req = rx.recv().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, "{}");
        assert_eq!(req.header("X-Test"), Some("yes"));
        assert_eq!(rx.recv().unwrap().path, "/b");
    }

    #[tokio::test]
    async fn wait_until_returns_once_condition_holds() {
        let start = Instant::now();
        let mut calls = 0;
        wait_until("third poll", Duration::from_secs(1), || {
            calls += 1;
            calls >= 3
        })
        .await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
