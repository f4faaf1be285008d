//! Shared test fixtures: a scripted HTTP server standing in for llama-server.

use aibuddy_core::AppConfig;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockHttpResponse {
    pub status: u16,
    pub body: String,
    /// Sleep this long before answering, to exercise client timeouts.
    pub delay: Option<Duration>,
}

impl MockHttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: None,
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: None,
        }
    }

    pub fn health_ok() -> Self {
        Self::ok(r#"{"status":"ok"}"#)
    }

    /// OpenAI-style completion body whose first choice carries `content`.
    pub fn completion(content: &str) -> Self {
        Self::ok(
            json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
            })
            .to_string(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A request script per path. Each path replays its responses in order and
/// keeps returning the last one once the script runs out. Unknown paths get
/// a 404.
pub struct MockHttpServer {
    pub base_url: String,
    pub port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    healthy_override: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockHttpServer {
    pub fn start(routes: Vec<(&str, Vec<MockHttpResponse>)>) -> Self {
        let scripts: HashMap<String, Vec<MockHttpResponse>> = routes
            .into_iter()
            .map(|(path, responses)| (path.to_string(), responses))
            .collect();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener
            .set_nonblocking(true)
            .expect("set nonblocking listener");
        let addr = listener.local_addr().expect("addr");
        let requests = Arc::new(Mutex::new(Vec::<RecordedRequest>::new()));
        let requests_thread = Arc::clone(&requests);
        let healthy_override = Arc::new(AtomicBool::new(false));
        let healthy_thread = Arc::clone(&healthy_override);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let mut served: HashMap<String, usize> = HashMap::new();
            loop {
                if rx.try_recv().is_ok() {
                    break;
                }
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let Ok(request) = read_http_request(&mut stream) else {
                            continue;
                        };
                        let path = request.path.clone();
                        requests_thread.lock().expect("request log").push(request);
                        let selected = if path == "/health" && healthy_thread.load(Ordering::SeqCst)
                        {
                            MockHttpResponse::health_ok()
                        } else {
                            let idx = served.entry(path.clone()).or_insert(0);
                            let picked = scripts.get(&path).and_then(|script| {
                                script.get(*idx).or_else(|| script.last()).cloned()
                            });
                            *idx += 1;
                            picked.unwrap_or_else(|| MockHttpResponse::status(404, "not found"))
                        };
                        if let Some(delay) = selected.delay {
                            thread::sleep(delay);
                        }
                        let _ = write_http_response(&mut stream, &selected);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            port: addr.port(),
            requests,
            healthy_override,
            stop_tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("request log").clone()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    /// Force `/health` to answer 200 from now on, simulating a server that
    /// finished booting.
    pub fn become_healthy(&self) {
        self.healthy_override.store(true, Ordering::SeqCst);
    }

    /// Config pointing at this server.
    pub fn config(&self) -> AppConfig {
        AppConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: self.port,
            ..AppConfig::default()
        }
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A port on 127.0.0.1 with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe port");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

fn read_http_request(stream: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let mut header_end = None;
    while header_end.is_none() {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = find_subsequence(&buffer, b"\r\n\r\n").map(|idx| idx + 4);
        if buffer.len() > 1_048_576 {
            break;
        }
    }
    let header_len = header_end.unwrap_or(buffer.len());
    let head = String::from_utf8_lossy(&buffer[..header_len]).to_string();
    let content_length = parse_content_length(&head);
    let mut body = buffer[header_len..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    Ok(RecordedRequest {
        method: request_line.next().unwrap_or_default().to_string(),
        path: request_line.next().unwrap_or_default().to_string(),
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn write_http_response(stream: &mut TcpStream, response: &MockHttpResponse) -> std::io::Result<()> {
    let status_text = match response.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    };
    let raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        status_text,
        response.body.len(),
        response.body
    );
    stream.write_all(raw.as_bytes())?;
    stream.flush()
}

fn parse_content_length(head: &str) -> usize {
    for line in head.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or_default().trim();
        if key.eq_ignore_ascii_case("content-length")
            && let Some(value) = parts.next()
            && let Ok(parsed) = value.trim().parse::<usize>()
        {
            return parsed;
        }
    }
    0
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_per_path_and_repeats_last() {
        let server = MockHttpServer::start(vec![(
            "/health",
            vec![
                MockHttpResponse::status(503, "loading"),
                MockHttpResponse::health_ok(),
            ],
        )]);
        let client = reqwest::blocking::Client::new();
        let url = format!("{}/health", server.base_url);
        let statuses: Vec<u16> = (0..3)
            .map(|_| client.get(&url).send().expect("send").status().as_u16())
            .collect();
        assert_eq!(statuses, vec![503, 200, 200]);
        assert_eq!(server.request_count("/health"), 3);
    }

    #[test]
    fn unknown_paths_get_not_found() {
        let server = MockHttpServer::start(vec![]);
        let status = reqwest::blocking::get(format!("{}/nope", server.base_url))
            .expect("send")
            .status();
        assert_eq!(status.as_u16(), 404);
    }
}
