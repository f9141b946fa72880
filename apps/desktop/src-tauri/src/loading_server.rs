use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::status::StatusBoard;

const LOADING_PAGE: &str = include_str!("../assets/loading.html");
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// The temporary local server the window points at while the backend warms
/// up. Two routes, canned responses, one connection at a time is plenty.
pub struct LoadingServer {
    listener: std::net::TcpListener,
    board: Arc<StatusBoard>,
}

impl LoadingServer {
    /// Bind synchronously so a taken port surfaces as a startup error
    /// rather than a dead loading page.
    pub fn bind(host: &str, port: u16, board: Arc<StatusBoard>) -> Result<Self> {
        let listener = std::net::TcpListener::bind((host, port))
            .with_context(|| format!("E_LOADING_BIND: bind {host}:{port} failed"))?;
        listener
            .set_nonblocking(true)
            .context("set_nonblocking failed")?;
        Ok(Self { listener, board })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("local_addr failed")
    }

    /// Run the accept loop on its own current-thread runtime until the
    /// token fires. Meant to be called from a dedicated thread.
    pub fn run_blocking(self, token: CancellationToken) -> Result<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build loading-server runtime failed")?;
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(self.listener)
                .context("adopt loading listener failed")?;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    accepted = listener.accept() => {
                        let (stream, _peer) = match accepted {
                            Ok(v) => v,
                            Err(e) => {
                                crate::safe_eprintln!("loading server: accept failed: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = handle_connection(stream, &self.board).await {
                            crate::safe_eprintln!("loading server: request failed: {e:#}");
                        }
                    }
                }
            }
        })
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    board: &StatusBoard,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_REQUEST_BYTES];
    let mut read = 0usize;
    // Read until the header terminator; bodies are irrelevant for GETs.
    loop {
        if read == buf.len() {
            break;
        }
        let n = stream.read(&mut buf[read..]).await.context("read failed")?;
        if n == 0 {
            break;
        }
        read += n;
        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf[..read]);
    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let (status, content_type, body) = route(method, path, board);
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(response.as_bytes())
        .await
        .context("write response failed")?;
    stream.shutdown().await.ok();
    Ok(())
}

fn route(method: &str, path: &str, board: &StatusBoard) -> (&'static str, &'static str, String) {
    if method != "GET" {
        return ("405 Method Not Allowed", "text/plain", "method not allowed".to_string());
    }
    match path {
        "/" | "/index.html" => ("200 OK", "text/html; charset=utf-8", LOADING_PAGE.to_string()),
        "/api/status" => {
            let snap = board.snapshot();
            let body = serde_json::to_string(&*snap)
                .unwrap_or_else(|_| "{\"heading\":\"\",\"progress\":0,\"stage\":\"\",\"detail\":\"\"}".to_string());
            ("200 OK", "application/json", body)
        }
        _ => ("404 Not Found", "text/plain", "not found".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn spawn_server(board: Arc<StatusBoard>) -> (SocketAddr, CancellationToken) {
        let server = LoadingServer::bind("127.0.0.1", 0, board).expect("bind");
        let addr = server.local_addr().expect("addr");
        let token = CancellationToken::new();
        let token2 = token.clone();
        std::thread::spawn(move || server.run_blocking(token2));
        (addr, token)
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = std::net::TcpStream::connect(addr).expect("connect");
        write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").expect("write");
        let mut out = String::new();
        stream.read_to_string(&mut out).expect("read");
        out
    }

    #[test]
    fn root_serves_the_loading_page() {
        let (addr, token) = spawn_server(Arc::new(StatusBoard::new()));
        let resp = get(addr, "/");
        assert!(resp.starts_with("HTTP/1.1 200 OK"));
        assert!(resp.contains("text/html"));
        assert!(resp.contains("/api/status"));
        token.cancel();
    }

    #[test]
    fn status_endpoint_always_has_documented_fields() {
        let board = Arc::new(StatusBoard::new());
        let (addr, token) = spawn_server(board.clone());

        // Before any tailer activity.
        let resp = get(addr, "/api/status");
        let body = resp.split("\r\n\r\n").nth(1).expect("body");
        let v: serde_json::Value = serde_json::from_str(body).expect("json");
        for field in ["heading", "progress", "stage", "detail"] {
            assert!(v.get(field).is_some(), "missing field {field}");
        }

        // And after a terminal error.
        board.mark_error("backend never came up");
        let resp = get(addr, "/api/status");
        let body = resp.split("\r\n\r\n").nth(1).expect("body");
        let v: serde_json::Value = serde_json::from_str(body).expect("json");
        assert_eq!(v["stage"], "error");
        for field in ["heading", "progress", "stage", "detail"] {
            assert!(v.get(field).is_some(), "missing field {field}");
        }
        token.cancel();
    }

    #[test]
    fn unknown_path_is_404() {
        let (addr, token) = spawn_server(Arc::new(StatusBoard::new()));
        let resp = get(addr, "/nope");
        assert!(resp.starts_with("HTTP/1.1 404"));
        token.cancel();
    }
}
