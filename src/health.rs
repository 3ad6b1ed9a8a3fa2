//! Simple HTTP health, ring and metrics server (synchronous)

use crate::config::MetricsConfig;
use crate::metrics::Metrics;
use crate::ring::SharedRing;
use std::fmt::Write as _;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Health server state
pub struct HealthServer {
    metrics: Arc<Metrics>,
    ring: SharedRing,
    ready: AtomicBool,
    running: AtomicBool,
}

impl HealthServer {
    /// Create a new health server reporting on `ring`
    pub fn new(metrics: Arc<Metrics>, ring: SharedRing) -> Self {
        Self {
            metrics,
            ring,
            ready: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    /// Set the ready state
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Ready once started and while at least one node is on the ring
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.ring.read().is_empty()
    }

    /// Stop the server
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Start the health server (blocking, run in separate thread)
    pub fn run(self: Arc<Self>, config: &MetricsConfig) -> std::io::Result<()> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        info!("Health server listening on {}", config.listen_addr);

        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = self.handle_connection(stream) {
                        error!("Health connection error: {}", e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Health server accept error: {}", e);
                }
            }
        }

        info!("Health server stopped");
        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        let (status, content_type, body) = self.respond(&request_line);
        send_response(&mut stream, status, content_type, &body)
    }

    /// Status, content type and body for one request line
    fn respond(&self, request_line: &str) -> (u16, &'static str, String) {
        // "GET /path HTTP/1.1"
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
            return (400, "text/plain", "Bad Request".to_string());
        };

        if method != "GET" {
            return (405, "text/plain", "Method Not Allowed".to_string());
        }

        match path {
            "/health" | "/healthz" => (200, "application/json", r#"{"status":"healthy"}"#.to_string()),
            "/ready" | "/readyz" => {
                if self.is_ready() {
                    (200, "application/json", r#"{"status":"ready"}"#.to_string())
                } else {
                    (503, "application/json", r#"{"status":"not ready"}"#.to_string())
                }
            }
            "/ring" => (200, "application/json", self.ring_json()),
            "/metrics" => (200, "text/plain; version=0.0.4", self.metrics.gather()),
            _ => (404, "text/plain", "Not Found".to_string()),
        }
    }

    /// Nodes currently on the ring and the number of virtual replicas
    fn ring_json(&self) -> String {
        let ring = self.ring.read();
        let mut body = String::from(r#"{"nodes":["#);
        for (i, node) in ring.nodes().iter().enumerate() {
            if i > 0 {
                body.push(',');
            }
            let _ = write!(body, "\"{node}\"");
        }
        let _ = write!(body, r#"],"replicas":{}}}"#, ring.len());
        body
    }
}

fn send_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Unknown",
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes())?;
    stream.flush()
}
