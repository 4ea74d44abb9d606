//! Line-protocol TCP server
//!
//! One task per connection. Each handler accumulates bytes in a `BytesMut`,
//! cuts complete lines at `\n` and answers every line in order.

use crate::commands::{handle_line, Reply};
use crate::store::CounterBackend;
use bytes::BytesMut;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Longest accepted command line; longer input closes the connection
pub const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct CounterServer {
    listener: TcpListener,
    backend: Arc<dyn CounterBackend>,
}

impl CounterServer {
    pub async fn bind(addr: &str, backend: Arc<dyn CounterBackend>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(CounterServer { listener, backend })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "counter server listening"),
            Err(e) => warn!(error = %e, "counter server listening on unknown address"),
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let handler = ConnectionHandler::new(stream, Arc::clone(&self.backend), addr);
                        tokio::spawn(handler.run());
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                _ = &mut shutdown => {
                    info!("counter server stopped accepting connections");
                    break;
                }
            }
        }
    }

    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }
}

struct ConnectionHandler {
    stream: TcpStream,
    backend: Arc<dyn CounterBackend>,
    buffer: BytesMut,
    client_addr: SocketAddr,
}

impl ConnectionHandler {
    fn new(stream: TcpStream, backend: Arc<dyn CounterBackend>, client_addr: SocketAddr) -> Self {
        ConnectionHandler {
            stream,
            backend,
            buffer: BytesMut::with_capacity(4096),
            client_addr,
        }
    }

    async fn run(mut self) {
        info!(client = %self.client_addr, "client connected");

        loop {
            match self.stream.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    info!(client = %self.client_addr, "client disconnected");
                    break;
                }
                Ok(_) => {
                    let mut out = Vec::new();
                    while let Some(line) = self.next_line() {
                        if let Some(reply) = self.handle(&line).await {
                            out.extend_from_slice(&reply.encode());
                        }
                    }

                    let overflow = self.buffer.len() > MAX_LINE_BYTES;
                    if overflow {
                        warn!(client = %self.client_addr, "command line too long, closing");
                        out.extend_from_slice(&Reply::Error("line too long".into()).encode());
                    }
                    if !out.is_empty() {
                        if let Err(e) = self.stream.write_all(&out).await {
                            error!(client = %self.client_addr, error = %e, "failed to write response");
                            break;
                        }
                    }
                    if overflow {
                        break;
                    }
                }
                Err(e) => {
                    error!(client = %self.client_addr, error = %e, "error reading from client");
                    break;
                }
            }
        }
    }

    /// Split off the next complete line, without its terminator
    fn next_line(&mut self) -> Option<BytesMut> {
        let pos = memchr::memchr(b'\n', &self.buffer)?;
        let mut line = self.buffer.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        Some(line)
    }

    async fn handle(&self, line: &[u8]) -> Option<Reply> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(_) => {
                warn!(client = %self.client_addr, "command is not valid UTF-8");
                return Some(Reply::Error("command is not valid UTF-8".into()));
            }
        };
        if text.trim().is_empty() {
            return None;
        }

        let reply = handle_line(self.backend.as_ref(), text).await;
        if let Reply::Error(msg) = &reply {
            debug!(client = %self.client_addr, command = text, error = %msg, "command rejected");
        }
        Some(reply)
    }
}
