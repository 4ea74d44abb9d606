//! End-to-end tests of the line protocol over TCP

use incr::aggregation::ResolutionLadder;
use incr::clock::SimulatedClock;
use incr::persistence::InMemoryObjectStore;
use incr::server::{CounterServer, MAX_LINE_BYTES};
use incr::store::{AggregationStore, CounterBackend, DurableStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const NOW: i64 = 1_700_000_000;

struct TestServer {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(backend: Arc<dyn CounterBackend>) -> Self {
        let server = CounterServer::bind("127.0.0.1:0", backend).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));
        TestServer { addr, stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap();
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Client {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Option<String> {
        self.lines.next_line().await.unwrap()
    }

    async fn call(&mut self, line: &str) -> String {
        self.send(&format!("{}\r\n", line)).await;
        self.recv().await.unwrap()
    }
}

fn memory_backend() -> Arc<dyn CounterBackend> {
    Arc::new(AggregationStore::with_clock(
        Arc::new(ResolutionLadder::default()),
        SimulatedClock::new(NOW),
    ))
}

#[tokio::test]
async fn test_submit_query_list() {
    let server = TestServer::start(memory_backend()).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.call("PING").await, "PONG");
    assert_eq!(client.call("SUBMIT web views 2 SENDER alice").await, "OK");
    assert_eq!(client.call("SUBMIT web views 3 SENDER bob").await, "OK");
    assert_eq!(client.call("SUBMIT web clicks 1").await, "OK");

    assert_eq!(
        client.call("QUERY web views").await,
        r#"[{"time":0,"sum":5.0,"count":2,"unique":0}]"#
    );
    let daily = client.call("QUERY web views daily").await;
    let daily: serde_json::Value = serde_json::from_str(&daily).unwrap();
    assert_eq!(daily[0]["count"], 2);
    assert_eq!(daily[0]["unique"], 2);

    assert_eq!(client.call("LIST web").await, r#"["clicks","views"]"#);
    assert_eq!(client.call("LIST nobody").await, "[]");

    server.stop().await;
}

#[tokio::test]
async fn test_errors_keep_connection_open() {
    let server = TestServer::start(memory_backend()).await;
    let mut client = Client::connect(server.addr).await;

    assert!(client.call("SUBMIT web views lots").await.starts_with("ERR "));
    assert!(client.call("QUERY web views monthly").await.starts_with("ERR "));
    assert!(client.call("FROB").await.starts_with("ERR "));
    assert_eq!(client.call("PING").await, "PONG");
    assert_eq!(client.call("LIST web").await, "[]");

    server.stop().await;
}

#[tokio::test]
async fn test_pipelined_and_split_lines() {
    let server = TestServer::start(memory_backend()).await;
    let mut client = Client::connect(server.addr).await;

    // Several commands in one write, blank lines ignored
    client
        .send("SUBMIT web a 1\n\nSUBMIT web b 1\nPING\n")
        .await;
    assert_eq!(client.recv().await.unwrap(), "OK");
    assert_eq!(client.recv().await.unwrap(), "OK");
    assert_eq!(client.recv().await.unwrap(), "PONG");

    // One command split across writes
    client.send("LIST ").await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    client.send("web\n").await;
    assert_eq!(client.recv().await.unwrap(), r#"["a","b"]"#);

    server.stop().await;
}

#[tokio::test]
async fn test_overlong_line_closes_connection() {
    let server = TestServer::start(memory_backend()).await;
    let mut client = Client::connect(server.addr).await;

    client.send(&"x".repeat(MAX_LINE_BYTES + 1)).await;
    assert_eq!(client.recv().await.unwrap(), "ERR line too long");
    assert_eq!(client.recv().await, None);

    server.stop().await;
}

#[tokio::test]
async fn test_durable_backend_over_tcp() {
    let backend: Arc<dyn CounterBackend> = Arc::new(DurableStore::with_clock(
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(ResolutionLadder::default()),
        SimulatedClock::new(NOW),
    ));
    let server = TestServer::start(backend).await;
    let mut first = Client::connect(server.addr).await;
    let mut second = Client::connect(server.addr).await;

    assert_eq!(first.call("SUBMIT shop orders 10").await, "OK");
    assert_eq!(second.call("SUBMIT shop orders 5").await, "OK");
    assert_eq!(
        first.call("QUERY shop orders total").await,
        r#"[{"time":0,"sum":15.0,"count":2,"unique":0}]"#
    );
    assert_eq!(second.call("LIST shop").await, r#"["orders"]"#);

    server.stop().await;
}
