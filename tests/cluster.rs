//! End-to-end tests: real cache nodes and a router on ephemeral ports

use bytes::BytesMut;
use shardcache::config::{Config, NodeConfig, ProtocolConfig};
use shardcache::metrics::Metrics;
use shardcache::node::CacheNode;
use shardcache::protocol::{FrameCodec, read_frame, write_frame};
use shardcache::router::{HealthState, Router};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct RunningNode {
    addr: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningNode {
    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

struct Cluster {
    router: Arc<Router>,
    router_addr: String,
    nodes: Vec<RunningNode>,
}

fn base_config(capacity: usize, threshold: u32) -> Config {
    let mut config = Config::default();
    config.cache.lru_capacity = capacity;
    config.router.health_threshold = threshold;
    config.router.request_timeout_secs = 2;
    config.backup.enabled = false;
    config
}

async fn start_node(node_config: &NodeConfig, listener: TcpListener, config: &Config) -> RunningNode {
    let cancel = CancellationToken::new();
    let node = Arc::new(
        CacheNode::open(node_config, config, Arc::new(Metrics::new()), cancel.clone()).await,
    );
    let task = tokio::spawn(async move {
        node.serve(listener).await.unwrap();
    });
    RunningNode {
        addr: node_config.addr.clone(),
        cancel,
        task,
    }
}

async fn start_cluster(node_count: usize, mut config: Config) -> Cluster {
    let mut listeners = Vec::new();
    for _ in 0..node_count {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        config.nodes.push(NodeConfig::new(addr, 3));
        listeners.push(listener);
    }

    let mut nodes = Vec::new();
    for (node_config, listener) in config.nodes.clone().iter().zip(listeners) {
        nodes.push(start_node(node_config, listener, &config).await);
    }

    let router = Arc::new(Router::new(
        &config,
        Arc::new(Metrics::new()),
        CancellationToken::new(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let router_addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(Arc::clone(&router).serve(listener));

    Cluster {
        router,
        router_addr,
        nodes,
    }
}

struct Client {
    stream: TcpStream,
    buf: BytesMut,
    codec: FrameCodec,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            buf: BytesMut::new(),
            codec: FrameCodec::new(&ProtocolConfig::default()),
        }
    }

    async fn send(&mut self, command: &str) -> String {
        write_frame(&mut self.stream, &self.codec, command.as_bytes())
            .await
            .unwrap();
        let reply = read_frame(&mut self.stream, &mut self.buf, &self.codec)
            .await
            .unwrap()
            .expect("router closed the connection");
        String::from_utf8(reply.to_vec()).unwrap()
    }
}

/// A key the ring currently assigns to `node`
fn key_owned_by(router: &Router, node: &str) -> String {
    let ring = router.ring().read();
    (0..10_000)
        .map(|i| format!("key{i}"))
        .find(|k| ring.get_node(k).unwrap() == node)
        .unwrap()
}

#[tokio::test]
async fn test_set_get_scenario() {
    let cluster = start_cluster(3, base_config(100, 5)).await;
    let mut client = Client::connect(&cluster.router_addr).await;

    assert_eq!(client.send("SET A 123").await, "OK");
    assert_eq!(client.send("GET A").await, "VALUE 123");
    assert_eq!(client.send("SET B ANACONDA").await, "OK");
    assert_eq!(client.send("GET B").await, "VALUE ANACONDA");
    assert_eq!(client.send("GET C").await, "NIL");

    // Value is the rest of the line, command names are case-insensitive
    assert_eq!(client.send("set greeting hello world").await, "OK");
    assert_eq!(client.send("get greeting").await, "VALUE hello world");
}

#[tokio::test]
async fn test_capacity_one_evicts() {
    let cluster = start_cluster(1, base_config(1, 5)).await;
    let mut client = Client::connect(&cluster.router_addr).await;

    assert_eq!(client.send("SET A 123").await, "OK");
    assert_eq!(client.send("SET B ANACONDA").await, "OK");
    assert_eq!(client.send("GET A").await, "NIL");
    assert_eq!(client.send("GET B").await, "VALUE ANACONDA");
}

#[tokio::test]
async fn test_bad_requests_keep_connection() {
    let cluster = start_cluster(2, base_config(100, 1)).await;
    let mut client = Client::connect(&cluster.router_addr).await;

    assert_eq!(
        client.send("FLUSH A").await,
        "BAD REQUEST unsupported command: FLUSH"
    );
    assert!(client.send("SET A").await.starts_with("BAD REQUEST"));
    assert!(client.send("GET").await.starts_with("BAD REQUEST"));
    assert_eq!(client.send("EXPIRE A soon").await, "BAD REQUEST invalid ttl");

    // Still connected, nothing counted against the nodes
    assert_eq!(client.send("SET A 1").await, "OK");
    for node in &cluster.nodes {
        assert_eq!(cluster.router.health().state(&node.addr), HealthState::Healthy);
    }
}

#[tokio::test]
async fn test_expire_and_ttl() {
    let cluster = start_cluster(2, base_config(100, 5)).await;
    let mut client = Client::connect(&cluster.router_addr).await;

    assert_eq!(client.send("EXPIRE A 1").await, "INTEGER 0");
    assert_eq!(client.send("TTL A").await, "INTEGER -1");

    assert_eq!(client.send("SET A 123").await, "OK");
    assert_eq!(client.send("EXPIRE A 1").await, "INTEGER 1");
    assert_eq!(client.send("TTL A").await, "INTEGER 1");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(client.send("GET A").await, "NIL");
    assert_eq!(client.send("TTL A").await, "INTEGER -1");
}

#[tokio::test]
async fn test_failed_node_leaves_ring() {
    let mut cluster = start_cluster(2, base_config(100, 2)).await;
    let mut client = Client::connect(&cluster.router_addr).await;

    let victim = cluster.nodes.remove(0);
    let victim_addr = victim.addr.clone();
    let key = key_owned_by(&cluster.router, &victim_addr);
    assert_eq!(client.send(&format!("SET {key} before")).await, "OK");
    victim.stop().await;

    let reply = client.send(&format!("GET {key}")).await;
    assert!(reply.starts_with("SERVER_ERROR"), "{reply}");
    assert_eq!(
        cluster.router.health().state(&victim_addr),
        HealthState::Degraded(1)
    );
    assert!(cluster.router.ring().read().contains(&victim_addr));

    let reply = client.send(&format!("GET {key}")).await;
    assert!(reply.starts_with("SERVER_ERROR"), "{reply}");
    assert_eq!(
        cluster.router.health().state(&victim_addr),
        HealthState::Removed
    );
    assert!(!cluster.router.ring().read().contains(&victim_addr));

    // The key now lives on the survivor, which starts without it
    assert_eq!(client.send(&format!("GET {key}")).await, "NIL");
    assert_eq!(client.send(&format!("SET {key} after")).await, "OK");
    assert_eq!(client.send(&format!("GET {key}")).await, "VALUE after");
}

#[tokio::test]
async fn test_empty_ring_reports_server_error() {
    let mut cluster = start_cluster(1, base_config(100, 1)).await;
    let mut client = Client::connect(&cluster.router_addr).await;

    cluster.nodes.remove(0).stop().await;

    let reply = client.send("GET A").await;
    assert!(reply.starts_with("SERVER_ERROR node"), "{reply}");
    assert_eq!(client.send("GET A").await, "SERVER_ERROR no nodes available");
    assert_eq!(client.send("SET A 1").await, "SERVER_ERROR no nodes available");
}

#[tokio::test]
async fn test_node_restores_backup() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(100, 5);
    config.backup.enabled = true;
    config.backup.dir = dir.path().to_path_buf();
    config.backup.interval_secs = 60;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node_config = NodeConfig::new(listener.local_addr().unwrap().to_string(), 3);
    config.nodes.push(node_config.clone());

    let cancel = CancellationToken::new();
    let node = Arc::new(
        CacheNode::open(&node_config, &config, Arc::new(Metrics::new()), cancel.clone()).await,
    );
    node.store().set("A", "123".into());
    node.store().set("B", "ANACONDA".into());
    let task = tokio::spawn(Arc::clone(&node).serve(listener));

    // Shutdown writes the final snapshot
    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(config.backup.path_for(&node_config).exists());

    let restored = CacheNode::open(
        &node_config,
        &config,
        Arc::new(Metrics::new()),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(restored.store().len(), 2);
    assert_eq!(restored.store().get("A").unwrap().as_ref(), b"123");
    assert_eq!(restored.store().get("B").unwrap().as_ref(), b"ANACONDA");
}

#[tokio::test]
async fn test_oversized_set_keeps_node_in_ring() {
    let mut config = base_config(100, 1);
    config.protocol.max_payload_size = 64;
    let cluster = start_cluster(1, config).await;
    let node = cluster.nodes[0].addr.clone();
    let mut client = Client::connect(&cluster.router_addr).await;

    // Fits the client frame but not the node request built from it
    let command = format!("SET A {}", "x".repeat(58));
    assert_eq!(command.len(), 64);
    assert_eq!(
        client.send(&command).await,
        "BAD REQUEST request too large: 71 bytes (limit 64)"
    );
    assert_eq!(cluster.router.health().state(&node), HealthState::Healthy);
    assert!(cluster.router.ring().read().contains(&node));

    // A reply that cannot be framed is replaced, the connection stays up
    assert_eq!(
        client.send(&"X".repeat(60)).await,
        "SERVER_ERROR reply too large"
    );

    let mut other = Client::connect(&cluster.router_addr).await;
    assert_eq!(other.send("SET A small").await, "OK");
    assert_eq!(client.send("GET A").await, "VALUE small");
}
