//! Shared helpers for gateway integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Request, State};
use axum::routing::any;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use shield_fleet::FleetRegistry;
use shield_mode::ModeManager;
use shield_proxy::{ForwardProxy, Inspector, ReverseProxy, TrafficLog};
use shield_rules::RuleEngine;
use shield_types::Agent;

/// One request as observed by the capture upstream.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: axum::http::HeaderMap,
}

pub type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

async fn capture_handler(State(captured): State<Captured>, req: Request) -> &'static str {
    captured
        .lock()
        .expect("capture lock")
        .push(CapturedRequest {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            query: req.uri().query().map(String::from),
            headers: req.headers().clone(),
        });
    "upstream-ok"
}

/// An HTTP upstream that records every request it receives.
pub async fn spawn_upstream() -> (SocketAddr, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .fallback(any(capture_handler))
        .with_state(Arc::clone(&captured));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, captured)
}

/// A TCP echo server that counts accepted connections.
pub async fn spawn_echo_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo");
    let addr = listener.local_addr().expect("echo addr");
    let accepts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    (addr, accepts)
}

pub fn agent(id: &str, ip: Option<&str>, tier: Option<&str>, webhook: Option<&str>) -> Agent {
    Agent {
        id: id.into(),
        name: id.to_uppercase(),
        ip: ip.map(String::from),
        webhook_url: webhook.map(String::from),
        tier: tier.map(String::from),
        description: None,
    }
}

/// A running forward proxy with handles to everything the tests poke at.
pub struct ForwardHarness {
    pub addr: SocketAddr,
    pub engine: Arc<RuleEngine>,
    pub modes: Arc<ModeManager>,
    pub registry: Arc<FleetRegistry>,
    pub traffic: Arc<TrafficLog>,
    shutdown: watch::Sender<bool>,
}

impl Drop for ForwardHarness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn a forward proxy on an ephemeral port. When `register_client` is
/// set, 127.0.0.1 is registered as agent `test-agent` (tier crew) so the
/// test client passes admission.
pub async fn spawn_forward_proxy(rules_yaml: &str, register_client: bool) -> ForwardHarness {
    let engine = Arc::new(RuleEngine::new());
    engine
        .load_from_bytes(rules_yaml.as_bytes())
        .expect("load test rules");
    let modes = Arc::new(ModeManager::new());
    let registry = Arc::new(FleetRegistry::new());
    if register_client {
        registry
            .add_agent("tenant-1", agent("test-agent", Some("127.0.0.1"), None, None))
            .expect("register test agent");
    }
    let traffic = Arc::new(TrafficLog::new(100));
    let inspector = Arc::new(Inspector::new(Arc::clone(&engine), Arc::clone(&modes)));
    let proxy = Arc::new(
        ForwardProxy::new(inspector, Arc::clone(&traffic))
            .expect("build proxy")
            .with_registry(Arc::clone(&registry)),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy addr");
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(proxy.run(listener, rx));

    ForwardHarness {
        addr,
        engine,
        modes,
        registry,
        traffic,
        shutdown,
    }
}

/// An HTTP client routing everything through the forward proxy.
pub fn proxy_client(proxy: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy}")).expect("proxy url"))
        .build()
        .expect("build client")
}

/// Send a CONNECT request and read the response head. Returns the status
/// line and the still-open stream.
pub async fn connect_via_proxy(proxy: SocketAddr, target: &str) -> (String, TcpStream) {
    let mut stream = TcpStream::connect(proxy).await.expect("dial proxy");
    stream
        .write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())
        .await
        .expect("send CONNECT");

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.expect("read response head");
        if n == 0 {
            break;
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default().to_string();
    (status_line, stream)
}

/// A running reverse proxy plus its registry.
pub struct ReverseHarness {
    pub addr: SocketAddr,
    pub proxy: Arc<ReverseProxy>,
    pub registry: Arc<FleetRegistry>,
}

/// Spawn a reverse proxy on an ephemeral port; `setup` populates the
/// registry before serving starts.
pub async fn spawn_reverse_proxy(setup: impl FnOnce(&FleetRegistry)) -> ReverseHarness {
    let registry = Arc::new(FleetRegistry::new());
    setup(&registry);
    let proxy = Arc::new(ReverseProxy::new(Arc::clone(&registry)).expect("build reverse proxy"));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind reverse");
    let addr = listener.local_addr().expect("reverse addr");
    let router = Arc::clone(&proxy).router();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    ReverseHarness {
        addr,
        proxy,
        registry,
    }
}
