//! Common helpers for integration tests: a mock event service, a mock gateway, and a running
//! roster instance wired to both.

#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use roster::{
    api, member_router, stream, AppState, GatewayConfig, HttpGateway, InMemoryStore, Reconciler,
    StreamConfig, StreamTasks,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing_subscriber::EnvFilter;

pub const TOPIC: &str = "dev";
pub const ACK: &str = r#"{"type":"ack","topic":"dev"}"#;
pub const LISTEN: &str = r#"{"type":"listen","topic":"dev"}"#;
pub const ADDR: &str = "0x0000000000000000000000000000000000000001";
pub const SIGNATURE: &str = "MemberRegistered(address,string,string,string,uint256)";

const WAIT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("roster=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

/// Envelope for a MemberRegistered event.
pub fn member_registered(address: &str, name: &str, app2app: &str, docex: &str, timestamp: u64) -> Value {
    serde_json::json!({
        "signature": SIGNATURE,
        "data": {
            "member": address,
            "name": name,
            "app2appDestination": app2app,
            "docExchangeDestination": docex,
            "timestamp": timestamp
        }
    })
}

/// WebSocket server standing in for the event service. Accepted connections are queued.
pub struct MockEventStream {
    pub url: String,
    conns: mpsc::UnboundedReceiver<MockConnection>,
}

pub struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

pub async fn spawn_event_stream() -> MockEventStream {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind event stream");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(tcp).await {
                if tx.send(MockConnection { ws }).is_err() {
                    break;
                }
            }
        }
    });
    MockEventStream {
        url: format!("ws://{}", addr),
        conns: rx,
    }
}

impl MockEventStream {
    /// Next client connection, with its listen message already consumed and checked.
    pub async fn next_connection(&mut self) -> MockConnection {
        let mut conn = timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("event stream closed");
        assert_eq!(conn.recv_text().await, LISTEN);
        conn
    }
}

impl MockConnection {
    pub async fn send_text(&mut self, text: impl Into<String>) {
        self.ws.send(Message::Text(text.into())).await.expect("send batch");
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) {
        self.ws.send(Message::Binary(bytes)).await.expect("send binary");
    }

    pub async fn send_batch(&mut self, envelopes: Value) {
        self.send_text(envelopes.to_string()).await;
    }

    /// Next data message from the client, or None if the connection closed.
    pub async fn recv(&mut self, wait: Duration) -> Option<Message> {
        loop {
            match timeout(wait, self.ws.next()).await {
                Err(_) => return None,
                Ok(None) | Ok(Some(Err(_))) => return None,
                Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
                Ok(Some(Ok(m))) => return Some(m),
            }
        }
    }

    pub async fn recv_text(&mut self) -> String {
        match self.recv(WAIT).await {
            Some(Message::Text(t)) => t,
            other => panic!("expected text message, got {:?}", other),
        }
    }

    /// Asserts nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(m))) = timeout(wait, self.ws.next()).await {
            panic!("unexpected message: {:?}", m);
        }
    }

    /// Waits for the client to close the connection.
    pub async fn expect_closed(&mut self) {
        match self.recv(WAIT).await {
            None | Some(Message::Close(_)) => {}
            Some(m) => panic!("expected close, got {:?}", m),
        }
    }

    pub async fn drop_connection(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// One recorded registerMember call.
#[derive(Debug, Clone)]
pub struct GatewayCall {
    pub query: HashMap<String, String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct GatewayState {
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    status: Arc<AtomicU16>,
}

/// HTTP server standing in for the ledger gateway.
pub struct MockGateway {
    pub url: String,
    state: GatewayState,
}

async fn register_member(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.calls.lock().await.push(GatewayCall { query, body });
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK);
    (status, Json(serde_json::json!({ "sent": true })))
}

pub async fn spawn_gateway() -> MockGateway {
    let state = GatewayState::default();
    state.status.store(200, Ordering::SeqCst);
    let app = Router::new()
        .route("/registerMember", post(register_member))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    MockGateway {
        url: format!("http://{}", addr),
        state,
    }
}

impl MockGateway {
    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.calls.lock().await.clone()
    }

    pub fn respond_with(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }
}

/// A running roster instance (API + stream tasks) wired to the mocks.
pub struct Harness {
    pub api_url: String,
    pub http: reqwest::Client,
    pub events: MockEventStream,
    pub gateway: MockGateway,
    pub reconciler: Arc<Reconciler>,
    pub tasks: Option<StreamTasks>,
    pub shutdown: watch::Sender<bool>,
}

impl Harness {
    pub async fn start() -> Self {
        init_tracing();
        let events = spawn_event_stream().await;
        let gateway = spawn_gateway().await;

        let http_gateway = HttpGateway::new(GatewayConfig {
            url: gateway.url.clone(),
            username: None,
            password: None,
            timeout_secs: 5,
        })
        .expect("gateway client");
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(http_gateway),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = stream::spawn(
            StreamConfig::new(events.url.clone(), TOPIC),
            member_router(Arc::clone(&reconciler)),
            shutdown_rx.clone(),
        );

        let app = api::router(AppState {
            reconciler: Arc::clone(&reconciler),
            stream_state: tasks.consumer.state(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind api");
        let api_url = format!("http://{}", listener.local_addr().expect("local addr"));
        let mut server_shutdown = shutdown_rx;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.wait_for(|stop| *stop).await;
                })
                .await;
        });

        Self {
            api_url,
            http: reqwest::Client::new(),
            events,
            gateway,
            reconciler,
            tasks: Some(tasks),
            shutdown,
        }
    }

    pub async fn put_member(&self, body: Value) -> (u16, Value) {
        self.put_member_at("/members", body).await
    }

    pub async fn put_member_at(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .put(format!("{}{}", self.api_url, path))
            .json(&body)
            .send()
            .await
            .expect("PUT members");
        let status = resp.status().as_u16();
        (status, resp.json().await.expect("json body"))
    }

    pub async fn members(&self) -> Vec<Value> {
        self.members_at("/members").await
    }

    pub async fn members_at(&self, path: &str) -> Vec<Value> {
        let resp = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .send()
            .await
            .expect("GET members");
        assert_eq!(resp.status().as_u16(), 200);
        resp.json().await.expect("json body")
    }

    /// Signal shutdown and wait for the stream tasks to stop.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(tasks) = self.tasks.take() {
            timeout(WAIT, tasks.join()).await.expect("stream tasks did not stop");
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
