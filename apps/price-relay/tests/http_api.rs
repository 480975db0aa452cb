//! HTTP and WebSocket Integration Tests
//!
//! Runs the relay server on an ephemeral port against a scripted upstream
//! and drives it with real WebSocket clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use price_relay::infrastructure::access::StaticKeyGate;
use price_relay::infrastructure::config::ApiKeys;
use price_relay::infrastructure::http::{self, API_KEY_HEADER, AppState, HttpServer};
use price_relay::{
    ConnectorConfig, InstrumentRegistry, ReconnectConfig, StreamingMode, Supervisor,
    SupervisorConfig, TickStore,
};
use support::{FakeUpstream, Session, frame};

const KEY: &str = "integration-key";
const WAIT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Relay {
    addr: SocketAddr,
    state: Arc<AppState>,
    supervisor: Arc<Supervisor>,
    cancel: CancellationToken,
    server: JoinHandle<Result<(), price_relay::HttpServerError>>,
}

impl Relay {
    async fn start(upstream_url: &str, mode: StreamingMode) -> Self {
        let registry = Arc::new(InstrumentRegistry::from_pairs([
            ("EUR/USD", "EURUSD=X"),
            ("BTC/USD", "BTC-USD"),
        ]));
        let config = SupervisorConfig {
            connector: ConnectorConfig::new(upstream_url)
                .with_reconnect(ReconnectConfig::fixed(Duration::from_millis(50))),
            mode,
            ..SupervisorConfig::default()
        };
        let cancel = CancellationToken::new();
        let supervisor = Arc::new(Supervisor::new(
            registry,
            Arc::new(TickStore::default()),
            config,
            cancel.child_token(),
        ));
        let gate = Arc::new(StaticKeyGate::new(ApiKeys::parse(KEY), None));
        let state = Arc::new(AppState::new(
            "test",
            Arc::clone(&supervisor),
            gate,
            cancel.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(
            HttpServer::new(addr.port(), Arc::clone(&state), cancel.clone()).serve(listener),
        );

        Self {
            addr,
            state,
            supervisor,
            cancel,
            server,
        }
    }

    async fn connect(&self, key: Option<&str>) -> Result<Client, tungstenite::Error> {
        let mut request = format!("ws://{}/ws", self.addr).into_client_request().unwrap();
        if let Some(key) = key {
            request
                .headers_mut()
                .insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        }
        tokio_tungstenite::connect_async(request)
            .await
            .map(|(ws, _)| ws)
    }

    async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .uri(uri)
            .header(API_KEY_HEADER, KEY)
            .body(Body::empty())
            .unwrap();
        let response = http::router(Arc::clone(&self.state))
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
        )
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.supervisor.shutdown().await;
        timeout(WAIT, self.server).await.unwrap().unwrap().unwrap();
    }
}

async fn next_text(client: &mut Client) -> String {
    loop {
        match timeout(WAIT, client.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

async fn expect_close(client: &mut Client) {
    match timeout(WAIT, client.next()).await.unwrap() {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

fn repeating(symbol: &str, price: f32) -> Session {
    Session::Repeat(
        frame(symbol, price, Utc::now().timestamp_millis()),
        Duration::from_millis(20),
    )
}

// =============================================================================
// Access gate
// =============================================================================

#[tokio::test]
async fn websocket_requires_api_key() {
    let upstream = FakeUpstream::start(vec![]).await;
    let relay = Relay::start(&upstream.url, StreamingMode::Dedicated).await;

    for key in [None, Some("wrong-key")] {
        match relay.connect(key).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status().as_u16(), 401);
            }
            other => panic!("expected 401, got {:?}", other.map(|_| ())),
        }
    }
    assert_eq!(upstream.accepted(), 0);
    relay.stop().await;
}

// =============================================================================
// Live streaming
// =============================================================================

#[tokio::test]
async fn unknown_timeframe_rejected_before_upstream() {
    let upstream = FakeUpstream::start(vec![repeating("EURUSD=X", 1.1)]).await;
    let relay = Relay::start(&upstream.url, StreamingMode::Dedicated).await;

    let mut client = relay.connect(Some(KEY)).await.unwrap();
    client
        .send(Message::Text(r#"{"pair":"EUR/USD","timeframe":"xyz"}"#.into()))
        .await
        .unwrap();

    let error = next_text(&mut client).await;
    assert!(error.starts_with("error:"), "{error}");
    assert!(error.contains("xyz"), "{error}");
    expect_close(&mut client).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(upstream.accepted(), 0);
    assert_eq!(relay.supervisor.live_clients(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn unknown_pair_rejected_before_upstream() {
    let upstream = FakeUpstream::start(vec![]).await;
    let relay = Relay::start(&upstream.url, StreamingMode::Dedicated).await;

    let mut client = relay.connect(Some(KEY)).await.unwrap();
    client.send(Message::Text("XYZ/ABC".into())).await.unwrap();

    let error = next_text(&mut client).await;
    assert!(error.contains("XYZ/ABC"), "{error}");
    expect_close(&mut client).await;
    assert_eq!(upstream.accepted(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn dedicated_stream_passes_ticks_through() {
    let mut upstream = FakeUpstream::start(vec![repeating("EURUSD=X", 1.25)]).await;
    let relay = Relay::start(&upstream.url, StreamingMode::Dedicated).await;

    let mut client = relay.connect(Some(KEY)).await.unwrap();
    client.send(Message::Text("EUR/USD".into())).await.unwrap();

    let message: serde_json::Value = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(message["pair"], "EUR/USD");
    assert!((message["price"].as_f64().unwrap() - 1.25).abs() < 1e-6);
    assert!(message["timestamp"].is_string());
    assert_eq!(relay.supervisor.live_clients(), 1);

    let subscribe = timeout(WAIT, upstream.subscriptions.recv()).await.unwrap().unwrap();
    assert!(subscribe.contains("EURUSD=X"));

    client.close(None).await.unwrap();
    let supervisor = Arc::clone(&relay.supervisor);
    wait_until(|| supervisor.live_clients() == 0).await;
    assert_eq!(upstream.accepted(), 1);
    relay.stop().await;
}

#[tokio::test]
async fn candle_stream_sends_ohlc() {
    let upstream = FakeUpstream::start(vec![repeating("EURUSD=X", 1.5)]).await;
    let relay = Relay::start(&upstream.url, StreamingMode::Dedicated).await;

    let mut client = relay.connect(Some(KEY)).await.unwrap();
    client
        .send(Message::Text(r#"{"pair":"EUR/USD","timeframe":"1m"}"#.into()))
        .await
        .unwrap();

    let message: serde_json::Value = serde_json::from_str(&next_text(&mut client).await).unwrap();
    assert_eq!(message["pair"], "EUR/USD");
    assert_eq!(message["timeframe"], "1m");
    for field in ["open", "high", "low", "close"] {
        assert!((message[field].as_f64().unwrap() - 1.5).abs() < 1e-6, "{field}");
    }
    assert!(message["bucket_start"].is_string());
    relay.stop().await;
}

#[tokio::test]
async fn pooled_clients_share_monitor_connections() {
    let upstream = FakeUpstream::start(vec![
        repeating("EURUSD=X", 1.1),
        repeating("BTC-USD", 65_000.0),
    ])
    .await;
    let relay = Relay::start(&upstream.url, StreamingMode::Pooled).await;
    assert_eq!(relay.supervisor.start_monitoring(), 2);

    let mut first = relay.connect(Some(KEY)).await.unwrap();
    let mut second = relay.connect(Some(KEY)).await.unwrap();
    first.send(Message::Text("EUR/USD".into())).await.unwrap();
    second.send(Message::Text("EUR/USD".into())).await.unwrap();

    for client in [&mut first, &mut second] {
        let message: serde_json::Value = serde_json::from_str(&next_text(client).await).unwrap();
        assert_eq!(message["pair"], "EUR/USD");
    }
    assert_eq!(upstream.accepted(), 2);
    assert_eq!(relay.supervisor.hub_stats().receivers, 2);
    relay.stop().await;
}

// =============================================================================
// Polling
// =============================================================================

#[tokio::test]
async fn monitors_fill_the_store_for_polling() {
    let upstream = FakeUpstream::start(vec![
        repeating("EURUSD=X", 1.1),
        repeating("BTC-USD", 65_000.0),
    ])
    .await;
    let relay = Relay::start(&upstream.url, StreamingMode::Dedicated).await;

    let (status, _) = relay.get("/prices?pair=EUR/USD").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    relay.supervisor.start_monitoring();
    let store = Arc::clone(relay.supervisor.store());
    wait_until(|| store.stats().instruments == 2).await;

    let (status, body) = relay.get("/prices?pair=EUR/USD&timeframe=5m").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timeframe"], "5m");
    assert_eq!(body["prices"].as_array().unwrap().len(), 4);

    let (status, _) = relay.get("/prices").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = relay.get("/prices?pair=EUR/USD&timeframe=xyz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let supervisor = Arc::clone(&relay.supervisor);
    wait_until(|| supervisor.is_ready()).await;
    let (status, body) = relay.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["monitors"].as_array().unwrap().len(), 2);
    relay.stop().await;
}
