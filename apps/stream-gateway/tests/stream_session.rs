//! End-to-end session tests against an in-process WebSocket server.
//!
//! Covers the transport's observable contract: subscribe frames on the
//! wire, cache updates before fan-out, replay with original ids after a
//! reconnect, subscriber isolation and FIFO flushing of queued sends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dsky_stream_gateway::{
    ConnectionManager, ConnectionSettings, ConnectionState, Envelope, MessageDispatcher,
    SendOutcome, StreamCache, StreamEvent, SubscriptionRegistry, SubscriptionType,
};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

fn gateway(url: &str) -> (Arc<ConnectionManager>, Arc<StreamCache>) {
    let cache = Arc::new(StreamCache::with_defaults());
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&cache),
        Arc::clone(&registry),
    ));
    let settings = ConnectionSettings {
        url: url.to_string(),
        reconnect_attempts: 5,
        reconnect_interval: Duration::from_millis(50),
        // Long enough that no ping interferes with these tests.
        heartbeat_interval: Duration::from_secs(60),
        ..ConnectionSettings::default()
    };
    let manager = ConnectionManager::new(settings, registry, dispatcher);
    (manager, cache)
}

async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.expect("accept connection");
    accept_async(stream).await.expect("websocket handshake")
}

/// Read text frames until one matches `wanted_type`; returns its JSON.
async fn next_frame_of_type(ws: &mut ServerWs, wanted_type: &str) -> serde_json::Value {
    loop {
        let message = ws
            .next()
            .await
            .expect("connection stayed open")
            .expect("frame read");
        if let Message::Text(text) = message {
            let value: serde_json::Value =
                serde_json::from_str(text.as_str()).expect("valid JSON frame");
            if value["type"] == wanted_type {
                return value;
            }
        }
    }
}

fn price_frame(symbol: &str, price: f64) -> Message {
    let frame = serde_json::json!({
        "type": "PRICE_UPDATE",
        "data": {"symbol": symbol, "price": price, "change": 1.2, "volume": 900},
        "timestamp": 1_712_345_678_901_i64,
    });
    Message::Text(frame.to_string().into())
}

#[tokio::test]
async fn price_update_reaches_subscriber_and_cache() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let subscribe = next_frame_of_type(&mut ws, "SUBSCRIBE").await;
        assert_eq!(subscribe["data"]["type"], "CRYPTO_PRICES");
        assert_eq!(subscribe["data"]["params"]["symbol"], "BTC");
        let subscription_id = subscribe["data"]["id"]
            .as_str()
            .expect("subscription id")
            .to_string();

        ws.send(price_frame("BTC", 50_000.0))
            .await
            .expect("push price frame");

        // Hold the socket open while the client asserts.
        tokio::time::sleep(Duration::from_millis(500)).await;
        subscription_id
    });

    let (manager, cache) = gateway(&url);
    manager.connect().await.expect("connect");
    assert_eq!(manager.state(), ConnectionState::Connected);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut params = BTreeMap::new();
    params.insert("symbol".to_string(), "BTC".to_string());
    let local_id = manager.subscribe(
        SubscriptionType::CryptoPrices,
        params,
        Box::new(move |event| {
            event_tx.send(event.clone()).map_err(Into::into)
        }),
        None,
    );

    let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("payload within deadline")
        .expect("channel open");

    let StreamEvent::Price(price) = &event else {
        panic!("expected a price event, got {event:?}");
    };
    assert_eq!(price.symbol, "BTC");
    assert_eq!(price.price, Decimal::from(50_000));

    // Exactly one delivery for one frame.
    assert!(event_rx.try_recv().is_err());

    // The cache holds the same payload under the stream key.
    let cached = cache.get("price:BTC").expect("cached price");
    assert_eq!(cached.as_price().map(|p| p.price), Some(Decimal::from(50_000)));

    // The wire carried our locally generated id.
    let wire_id = server.await.expect("server task");
    assert_eq!(wire_id, local_id);

    let stats = manager.stats();
    assert!(stats.messages_received >= 1);
    assert!(stats.messages_sent >= 1);

    manager.disconnect();
}

#[tokio::test]
async fn reconnect_replays_subscriptions_with_original_ids() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        // First connection: wait for three subscriptions, then drop the
        // socket without a close frame.
        let mut ws = accept(&listener).await;
        for _ in 0..3 {
            let _ = next_frame_of_type(&mut ws, "SUBSCRIBE").await;
        }
        drop(ws);

        // Second connection: the replay pass must re-send exactly the
        // same three subscriptions.
        let mut ws = accept(&listener).await;
        let mut replayed = Vec::new();
        for _ in 0..3 {
            let frame = next_frame_of_type(&mut ws, "SUBSCRIBE").await;
            replayed.push(frame["data"]["id"].as_str().expect("id").to_string());
        }

        // No fourth SUBSCRIBE may trail the replay.
        let extra = tokio::time::timeout(Duration::from_millis(300), async {
            next_frame_of_type(&mut ws, "SUBSCRIBE").await
        })
        .await;
        assert!(extra.is_err(), "unexpected extra SUBSCRIBE after replay");

        replayed
    });

    let (manager, _cache) = gateway(&url);
    manager.connect().await.expect("connect");

    let mut expected = Vec::new();
    for stream in [
        SubscriptionType::CryptoPrices,
        SubscriptionType::BlockHeaders,
        SubscriptionType::GasPrices,
    ] {
        expected.push(manager.subscribe(stream, BTreeMap::new(), Box::new(|_| Ok(())), None));
    }

    let replayed = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server within deadline")
        .expect("server task");

    // Same ids, same registration order.
    assert_eq!(replayed, expected);
    assert_eq!(manager.subscription_count(), 3);

    manager.disconnect();
}

#[tokio::test]
async fn failing_subscriber_does_not_starve_the_healthy_one() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        for _ in 0..2 {
            let _ = next_frame_of_type(&mut ws, "SUBSCRIBE").await;
        }
        ws.send(price_frame("ETH", 3_000.0))
            .await
            .expect("push price frame");
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let (manager, _cache) = gateway(&url);
    manager.connect().await.expect("connect");

    let error_count = Arc::new(AtomicUsize::new(0));
    let errors_seen = Arc::clone(&error_count);
    manager.subscribe(
        SubscriptionType::CryptoPrices,
        BTreeMap::new(),
        Box::new(|_| Err("display unit offline".into())),
        Some(Box::new(move |_| {
            errors_seen.fetch_add(1, Ordering::SeqCst);
        })),
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    manager.subscribe(
        SubscriptionType::CryptoPrices,
        BTreeMap::new(),
        Box::new(move |event| {
            event_tx.send(event.clone()).map_err(Into::into)
        }),
        None,
    );

    let event = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("healthy subscriber still delivered to")
        .expect("channel open");
    assert_eq!(
        event.subscription_type(),
        SubscriptionType::CryptoPrices
    );
    assert_eq!(error_count.load(Ordering::SeqCst), 1);

    server.await.expect("server task");
    manager.disconnect();
}

#[tokio::test]
async fn queued_sends_flush_in_fifo_order_on_connect() {
    let (listener, url) = bind().await;

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;

        let first = next_frame_of_type(&mut ws, "UNSUBSCRIBE").await;
        let second = next_frame_of_type(&mut ws, "UNSUBSCRIBE").await;
        (
            first["data"]["id"].as_str().expect("id").to_string(),
            second["data"]["id"].as_str().expect("id").to_string(),
        )
    });

    let (manager, _cache) = gateway(&url);

    // Queued while disconnected; flushed oldest-first once connected.
    assert_eq!(
        manager.send(Envelope::unsubscribe("probe-1")),
        SendOutcome::Queued
    );
    assert_eq!(
        manager.send(Envelope::unsubscribe("probe-2")),
        SendOutcome::Queued
    );

    manager.connect().await.expect("connect");

    let (first, second) = tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server within deadline")
        .expect("server task");
    assert_eq!(first, "probe-1");
    assert_eq!(second, "probe-2");

    // Once connected, sends go straight through.
    assert_eq!(
        manager.send(Envelope::unsubscribe("probe-3")),
        SendOutcome::Sent
    );

    manager.disconnect();
}

#[tokio::test]
async fn exhausted_reconnect_budget_leaves_manager_disconnected() {
    let (listener, url) = bind().await;

    // Accept exactly one connection, then close the listener so every
    // reconnect attempt fails.
    let server = tokio::spawn(async move {
        let ws = accept(&listener).await;
        drop(ws);
        drop(listener);
    });

    let cache = Arc::new(StreamCache::with_defaults());
    let registry = Arc::new(SubscriptionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(
        Arc::clone(&cache),
        Arc::clone(&registry),
    ));
    let settings = ConnectionSettings {
        url,
        reconnect_attempts: 2,
        reconnect_interval: Duration::from_millis(20),
        heartbeat_interval: Duration::from_secs(60),
        ..ConnectionSettings::default()
    };
    let manager = ConnectionManager::new(settings, registry, dispatcher);

    manager.connect().await.expect("initial connect");
    server.await.expect("server task");

    // 2 attempts at 20ms and 40ms, plus handshake failures.
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.stats().reconnect_attempts, 2);
}
