use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use ln_chain_swap::api::types::StatusEvent;
use ln_chain_swap::ws::{ChannelState, StatusChannel, StatusChannelConfig, SwapEventHandler};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

struct Recorder {
    events: Mutex<Vec<StatusEvent>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn statuses(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.id.clone(), e.status.clone()))
            .collect()
    }
}

#[async_trait]
impl SwapEventHandler for Recorder {
    async fn on_status(&self, event: &StatusEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn test_config(url: &str) -> StatusChannelConfig {
    StatusChannelConfig {
        url: url.to_string(),
        fallback_url: None,
        reconnect_delay: Duration::from_millis(100),
    }
}

async fn accept_and_read_subscribe(
    listener: &TcpListener,
) -> (WebSocketStream<TcpStream>, Value) {
    let (stream, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("client connects")
        .unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    loop {
        match timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("client subscribes")
        {
            Some(Ok(Message::Text(text))) => {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                return (ws, frame);
            }
            Some(Ok(_)) => continue,
            other => panic!("expected subscribe frame, got {other:?}"),
        }
    }
}

async fn next_frame(server: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match timeout(Duration::from_secs(2), server.next())
            .await
            .expect("subscribe frame arrives")
        {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).unwrap();
            }
            Some(Ok(_)) => continue,
            other => panic!("expected subscribe frame, got {other:?}"),
        }
    }
}

fn update_frame(id: &str, status: &str) -> Message {
    Message::Text(
        json!({
            "event": "update",
            "channel": "swap.update",
            "args": [{"id": id, "status": status}],
        })
        .to_string()
        .into(),
    )
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn subscribes_and_dispatches_updates() {
    let (listener, url) = bind().await;
    let channel = StatusChannel::new(test_config(&url));
    channel.subscribe(["swap1".to_string()], false);

    let handler = Recorder::new();
    let run = tokio::spawn({
        let channel = channel.clone();
        let handler = handler.clone();
        async move { channel.run(handler).await }
    });

    let (mut server, frame) = accept_and_read_subscribe(&listener).await;
    assert_eq!(frame["op"], "subscribe");
    assert_eq!(frame["channel"], "swap.update");
    assert_eq!(frame["args"], json!(["swap1"]));

    server
        .send(update_frame("swap1", "transaction.mempool"))
        .await
        .unwrap();
    // Ids learned from updates join the tracked set.
    server
        .send(update_frame("swap2", "swap.created"))
        .await
        .unwrap();

    wait_for(|| handler.statuses().len() == 2).await;
    assert_eq!(
        handler.statuses(),
        vec![
            ("swap1".to_string(), "transaction.mempool".to_string()),
            ("swap2".to_string(), "swap.created".to_string()),
        ]
    );
    assert_eq!(
        channel.tracked_ids(),
        vec!["swap1".to_string(), "swap2".to_string()]
    );
    assert_eq!(channel.state(), ChannelState::Open);

    channel.close();
    // Complete the close handshake from the server side.
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();
    assert_eq!(channel.state(), ChannelState::Closed { clean: true });
}

#[tokio::test]
async fn incremental_subscribe_sends_only_new_ids() {
    let (listener, url) = bind().await;
    let channel = StatusChannel::new(test_config(&url));
    channel.subscribe(["a".to_string()], false);

    let run = tokio::spawn({
        let channel = channel.clone();
        async move { channel.run(Recorder::new()).await }
    });

    let (mut server, _) = accept_and_read_subscribe(&listener).await;

    // Known id, not forced: nothing goes out. New id: only it is sent.
    channel.subscribe(["a".to_string()], false);
    channel.subscribe(["b".to_string()], false);
    assert_eq!(next_frame(&mut server).await["args"], json!(["b"]));

    // Forced resend of a known id carries exactly that id, never the whole
    // tracked set.
    channel.subscribe(["a".to_string()], true);
    assert_eq!(next_frame(&mut server).await["args"], json!(["a"]));

    channel.close();
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnects_after_dirty_close_with_full_resubscribe() {
    let (listener, url) = bind().await;
    let channel = StatusChannel::new(test_config(&url));
    channel.subscribe(["a".to_string(), "b".to_string()], false);

    let handler = Recorder::new();
    let run = tokio::spawn({
        let channel = channel.clone();
        let handler = handler.clone();
        async move { channel.run(handler).await }
    });

    let (server, frame) = accept_and_read_subscribe(&listener).await;
    assert_eq!(frame["args"], json!(["a", "b"]));

    // Kill the connection without a close handshake.
    drop(server);

    let (mut server, frame) = accept_and_read_subscribe(&listener).await;
    assert_eq!(frame["args"], json!(["a", "b"]));

    server
        .send(update_frame("a", "transaction.confirmed"))
        .await
        .unwrap();
    wait_for(|| !handler.statuses().is_empty()).await;

    channel.close();
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();
}

struct SlowHandler {
    active: std::sync::atomic::AtomicUsize,
    overlapped: std::sync::atomic::AtomicBool,
    seen: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl SwapEventHandler for SlowHandler {
    async fn on_status(&self, _event: &StatusEvent) -> Result<()> {
        use std::sync::atomic::Ordering;
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn event_handling_is_never_concurrent() {
    let (listener, url) = bind().await;
    let channel = StatusChannel::new(test_config(&url));
    channel.subscribe(["a".to_string()], false);

    let handler = Arc::new(SlowHandler {
        active: std::sync::atomic::AtomicUsize::new(0),
        overlapped: std::sync::atomic::AtomicBool::new(false),
        seen: std::sync::atomic::AtomicUsize::new(0),
    });
    let run = tokio::spawn({
        let channel = channel.clone();
        let handler = handler.clone();
        async move { channel.run(handler).await }
    });

    let (mut server, _) = accept_and_read_subscribe(&listener).await;
    server
        .send(update_frame("a", "transaction.claim.pending"))
        .await
        .unwrap();
    server
        .send(update_frame("b", "transaction.confirmed"))
        .await
        .unwrap();

    wait_for(|| handler.seen.load(std::sync::atomic::Ordering::SeqCst) == 2).await;
    assert!(!handler.overlapped.load(std::sync::atomic::Ordering::SeqCst));

    channel.close();
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn clean_close_does_not_reconnect() {
    let (listener, url) = bind().await;
    let channel = StatusChannel::new(test_config(&url));
    channel.subscribe(["a".to_string()], false);

    let run = tokio::spawn({
        let channel = channel.clone();
        async move { channel.run(Recorder::new()).await }
    });

    let (mut server, _) = accept_and_read_subscribe(&listener).await;
    channel.close();
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();

    // Well past the reconnect delay, nobody dials back in.
    let reconnect = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(reconnect.is_err());
}

#[tokio::test]
async fn reconnect_tries_the_primary_before_the_fallback() {
    let (primary, primary_url) = bind().await;
    let primary_addr = primary.local_addr().unwrap();
    let (fallback, fallback_url) = bind().await;

    let channel = StatusChannel::new(StatusChannelConfig {
        url: primary_url,
        fallback_url: Some(fallback_url),
        reconnect_delay: Duration::from_millis(100),
    });
    channel.subscribe(["a".to_string()], false);

    let run = tokio::spawn({
        let channel = channel.clone();
        async move { channel.run(Recorder::new()).await }
    });

    // First cycle lands on the primary.
    let (server, _) = accept_and_read_subscribe(&primary).await;

    // Primary goes away entirely; the fallback catches the reconnect.
    drop(primary);
    drop(server);
    let (server, _) = accept_and_read_subscribe(&fallback).await;

    // Primary comes back; the next cycle prefers it over the fallback.
    let primary = TcpListener::bind(primary_addr).await.unwrap();
    drop(server);
    let (mut server, frame) = accept_and_read_subscribe(&primary).await;
    assert_eq!(frame["args"], json!(["a"]));

    channel.close();
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn first_connect_failure_switches_to_fallback() {
    // A freshly bound-then-dropped port refuses connections.
    let (dead_listener, dead_url) = bind().await;
    drop(dead_listener);
    let (listener, fallback_url) = bind().await;

    let channel = StatusChannel::new(StatusChannelConfig {
        url: dead_url,
        fallback_url: Some(fallback_url),
        reconnect_delay: Duration::from_millis(100),
    });
    channel.subscribe(["a".to_string()], false);

    let handler = Recorder::new();
    let run = tokio::spawn({
        let channel = channel.clone();
        let handler = handler.clone();
        async move { channel.run(handler).await }
    });

    let (mut server, frame) = accept_and_read_subscribe(&listener).await;
    assert_eq!(frame["args"], json!(["a"]));

    server
        .send(update_frame("a", "invoice.set"))
        .await
        .unwrap();
    wait_for(|| !handler.statuses().is_empty()).await;

    channel.close();
    while let Some(Ok(_)) = server.next().await {}
    run.await.unwrap().unwrap();
}
