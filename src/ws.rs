//! Realtime swap status channel.
//!
//! One websocket per backend carries `swap.update` events for every
//! subscribed swap id. The channel keeps the set of tracked ids itself: a
//! reconnect re-subscribes the full set, an incremental subscribe only sends
//! the ids that are new. Connections dropped by the server are reopened after
//! a fixed delay; a close we initiated is final.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::api::types::StatusEvent;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

const SWAP_UPDATE_CHANNEL: &str = "swap.update";

/// Consumes status events, one at a time per channel.
#[async_trait]
pub trait SwapEventHandler: Send + Sync {
    async fn on_status(&self, event: &StatusEvent) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed { clean: bool },
}

#[derive(Debug, Clone)]
pub struct StatusChannelConfig {
    pub url: String,
    /// Tried when the primary endpoint is unreachable. Every reconnect cycle
    /// dials the primary first, so a recovered primary wins the next attempt.
    pub fallback_url: Option<String>,
    pub reconnect_delay: Duration,
}

impl StatusChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fallback_url: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    op: &'static str,
    channel: &'static str,
    args: &'a [String],
}

#[derive(Deserialize)]
struct IncomingFrame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    args: Option<serde_json::Value>,
}

fn subscribe_frame(ids: &[String]) -> String {
    serde_json::to_string(&SubscribeRequest {
        op: "subscribe",
        channel: SWAP_UPDATE_CHANNEL,
        args: ids,
    })
    .expect("subscribe frame serializes")
}

struct ChannelInner {
    config: StatusChannelConfig,
    tracked: Mutex<BTreeSet<String>>,
    state: Mutex<ChannelState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    shutdown: AtomicBool,
    /// Serializes event handling so two updates can never race a claim.
    handler_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct StatusChannel {
    inner: Arc<ChannelInner>,
}

impl StatusChannel {
    pub fn new(config: StatusChannelConfig) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                config,
                tracked: Mutex::new(BTreeSet::new()),
                state: Mutex::new(ChannelState::Closed { clean: true }),
                outbound: Mutex::new(None),
                shutdown: AtomicBool::new(false),
                handler_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock().expect("state mutex poisoned")
    }

    pub fn tracked_ids(&self) -> Vec<String> {
        self.inner
            .tracked
            .lock()
            .expect("tracked set mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Subscribes the given swap ids. Ids that are all already tracked make
    /// this a no-op unless `force` is set; the frame carries exactly the given
    /// ids either way.
    pub fn subscribe(&self, ids: impl IntoIterator<Item = String>, force: bool) {
        let new_ids: Vec<String> = ids.into_iter().collect();
        {
            let mut tracked = self
                .inner
                .tracked
                .lock()
                .expect("tracked set mutex poisoned");
            let all_known = new_ids.iter().all(|id| tracked.contains(id));
            tracked.extend(new_ids.iter().cloned());
            if all_known && !force {
                return;
            }
        }
        if new_ids.is_empty() {
            return;
        }
        self.send_text(subscribe_frame(&new_ids));
    }

    /// Requests a clean close. `run` returns after the close handshake.
    pub fn close(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let sender = self
            .inner
            .outbound
            .lock()
            .expect("outbound mutex poisoned")
            .clone();
        if let Some(sender) = sender {
            let _ = sender.send(Message::Close(None));
        }
    }

    fn send_text(&self, frame: String) {
        let sender = self
            .inner
            .outbound
            .lock()
            .expect("outbound mutex poisoned")
            .clone();
        if let Some(sender) = sender {
            // A failed send just means the connection is gone; the reconnect
            // re-subscribes the full tracked set anyway.
            let _ = sender.send(Message::Text(frame.into()));
        }
    }

    fn set_state(&self, state: ChannelState) {
        *self.inner.state.lock().expect("state mutex poisoned") = state;
    }

    /// Connects and pumps events into the handler until `close` is called.
    pub async fn run(&self, handler: Arc<dyn SwapEventHandler>) -> Result<()> {
        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                self.set_state(ChannelState::Closed { clean: true });
                return Ok(());
            }

            self.set_state(ChannelState::Connecting);
            let Some((stream, url)) = self.connect().await else {
                self.set_state(ChannelState::Closed { clean: false });
                tokio::time::sleep(self.inner.config.reconnect_delay).await;
                continue;
            };
            info!(url = %url, "status channel connected");

            let clean = self.serve(stream, handler.as_ref()).await;
            *self
                .inner
                .outbound
                .lock()
                .expect("outbound mutex poisoned") = None;
            self.set_state(ChannelState::Closed { clean });

            if clean {
                return Ok(());
            }
            warn!(
                delay_ms = self.inner.config.reconnect_delay.as_millis() as u64,
                "status channel lost, reconnecting"
            );
            tokio::time::sleep(self.inner.config.reconnect_delay).await;
        }
    }

    /// Dials the primary endpoint, then the fallback if one is configured.
    async fn connect(&self) -> Option<(WebSocketStream<MaybeTlsStream<TcpStream>>, String)> {
        let primary = &self.inner.config.url;
        match connect_async(primary).await {
            Ok((stream, _)) => return Some((stream, primary.clone())),
            Err(e) => warn!(error = %e, url = %primary, "status channel connect failed"),
        }

        let fallback = self.inner.config.fallback_url.as_ref()?;
        match connect_async(fallback).await {
            Ok((stream, _)) => Some((stream, fallback.clone())),
            Err(e) => {
                warn!(error = %e, url = %fallback, "status channel fallback connect failed");
                None
            }
        }
    }

    /// Returns whether the connection ended cleanly on our initiative.
    async fn serve(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        handler: &dyn SwapEventHandler,
    ) -> bool {
        let (mut sink, mut source) = stream.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        *self
            .inner
            .outbound
            .lock()
            .expect("outbound mutex poisoned") = Some(sender);
        self.set_state(ChannelState::Open);

        let tracked = self.tracked_ids();
        if !tracked.is_empty()
            && sink
                .send(Message::Text(subscribe_frame(&tracked).into()))
                .await
                .is_err()
        {
            return false;
        }

        loop {
            tokio::select! {
                outgoing = receiver.recv() => match outgoing {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            return false;
                        }
                    }
                    None => return self.inner.shutdown.load(Ordering::SeqCst),
                },
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_str(), handler).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        return self.inner.shutdown.load(Ordering::SeqCst);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "status channel read failed");
                        return false;
                    }
                },
            }
        }
    }

    async fn handle_frame(&self, raw: &str, handler: &dyn SwapEventHandler) {
        let frame: IncomingFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable status channel frame");
                return;
            }
        };

        if frame.event.as_deref() != Some("update")
            || frame.channel.as_deref() != Some(SWAP_UPDATE_CHANNEL)
        {
            debug!(frame = raw, "ignoring status channel frame");
            return;
        }

        let events: Vec<StatusEvent> = match frame.args.map(serde_json::from_value).transpose() {
            Ok(Some(events)) => events,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "unparseable swap update args");
                return;
            }
        };

        for event in events {
            // Updates can arrive for swaps subscribed by a previous session.
            self.inner
                .tracked
                .lock()
                .expect("tracked set mutex poisoned")
                .insert(event.id.clone());

            let _guard = self.inner.handler_lock.lock().await;
            if let Err(e) = handler.on_status(&event).await {
                warn!(swap = %event.id, error = %e, "status event handler failed");
            }
        }
    }
}
