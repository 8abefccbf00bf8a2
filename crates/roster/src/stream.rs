//! Event stream consumer.
//!
//! Keeps a WebSocket connection to the event service open, hands each inbound batch to the
//! reconciliation path over a bounded channel, and acknowledges every decoded batch on the
//! connection it arrived on once all of its events have been routed.
//!
//! Connection lifecycle: `Disconnected -> Connecting -> Connected -> Disconnected` on error or
//! close, then reconnect after a bounded exponential backoff. A batch that was in flight when
//! the connection dropped is never acknowledged; the event service redelivers it after the
//! reconnect, and reconciliation is idempotent.

use crate::config::{Backoff, StreamConfig};
use crate::envelope::{decode_batch, DecodeError};
use crate::router::{BatchReport, EventRouter};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(tungstenite::Error),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("send failed: {0}")]
    Send(tungstenite::Error),
    #[error("receive failed: {0}")]
    Receive(tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Control message sent to the event service. Field order is part of the wire format.
#[derive(Serialize)]
struct Control<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    topic: &'a str,
}

fn control(kind: &str, topic: &str) -> String {
    // Serializing two borrowed strings cannot fail.
    serde_json::to_string(&Control { kind, topic }).unwrap_or_default()
}

/// One inbound message plus the outbound half of the connection it arrived on.
#[derive(Debug)]
pub struct Batch {
    pub text: String,
    ack: mpsc::UnboundedSender<Message>,
}

impl Batch {
    pub fn new(text: impl Into<String>, ack: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            text: text.into(),
            ack,
        }
    }

    /// True once the originating connection has gone away.
    pub fn is_stale(&self) -> bool {
        self.ack.is_closed()
    }
}

/// Resolves once shutdown is requested (or the shutdown sender is dropped).
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Owns the WebSocket connection lifecycle.
pub struct StreamConsumer {
    config: StreamConfig,
    state_tx: watch::Sender<ConnectionState>,
}

impl StreamConsumer {
    pub fn new(config: StreamConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { config, state_tx }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Watch connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            tracing::debug!(from = prev.as_str(), to = state.as_str(), "event stream state");
        }
    }

    /// Run until shutdown or until the batch receiver is dropped. Call from a spawned task.
    pub async fn run(self: Arc<Self>, batches: mpsc::Sender<Batch>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.reconnection.clone());
        loop {
            if *shutdown.borrow() {
                break;
            }
            let result = self.run_once(&batches, &mut shutdown, &mut backoff).await;
            self.set_state(ConnectionState::Disconnected);
            match result {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        reason = %e,
                        delay_ms = delay.as_millis() as u64,
                        "event stream disconnected, reconnecting..."
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
            }
        }
        tracing::info!(topic = %self.config.topic, "event stream consumer stopped");
    }

    /// One connection. `Ok(())` means stop for good; `Err` means reconnect.
    async fn run_once(
        &self,
        batches: &mpsc::Sender<Batch>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<(), TransportError> {
        self.set_state(ConnectionState::Connecting);
        let connect = timeout(Duration::from_secs(10), connect_async(self.config.url.as_str()));
        let ws_stream = tokio::select! {
            r = connect => match r {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(e)) => return Err(TransportError::Connect(e)),
                Err(_) => return Err(TransportError::ConnectTimeout),
            },
            _ = shutdown_requested(shutdown) => return Ok(()),
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        ws_sender
            .send(Message::Text(control("listen", &self.config.topic)))
            .await
            .map_err(TransportError::Send)?;
        self.set_state(ConnectionState::Connected);
        backoff.reset();
        tracing::info!(url = %self.config.url, topic = %self.config.topic, "event stream connected");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        loop {
            tokio::select! {
                _ = shutdown_requested(shutdown) => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(out) = out_rx.recv() => {
                    ws_sender.send(out).await.map_err(TransportError::Send)?;
                }
                msg = ws_receiver.next() => {
                    let text = match msg {
                        None => return Err(TransportError::Closed),
                        Some(Err(e)) => return Err(TransportError::Receive(e)),
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Binary(b))) => match String::from_utf8(b) {
                            Ok(t) => t,
                            Err(e) => {
                                tracing::warn!(reason = %e, "dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                        Some(Ok(_)) => continue,
                    };
                    let batch = Batch::new(text, out_tx.clone());
                    tokio::select! {
                        r = batches.send(batch) => {
                            if r.is_err() {
                                let _ = ws_sender.send(Message::Close(None)).await;
                                return Ok(());
                            }
                        }
                        _ = shutdown_requested(shutdown) => {
                            let _ = ws_sender.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Decodes, routes, and acknowledges batches, one at a time.
pub struct BatchProcessor {
    router: EventRouter,
    topic: String,
}

impl BatchProcessor {
    pub fn new(router: EventRouter, topic: impl Into<String>) -> Self {
        Self {
            router,
            topic: topic.into(),
        }
    }

    /// The acknowledgment sent after each processed batch: `{"type":"ack","topic":"<topic>"}`.
    pub fn ack_message(&self) -> String {
        control("ack", &self.topic)
    }

    /// Decode and route one batch. Malformed envelopes and events are skipped; only an
    /// undecodable message fails.
    pub async fn process(&self, text: &str) -> Result<BatchReport, DecodeError> {
        let decoded = decode_batch(text)?;
        let mut report = self.router.dispatch(&decoded.events).await;
        report.failed += decoded.skipped.len();
        Ok(report)
    }

    /// Process batches until shutdown or until the sending side closes.
    pub async fn run(self, mut batches: mpsc::Receiver<Batch>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                b = batches.recv() => match b {
                    Some(b) => b,
                    None => break,
                },
            };
            if batch.is_stale() {
                tracing::debug!("dropping batch from closed connection");
                continue;
            }
            match self.process(&batch.text).await {
                Ok(report) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if batch.ack.send(Message::Text(self.ack_message())).is_err() {
                        tracing::debug!("connection closed before ack; batch will be redelivered");
                        continue;
                    }
                    tracing::debug!(
                        handled = report.handled,
                        ignored = report.ignored,
                        failed = report.failed,
                        "batch acknowledged"
                    );
                }
                Err(e) => {
                    tracing::warn!(reason = %e, "dropping undecodable batch");
                }
            }
        }
        tracing::info!(topic = %self.topic, "batch processor stopped");
    }
}

/// Handles to a running consumer/processor pair.
pub struct StreamTasks {
    pub consumer: Arc<StreamConsumer>,
    pub receive: JoinHandle<()>,
    pub process: JoinHandle<()>,
}

impl StreamTasks {
    /// Wait for both tasks to finish (after shutdown has been signalled).
    pub async fn join(self) {
        let _ = self.receive.await;
        let _ = self.process.await;
    }
}

/// Spawn the consumer and the processor connected by a bounded channel.
pub fn spawn(config: StreamConfig, router: EventRouter, shutdown: watch::Receiver<bool>) -> StreamTasks {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let processor = BatchProcessor::new(router, config.topic.clone());
    let consumer = Arc::new(StreamConsumer::new(config));
    let receive = tokio::spawn(Arc::clone(&consumer).run(tx, shutdown.clone()));
    let process = tokio::spawn(processor.run(rx, shutdown));
    StreamTasks {
        consumer,
        receive,
        process,
    }
}
