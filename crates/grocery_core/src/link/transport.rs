//! Transport seam between the connection manager and the socket.
//!
//! A `Connector` opens a `Channel`: a pair of queues carrying text frames in
//! both directions. The WebSocket implementation runs one pump task per
//! channel that also owns the heartbeat.

use crate::link::{Endpoint, LinkError, LinkResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const CHANNEL_CAPACITY: usize = 64;

/// Events delivered from the transport to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// The peer closed the connection cleanly.
    Closed,
    /// The channel broke: I/O error or heartbeat loss.
    Failed(String),
}

/// Requests from the connection manager to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// An open transport channel.
pub struct Channel {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<Inbound>,
}

impl Channel {
    /// Creates a connected pair: the channel handed to the manager and the
    /// far ends used by the transport implementation.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Outbound>, mpsc::Sender<Inbound>) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> LinkResult<Channel>;
}

/// WebSocket connector with ping-based liveness.
///
/// A channel is declared failed when nothing has been received for two
/// heartbeat intervals.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    heartbeat: Duration,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(heartbeat: Duration, connect_timeout: Duration) -> Self {
        Self {
            heartbeat,
            connect_timeout,
        }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Endpoint) -> LinkResult<Channel> {
        let url = endpoint.url();
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| LinkError::Timeout)?
            .map_err(|err| LinkError::Connect(err.to_string()))?;

        let (channel, out_rx, in_tx) = Channel::pair(CHANNEL_CAPACITY);
        tokio::spawn(pump(stream, out_rx, in_tx, self.heartbeat));
        Ok(channel)
    }
}

async fn pump<S>(
    stream: S,
    mut out_rx: mpsc::Receiver<Outbound>,
    in_tx: mpsc::Sender<Inbound>,
    heartbeat: Duration,
) where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    let mut last_seen = Instant::now();

    let terminal = loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    if in_tx.send(Inbound::Text(text)).await.is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Some(Inbound::Closed),
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(err)) => break Some(Inbound::Failed(err.to_string())),
            },
            request = out_rx.recv() => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        break Some(Inbound::Failed(err.to_string()));
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break None;
                }
            },
            _ = ticker.tick() => {
                if last_seen.elapsed() >= heartbeat * 2 {
                    break Some(Inbound::Failed("heartbeat timeout".to_string()));
                }
                if let Err(err) = sink.send(Message::Ping(Vec::new())).await {
                    break Some(Inbound::Failed(err.to_string()));
                }
            }
        }
    };

    match &terminal {
        Some(Inbound::Failed(reason)) => {
            warn!("event=transport_pump module=link status=error reason={reason}")
        }
        _ => debug!("event=transport_pump module=link status=ok reason=closed"),
    }
    if let Some(event) = terminal {
        let _ = in_tx.send(event).await;
    }
}
