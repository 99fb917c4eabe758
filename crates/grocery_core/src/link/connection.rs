//! Connection Manager: lifecycle state machine for the live robot link.
//!
//! # Responsibility
//! - Drive `Disconnected -> Connecting -> Connected -> {Disconnected, Errored}`.
//! - Decode inbound frames and publish each event kind on its own `watch`
//!   channel, replacing the previous value.
//! - Send commands only while `Connected`; nothing is queued for later.
//!
//! # Invariants
//! - `connect` while `Connected` opens nothing and changes nothing.
//! - Lifecycle calls (`connect`, `disconnect`, `reconnect`) are serialized.
//! - Events from a superseded transport are ignored (generation check).
//! - A reader only ends the session of its own generation; the check and the
//!   state change happen under the wire lock.

use crate::config::RobotSettings;
use crate::link::codec::{decode_message, encode_command, Command, InboundEvent, PendingCommand};
use crate::link::transport::{Channel, Connector, Inbound, Outbound, WebSocketConnector};
use crate::link::Endpoint;
use crate::model::now_epoch_ms;
use crate::model::telemetry::{CameraMode, ConnectionState, TelemetrySnapshot, VideoFrame};
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// What happens after the transport fails underneath a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay `Errored` until the caller invokes `connect` or `reconnect`.
    #[default]
    Manual,
    /// Retry with exponential backoff while the state remains `Errored`.
    Backoff {
        initial: Duration,
        max: Duration,
        max_attempts: u32,
    },
}

/// Anything that can carry a robot command.
pub trait CommandSink: Send + Sync {
    /// Returns `false` when the command was dropped.
    fn dispatch(&self, command: PendingCommand) -> bool;
}

/// Outbound half of the current transport, tagged with its generation.
#[derive(Default)]
struct Wire {
    generation: u64,
    outbound: Option<mpsc::Sender<Outbound>>,
}

#[derive(Default)]
struct Session {
    endpoint: Option<Endpoint>,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    telemetry: watch::Sender<TelemetrySnapshot>,
    video: watch::Sender<Option<VideoFrame>>,
    wire: RwLock<Wire>,
    session: Mutex<Session>,
}

/// Cloneable handle to one logical robot connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (telemetry, _) = watch::channel(TelemetrySnapshot::default());
        let (video, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                connector,
                policy,
                state,
                telemetry,
                video,
                wire: RwLock::new(Wire::default()),
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Manager backed by the WebSocket transport configured in `settings`.
    pub fn websocket(settings: &RobotSettings) -> Self {
        let connector = WebSocketConnector::new(settings.heartbeat(), settings.connect_timeout());
        Self::new(Arc::new(connector), settings.reconnect_policy())
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.telemetry.borrow().clone()
    }

    pub fn video_frame(&self) -> Option<VideoFrame> {
        self.shared.video.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.shared.telemetry.subscribe()
    }

    pub fn subscribe_video(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.shared.video.subscribe()
    }

    pub async fn current_endpoint(&self) -> Option<Endpoint> {
        self.shared.session.lock().await.endpoint.clone()
    }

    /// Opens the link unless it is already `Connected`.
    ///
    /// On success the state becomes `Connected` and the video/telemetry
    /// stream is requested; on failure the state becomes `Errored`.
    pub async fn connect(&self, endpoint: Endpoint) {
        let mut session = self.shared.session.lock().await;
        if self.state() == ConnectionState::Connected {
            debug!("event=link_connect module=link status=skip reason=already_connected");
            return;
        }
        self.open_locked(&mut session, endpoint).await;
    }

    /// Closes the link. Idempotent.
    pub async fn disconnect(&self) {
        let mut session = self.shared.session.lock().await;
        self.close_locked(&mut session);
    }

    /// Disconnect then connect, as one serialized step.
    pub async fn reconnect(&self, endpoint: Endpoint) {
        let mut session = self.shared.session.lock().await;
        self.close_locked(&mut session);
        self.open_locked(&mut session, endpoint).await;
    }

    /// Encodes and transmits a command; dropped unless `Connected`.
    pub fn send(&self, command: &str, extras: Map<String, Value>) -> bool {
        self.dispatch(PendingCommand::new(command, extras, now_epoch_ms()))
    }

    pub fn send_command(&self, command: Command) -> bool {
        self.dispatch(command.pending())
    }

    pub fn calibrate(&self) -> bool {
        self.send_command(Command::Calibrate)
    }

    pub fn start_tracking(&self) -> bool {
        self.send_command(Command::StartTracking)
    }

    pub fn stop_tracking(&self) -> bool {
        self.send_command(Command::StopTracking)
    }

    pub fn emergency_stop(&self) -> bool {
        self.send_command(Command::EmergencyStop)
    }

    pub fn request_status(&self) -> bool {
        self.send_command(Command::GetStatus)
    }

    pub fn set_mode(&self, mode: CameraMode) -> bool {
        self.send_command(Command::SetMode(mode))
    }

    async fn open_locked(&self, session: &mut Session, endpoint: Endpoint) {
        let generation = {
            let mut wire = self.wire_mut();
            wire.generation += 1;
            wire.outbound = None;
            self.set_state(ConnectionState::Connecting);
            wire.generation
        };
        session.endpoint = Some(endpoint.clone());
        info!("event=link_connect module=link status=start endpoint={endpoint}");

        match self.shared.connector.open(&endpoint).await {
            Ok(Channel { outbound, inbound }) => {
                {
                    let mut wire = self.wire_mut();
                    wire.outbound = Some(outbound);
                    self.set_state(ConnectionState::Connected);
                }
                info!("event=link_connect module=link status=ok endpoint={endpoint}");
                // Spawned only once `Connected` is published, so an immediate
                // close or failure from the peer is the last transition.
                // A superseded reader exits on its own; only disconnect aborts.
                session.reader = Some(tokio::spawn(read_loop(
                    self.clone(),
                    inbound,
                    endpoint.clone(),
                    generation,
                )));
                self.send_command(Command::StartVideoStream);
            }
            Err(err) => {
                warn!(
                    "event=link_connect module=link status=error endpoint={endpoint} error={err}"
                );
                self.end_session(generation, ConnectionState::Errored);
            }
        }
    }

    fn close_locked(&self, session: &mut Session) {
        let (outbound, was) = {
            let mut wire = self.wire_mut();
            wire.generation += 1;
            let was = self.state();
            self.set_state(ConnectionState::Disconnected);
            (wire.outbound.take(), was)
        };
        if let Some(outbound) = outbound {
            // Dropping the sender also closes the pump if the queue is full.
            let _ = outbound.try_send(Outbound::Close);
        }
        if let Some(reader) = session.reader.take() {
            reader.abort();
        }
        if was != ConnectionState::Disconnected {
            info!("event=link_disconnect module=link status=ok");
        }
    }

    fn wire(&self) -> std::sync::RwLockReadGuard<'_, Wire> {
        self.shared
            .wire
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wire_mut(&self) -> std::sync::RwLockWriteGuard<'_, Wire> {
        self.shared
            .wire
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.wire().generation == generation
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.state.send_replace(state);
    }

    fn publish(&self, text: &str) {
        match decode_message(text) {
            Some(InboundEvent::Status(snapshot)) => {
                self.shared.telemetry.send_replace(snapshot);
            }
            Some(InboundEvent::VideoFrame(frame)) => {
                self.shared.video.send_replace(Some(frame));
            }
            None => {}
        }
    }

    /// Ends the session of `generation`, unless a lifecycle call has already
    /// moved on. Returns whether the transition was applied.
    fn end_session(&self, generation: u64, state: ConnectionState) -> bool {
        let mut wire = self.wire_mut();
        if wire.generation != generation {
            debug!("event=link_closed module=link status=skip reason=superseded");
            return false;
        }
        wire.outbound = None;
        self.set_state(state);
        true
    }

    async fn retry_after_failure(&self, endpoint: Endpoint) {
        let ReconnectPolicy::Backoff {
            initial,
            max,
            max_attempts,
        } = self.shared.policy
        else {
            return;
        };

        let mut delay = initial;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(delay).await;
            if self.state() != ConnectionState::Errored {
                return;
            }
            info!(
                "event=link_retry module=link status=start attempt={attempt} max_attempts={max_attempts}"
            );
            self.connect(endpoint.clone()).await;
            if self.state() == ConnectionState::Connected {
                return;
            }
            delay = (delay * 2).min(max);
        }
        warn!("event=link_retry module=link status=error reason=attempts_exhausted");
    }
}

impl CommandSink for ConnectionManager {
    fn dispatch(&self, command: PendingCommand) -> bool {
        if self.state() != ConnectionState::Connected {
            debug!(
                "event=command_send module=link status=skip command={} reason=not_connected",
                command.name
            );
            return false;
        }
        let Some(outbound) = self.wire().outbound.clone() else {
            return false;
        };
        match outbound.try_send(Outbound::Text(encode_command(&command))) {
            Ok(()) => {
                debug!("event=command_send module=link status=ok command={}", command.name);
                true
            }
            Err(err) => {
                warn!(
                    "event=command_send module=link status=error command={} error={err}",
                    command.name
                );
                false
            }
        }
    }
}

// Boxed so the reconnect path (reader -> connect -> spawn reader) has a
// nameable future type.
fn read_loop(
    manager: ConnectionManager,
    mut inbound: mpsc::Receiver<Inbound>,
    endpoint: Endpoint,
    generation: u64,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        while let Some(event) = inbound.recv().await {
            if !manager.is_current(generation) {
                return;
            }
            match event {
                Inbound::Text(text) => manager.publish(&text),
                Inbound::Closed => {
                    info!("event=link_closed module=link status=ok endpoint={endpoint}");
                    manager.end_session(generation, ConnectionState::Disconnected);
                    return;
                }
                Inbound::Failed(reason) => {
                    warn!(
                        "event=link_closed module=link status=error endpoint={endpoint} reason={reason}"
                    );
                    if manager.end_session(generation, ConnectionState::Errored) {
                        manager.retry_after_failure(endpoint).await;
                    }
                    return;
                }
            }
        }
        manager.end_session(generation, ConnectionState::Disconnected);
    })
}
