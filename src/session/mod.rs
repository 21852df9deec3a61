//! Real-time event session.
//!
//! Owns one physical bus connection and at most one logical topic
//! subscription. All state lives inside a single actor task; the cloneable
//! [`RealtimeEventSession`] handle only enqueues commands, and only
//! [`RealtimeEventSession::connect`] awaits an outcome. Inbound frames are
//! parsed, self-origin events are suppressed, and everything surviving is
//! fanned out to registered consumers.

pub mod frame;
pub mod transport;

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::geo::cell::{self, SpatialCell};
use self::frame::{Frame, FrameKind};
use self::transport::{Transport, TransportEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Connection lifecycle. Transitions are strictly forward except on
/// error/close, which always returns to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open and handshake sent, acknowledgement pending.
    Connected,
    /// Handshake acknowledged; subscriptions are permitted.
    Ready,
}

/// A validated inbound bus event. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "postId")]
    pub post_id: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub origin_user_id: Option<String>,
}

/// What registered consumers observe.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Event(InboundEvent),
}

enum Command {
    Connect {
        identity: String,
        done: oneshot::Sender<CoreResult<()>>,
    },
    SetTargetCell(SpatialCell),
    Register(UnboundedSender<SessionEvent>),
    Disconnect,
}

/// Handle to the session actor. Cheap to clone; all clones talk to the same
/// connection.
#[derive(Clone)]
pub struct RealtimeEventSession {
    commands: UnboundedSender<Command>,
}

impl RealtimeEventSession {
    pub fn spawn(config: CoreConfig, transport: Arc<dyn Transport>) -> Self {
        let (commands, rx) = unbounded_channel();
        tokio::spawn(run_session(config, transport, rx));
        Self { commands }
    }

    /// Open the transport and perform the handshake.
    ///
    /// No-op unless the session is `Disconnected`. Resolves `Ok` once the bus
    /// acknowledges the handshake (`Ready`), `Err` if the transport fails
    /// first. There is no timeout here; a hung handshake resolves only when
    /// the transport itself errors.
    pub async fn connect(&self, identity: impl Into<String>) -> CoreResult<()> {
        let (done, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                identity: identity.into(),
                done,
            })
            .map_err(|_| CoreError::SessionClosed)?;
        outcome.await.map_err(|_| CoreError::SessionClosed)?
    }

    /// Set the subscription target cell.
    ///
    /// Remembered while not `Ready` and applied on entering `Ready`.
    /// Re-targeting the currently subscribed cell sends nothing.
    pub fn set_target_cell(&self, cell: SpatialCell) -> CoreResult<()> {
        self.commands
            .send(Command::SetTargetCell(cell))
            .map_err(|_| CoreError::SessionClosed)
    }

    /// Register a consumer of state changes and inbound events.
    pub fn events(&self) -> CoreResult<UnboundedReceiver<SessionEvent>> {
        let (tx, rx) = unbounded_channel();
        self.commands
            .send(Command::Register(tx))
            .map_err(|_| CoreError::SessionClosed)?;
        Ok(rx)
    }

    /// Tear the connection down. The session performs no automatic
    /// reconnect; policy for that belongs to the embedding shell.
    pub fn disconnect(&self) -> CoreResult<()> {
        self.commands
            .send(Command::Disconnect)
            .map_err(|_| CoreError::SessionClosed)
    }
}

struct ActiveSubscription {
    cell: SpatialCell,
    id: String,
}

struct SessionActor {
    config: CoreConfig,
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    identity: Option<String>,
    outbound: Option<UnboundedSender<String>>,
    subscription: Option<ActiveSubscription>,
    /// Desired cell; survives disconnects and is flushed on entering `Ready`.
    target: Option<SpatialCell>,
    consumers: Vec<UnboundedSender<SessionEvent>>,
    pending_connect: Option<oneshot::Sender<CoreResult<()>>>,
}

async fn run_session(
    config: CoreConfig,
    transport: Arc<dyn Transport>,
    mut commands: UnboundedReceiver<Command>,
) {
    let mut actor = SessionActor {
        config,
        transport,
        state: ConnectionState::Disconnected,
        identity: None,
        outbound: None,
        subscription: None,
        target: None,
        consumers: Vec::new(),
        pending_connect: None,
    };
    let mut inbound: Option<UnboundedReceiver<TransportEvent>> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Connect { identity, done }) => {
                        actor.handle_connect(identity, done, &mut inbound).await;
                    }
                    Some(Command::SetTargetCell(cell)) => {
                        actor.target = Some(cell);
                        if actor.state == ConnectionState::Ready {
                            actor.apply_target();
                        }
                    }
                    Some(Command::Register(consumer)) => {
                        actor.consumers.push(consumer);
                    }
                    Some(Command::Disconnect) => {
                        if actor.state != ConnectionState::Disconnected {
                            tracing::info!("session disconnect requested");
                            actor.reset_connection();
                            inbound = None;
                        }
                    }
                    None => break, // every handle dropped, actor retires
                }
            }
            event = recv_transport(&mut inbound), if inbound.is_some() => {
                match event {
                    Some(TransportEvent::Frame(raw)) => actor.handle_frame(&raw),
                    Some(TransportEvent::Closed(reason)) => {
                        tracing::warn!(reason = reason.as_deref().unwrap_or("none"), "transport closed");
                        actor.reset_connection();
                        inbound = None;
                    }
                    None => {
                        actor.reset_connection();
                        inbound = None;
                    }
                }
            }
        }
    }
}

async fn recv_transport(
    inbound: &mut Option<UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn handle_connect(
        &mut self,
        identity: String,
        done: oneshot::Sender<CoreResult<()>>,
        inbound: &mut Option<UnboundedReceiver<TransportEvent>>,
    ) {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = ?self.state, "connect ignored, session already active");
            let _ = done.send(Ok(()));
            return;
        }

        self.set_state(ConnectionState::Connecting);
        match self.transport.open().await {
            Ok(channels) => {
                self.outbound = Some(channels.outbound);
                *inbound = Some(channels.inbound);
                let handshake = Frame::connect(&identity);
                self.identity = Some(identity);
                if self.send_frame(&handshake) {
                    self.set_state(ConnectionState::Connected);
                    self.pending_connect = Some(done);
                } else {
                    self.reset_connection();
                    *inbound = None;
                    let _ = done.send(Err(CoreError::Transport(
                        "connection closed before handshake".to_string(),
                    )));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport open failed");
                self.reset_connection();
                let _ = done.send(Err(e));
            }
        }
    }

    fn handle_frame(&mut self, raw: &str) {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame.kind {
            FrameKind::Connected => {
                tracing::info!("handshake acknowledged");
                self.set_state(ConnectionState::Ready);
                if let Some(done) = self.pending_connect.take() {
                    let _ = done.send(Ok(()));
                }
                self.apply_target();
            }
            FrameKind::Message => self.handle_message(&frame),
            FrameKind::Error => {
                tracing::warn!(
                    message = frame.header("message").unwrap_or(""),
                    body = %frame.body,
                    "bus error frame"
                );
            }
            FrameKind::Receipt => {
                tracing::debug!(
                    receipt = frame.header("receipt-id").unwrap_or(""),
                    "receipt frame"
                );
            }
            other => {
                tracing::debug!(kind = ?other, "unrecognized frame ignored");
            }
        }
    }

    fn handle_message(&mut self, frame: &Frame) {
        let event: InboundEvent = match serde_json::from_str(&frame.body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable message body");
                return;
            }
        };

        if let (Some(me), Some(origin)) = (&self.identity, &event.origin_user_id) {
            if me == origin {
                tracing::debug!(post_id = %event.post_id, "self-origin event suppressed");
                return;
            }
        }

        self.broadcast(SessionEvent::Event(event));
    }

    /// Reconcile the active subscription with the desired target cell.
    /// Only meaningful in `Ready`.
    fn apply_target(&mut self) {
        if self.state != ConnectionState::Ready {
            return;
        }
        let Some(target) = self.target.clone() else {
            return;
        };
        if self
            .subscription
            .as_ref()
            .is_some_and(|active| active.cell == target)
        {
            return;
        }

        // Guards future externally supplied cells; locally encoded ones
        // always pass. Checked before touching the old subscription so an
        // invalid target sends no frame at all.
        if !cell::is_valid_cell(target.as_str()) {
            tracing::warn!(cell = %target, "refusing subscription to invalid cell");
            return;
        }

        if let Some(old) = self.subscription.take() {
            self.send_frame(&Frame::unsubscribe(&old.id));
        }

        // Session-unique subscription identifier.
        let id = format!("sub-{}", Uuid::new_v4().simple());
        let destination = format!("{}/{}", self.config.topic_prefix, target);
        if self.send_frame(&Frame::subscribe(&destination, &id)) {
            tracing::info!(destination = %destination, id = %id, "subscribed");
            self.subscription = Some(ActiveSubscription { cell: target, id });
        }
    }

    fn send_frame(&self, frame: &Frame) -> bool {
        match &self.outbound {
            Some(outbound) => outbound.send(frame.serialize()).is_ok(),
            None => false,
        }
    }

    /// Force `Disconnected`: drop the transport, clear the subscription and
    /// fail any pending connect. The desired target cell is kept so a later
    /// connect picks it up again.
    fn reset_connection(&mut self) {
        self.outbound = None;
        self.subscription = None;
        self.identity = None;
        if let Some(done) = self.pending_connect.take() {
            let _ = done.send(Err(CoreError::Transport("connection closed".to_string())));
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "connection state change");
            self.state = state;
            self.broadcast(SessionEvent::StateChanged(state));
        }
    }

    fn broadcast(&mut self, event: SessionEvent) {
        // Dead consumers are dropped on send failure.
        self.consumers
            .retain(|consumer| consumer.send(event.clone()).is_ok());
    }
}
