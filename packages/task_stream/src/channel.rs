//! Task Channel
//!
//! One persistent connection per task. Every connection attempt runs in its
//! own tokio task with a fresh transport, and reports through the same fixed
//! set of [`ChannelEvent`]s, tagged with the task id and a per-attempt
//! [`ChannelId`]. Owners never see the raw transport.
//!
//! The attempt's I/O loop owns the [`Heartbeat`]: it starts when the
//! connection opens and is stopped before any close is reported.

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use task_protocol::{ClientMessage, TaskId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HeartbeatConfig;
use crate::endpoints::Endpoints;
use crate::error::ChannelError;
use crate::heartbeat::{Beat, Heartbeat};

/// Close code for a normal, server-acknowledged close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the connection died without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Inbound, ChannelError>> + Send>>;

/// A frame received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// An established transport connection, split into halves.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens transport connections. The production implementation is
/// [`WsConnector`](crate::transport::WsConnector).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Connection, ChannelError>;
}

/// Unique identifier of one connection attempt
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chan-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closed,
}

/// Events emitted by a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    /// Raw text payload, not yet decoded.
    Message(String),
    ClosedClean,
    ClosedAbnormal { code: u16, reason: String },
    /// Informational; always followed by `ClosedAbnormal`.
    TransportError(ChannelError),
}

/// A channel event tagged with its origin.
#[derive(Debug, Clone)]
pub struct ChannelEnvelope {
    pub task_id: TaskId,
    pub channel_id: ChannelId,
    pub event: ChannelEvent,
}

enum ChannelCommand {
    Send(String),
    Close(String),
}

/// Handle to one connection attempt for a task.
///
/// Dropping the handle closes the connection.
pub struct TaskChannel {
    id: ChannelId,
    task_id: TaskId,
    commands: mpsc::UnboundedSender<ChannelCommand>,
    state: watch::Receiver<SocketState>,
}

impl TaskChannel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    /// Queue a frame. Frames queued before the connection opens are dropped.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "failed to serialize frame");
                return false;
            }
        };
        self.commands.send(ChannelCommand::Send(json)).is_ok()
    }

    /// Close the connection. The heartbeat stops before anything else the
    /// loop does.
    pub fn close(&self, reason: &str) {
        let _ = self.commands.send(ChannelCommand::Close(reason.to_string()));
    }
}

/// Everything needed to open channels; shared by all sessions.
#[derive(Clone)]
pub struct ChannelFactory {
    connector: Arc<dyn Connector>,
    endpoints: Endpoints,
    heartbeat: HeartbeatConfig,
    events: mpsc::Sender<ChannelEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl ChannelFactory {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoints: Endpoints,
        heartbeat: HeartbeatConfig,
        events: mpsc::Sender<ChannelEnvelope>,
    ) -> Self {
        Self {
            connector,
            endpoints,
            heartbeat,
            events,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a new channel for `task_id`, connecting after `delay`.
    pub fn open(&self, task_id: &TaskId, delay: Duration) -> TaskChannel {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SocketState::Connecting);

        let attempt = Attempt {
            id,
            task_id: task_id.clone(),
            url: self.endpoints.channel_url(task_id),
            delay,
            connector: self.connector.clone(),
            heartbeat: Heartbeat::new(self.heartbeat),
            events: self.events.clone(),
            state: state_tx,
        };
        tokio::spawn(attempt.run(cmd_rx));

        TaskChannel {
            id,
            task_id: task_id.clone(),
            commands: cmd_tx,
            state: state_rx,
        }
    }
}

/// Minimal view of a frame, enough to spot liveness traffic.
#[derive(Deserialize)]
struct FrameKind {
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn frame_kind(text: &str) -> Option<String> {
    serde_json::from_str::<FrameKind>(text).ok()?.kind
}

struct Attempt {
    id: ChannelId,
    task_id: TaskId,
    url: Url,
    delay: Duration,
    connector: Arc<dyn Connector>,
    heartbeat: Heartbeat,
    events: mpsc::Sender<ChannelEnvelope>,
    state: watch::Sender<SocketState>,
}

impl Attempt {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ChannelCommand>) {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = wait_for_close(&mut commands) => {
                    debug!(task_id = %self.task_id, channel = %self.id, "closed before connecting");
                    let _ = self.state.send(SocketState::Closed);
                    return;
                }
            }
        }

        let connected = tokio::select! {
            res = self.connector.connect(&self.url) => res,
            _ = wait_for_close(&mut commands) => {
                debug!(task_id = %self.task_id, channel = %self.id, "closed while connecting");
                let _ = self.state.send(SocketState::Closed);
                return;
            }
        };

        let Connection {
            mut sink,
            mut stream,
        } = match connected {
            Ok(conn) => conn,
            Err(e) => {
                warn!(task_id = %self.task_id, url = %self.url, error = %e, "channel connect failed");
                self.fail(e).await;
                return;
            }
        };

        info!(task_id = %self.task_id, channel = %self.id, "channel open");
        let _ = self.state.send(SocketState::Open);
        self.heartbeat.start();
        if !self.emit(ChannelEvent::Opened).await {
            self.heartbeat.stop();
            let _ = sink.close().await;
            let _ = self.state.send(SocketState::Closed);
            return;
        }

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(ChannelCommand::Send(text)) => {
                        if let Err(e) = sink.send(text).await {
                            self.heartbeat.stop();
                            self.fail(e).await;
                            break;
                        }
                    }
                    Some(ChannelCommand::Close(reason)) => {
                        self.heartbeat.stop();
                        debug!(task_id = %self.task_id, channel = %self.id, %reason, "closing channel");
                        let _ = sink.close().await;
                        self.emit(ChannelEvent::ClosedClean).await;
                        break;
                    }
                    None => {
                        self.heartbeat.stop();
                        let _ = sink.close().await;
                        break;
                    }
                },

                frame = stream.next() => match frame {
                    Some(Ok(Inbound::Text(text))) => {
                        match frame_kind(&text).as_deref() {
                            Some("pong") => self.heartbeat.on_pong(),
                            Some("ping") => {
                                if let Err(e) = send_frame(&mut sink, &ClientMessage::Pong).await {
                                    self.heartbeat.stop();
                                    self.fail(e).await;
                                    break;
                                }
                            }
                            _ => {
                                if !self.emit(ChannelEvent::Message(text)).await {
                                    self.heartbeat.stop();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Inbound::Close { code, reason })) => {
                        self.heartbeat.stop();
                        if code == CLOSE_NORMAL {
                            info!(task_id = %self.task_id, channel = %self.id, "channel closed by server");
                            self.emit(ChannelEvent::ClosedClean).await;
                        } else {
                            warn!(task_id = %self.task_id, channel = %self.id, code, %reason, "channel closed abnormally");
                            self.emit(ChannelEvent::ClosedAbnormal { code, reason }).await;
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        self.heartbeat.stop();
                        self.fail(e).await;
                        break;
                    }
                    None => {
                        self.heartbeat.stop();
                        warn!(task_id = %self.task_id, channel = %self.id, "connection dropped");
                        self.emit(ChannelEvent::ClosedAbnormal {
                            code: CLOSE_ABNORMAL,
                            reason: "connection dropped".to_string(),
                        })
                        .await;
                        break;
                    }
                },

                beat = self.heartbeat.tick() => match beat {
                    Beat::SendPing => {
                        if let Err(e) = send_frame(&mut sink, &ClientMessage::Ping).await {
                            self.heartbeat.stop();
                            self.fail(e).await;
                            break;
                        }
                    }
                    Beat::TimedOut => {
                        warn!(task_id = %self.task_id, channel = %self.id, "heartbeat timeout");
                        let _ = sink.close().await;
                        let timeout = self.heartbeat.timeout();
                        if !self
                            .emit(ChannelEvent::TransportError(ChannelError::LivenessTimeout(timeout)))
                            .await
                        {
                            break;
                        }
                        self.emit(ChannelEvent::ClosedAbnormal {
                            code: CLOSE_ABNORMAL,
                            reason: "heartbeat timeout".to_string(),
                        })
                        .await;
                        break;
                    }
                },
            }
        }

        let _ = self.state.send(SocketState::Closed);
    }

    /// Report a transport fault followed by the abnormal close it implies.
    async fn fail(&mut self, err: ChannelError) {
        let reason = err.to_string();
        let _ = self.state.send(SocketState::Closed);
        if self.emit(ChannelEvent::TransportError(err)).await {
            self.emit(ChannelEvent::ClosedAbnormal {
                code: CLOSE_ABNORMAL,
                reason,
            })
            .await;
        }
    }

    /// Returns false once nobody is listening.
    async fn emit(&self, event: ChannelEvent) -> bool {
        self.events
            .send(ChannelEnvelope {
                task_id: self.task_id.clone(),
                channel_id: self.id,
                event,
            })
            .await
            .is_ok()
    }
}

/// Resolves when a close is requested or the handle is dropped. Frames queued
/// before the connection opens are discarded.
async fn send_frame(sink: &mut FrameSink, message: &ClientMessage) -> Result<(), ChannelError> {
    let json = message
        .to_json()
        .map_err(|e| ChannelError::Transport(e.to_string()))?;
    sink.send(json).await
}

async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<ChannelCommand>) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            ChannelCommand::Close(_) => return,
            ChannelCommand::Send(_) => debug!("dropping frame queued before open"),
        }
    }
}
