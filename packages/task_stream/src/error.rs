use std::time::Duration;

use task_protocol::{InteractionId, TaskId};
use tokio_tungstenite::tungstenite;

/// Errors surfaced by the streaming client to its callers.
///
/// Transport faults never show up here: they are absorbed by the channel and
/// its reconnect policy. Only terminal task outcomes and HTTP failures do.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("interaction {0} is already being processed")]
    AnswerInFlight(InteractionId),

    #[error("task {task_id} failed: {message}")]
    Task { task_id: TaskId, message: String },

    #[error("connection to task {0} lost, reload to recover")]
    ReconnectExhausted(TaskId),

    /// A channel frame that is not valid JSON. Logged, never shown.
    #[error("malformed frame: {0}")]
    Protocol(#[from] serde_json::Error),

    /// The thread was switched away; the task keeps running on the server.
    #[error("stopped following task {0}")]
    Detached(TaskId),

    #[error("session dispatcher is gone")]
    DispatcherGone,

    #[error("invalid configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }

    /// Whether the user should see this error (as opposed to it being logged).
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            StreamError::Task { .. } | StreamError::ReconnectExhausted(_)
        )
    }
}

/// Transport-level faults of a single task channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no pong within {0:?}")]
    LivenessTimeout(Duration),
}

impl ChannelError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unreachable(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
