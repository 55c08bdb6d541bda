//! Channel frame types.
//!
//! Frames sent FROM the server describe a task's progress; frames sent FROM
//! the client are limited to liveness probes.

use serde::{Deserialize, Serialize};

use crate::ids::{InteractionId, ThreadId};

/// Messages sent FROM the server TO the client over a task channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ping,
    Pong,

    /// Human-readable progress line (tool calls, phases). Not part of the
    /// response content.
    ProgressUpdate {
        #[serde(default)]
        progress_log: String,
    },

    /// Full snapshot of the current response unit. Replaces, never appends.
    ResponseChunk {
        #[serde(default)]
        chunk: String,
    },

    /// Token usage for the thread's context window footer.
    ContextConsumption {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        real_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approx_tokens: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_context: Option<u64>,
    },

    /// Out-of-band message emitted mid-task (system notices).
    NewMessage {
        message: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
    },

    TaskComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_id: Option<ThreadId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread_subject: Option<String>,
    },

    TaskError {
        #[serde(default)]
        message: String,
    },

    /// The task is paused until the user answers or cancels.
    UserPrompt {
        interaction_id: InteractionId,
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_name: Option<String>,
    },

    /// Asynchronous acknowledgement of an answer/cancel issued over HTTP.
    InteractionUpdate {
        interaction_id: InteractionId,
        status: InteractionStatus,
    },

    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Ping => "ping",
            ServerMessage::Pong => "pong",
            ServerMessage::ProgressUpdate { .. } => "progress_update",
            ServerMessage::ResponseChunk { .. } => "response_chunk",
            ServerMessage::ContextConsumption { .. } => "context_consumption",
            ServerMessage::NewMessage { .. } => "new_message",
            ServerMessage::TaskComplete { .. } => "task_complete",
            ServerMessage::TaskError { .. } => "task_error",
            ServerMessage::UserPrompt { .. } => "user_prompt",
            ServerMessage::InteractionUpdate { .. } => "interaction_update",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// Messages sent FROM the client TO the server over a task channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Pong,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionStatus {
    Answered,
    Resuming,
    Canceled,
}

/// Token count reported by the server; exact when the model reported usage,
/// estimated otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCount {
    Real(u64),
    Approx(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub tokens: TokenCount,
    pub max_context: Option<u64>,
}

impl ContextUsage {
    /// Build from the raw `context_consumption` fields. Real counts win over
    /// approximations; `None` when neither is present.
    pub fn from_fields(
        real_tokens: Option<u64>,
        approx_tokens: Option<u64>,
        max_context: Option<u64>,
    ) -> Option<Self> {
        let tokens = match (real_tokens, approx_tokens) {
            (Some(real), _) => TokenCount::Real(real),
            (None, Some(approx)) => TokenCount::Approx(approx),
            (None, None) => return None,
        };
        Some(Self {
            tokens,
            max_context,
        })
    }
}
