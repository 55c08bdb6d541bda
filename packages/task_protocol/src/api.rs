//! Request/response bodies for the thread-scoped HTTP endpoints.

use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, ThreadId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMessageRequest {
    pub content: String,
}

/// Returned by submit-message: the task streaming the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitMessageResponse {
    pub task_id: TaskId,
    pub thread_id: ThreadId,
}

/// Returned when a background operation is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub payload: serde_json::Value,
}

/// Background operations a user can trigger on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundOp {
    Compact,
    Summarize,
}

impl BackgroundOp {
    /// Path segment of the endpoint that starts this operation.
    pub fn path_segment(&self) -> &'static str {
        match self {
            BackgroundOp::Compact => "compact",
            BackgroundOp::Summarize => "summarize",
        }
    }
}

/// What kind of work a running task is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// An agent reply rendered as a visible message.
    #[default]
    Reply,
    Compact,
    Summarize,
}

impl TaskKind {
    pub fn is_background(&self) -> bool {
        !matches!(self, TaskKind::Reply)
    }
}

/// One entry of list-running-tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub task_id: TaskId,
    /// Response snapshot accumulated so far.
    #[serde(default)]
    pub current_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_progress: Option<String>,
    #[serde(default)]
    pub kind: TaskKind,
}
