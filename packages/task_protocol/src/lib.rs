//! Task Protocol
//!
//! Message types shared between the task streaming client and the server:
//! the JSON frames carried over a per-task channel, and the request/response
//! bodies of the thread-scoped HTTP endpoints.
//!
//! Every channel frame is a JSON object with a `type` discriminator:
//!
//! ```
//! use task_protocol::ServerMessage;
//!
//! let msg = ServerMessage::parse(r#"{"type":"response_chunk","chunk":"Hi"}"#).unwrap();
//! assert_eq!(msg, ServerMessage::ResponseChunk { chunk: "Hi".into() });
//! ```

mod api;
mod ids;
mod messages;

pub use api::{
    AnswerRequest, BackgroundOp, OperationResponse, RunningTask, SubmitMessageRequest,
    SubmitMessageResponse, TaskKind,
};
pub use ids::{InteractionId, TaskId, ThreadId};
pub use messages::{ClientMessage, ContextUsage, InteractionStatus, ServerMessage, TokenCount};
