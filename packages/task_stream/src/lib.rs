//! Task Stream - client-side streaming sessions for background chat tasks
//!
//! Every background task (an agent reply, a compact or summarize operation)
//! gets its own persistent channel. A [`Dispatcher`] owns all live sessions,
//! applies server frames to each session's state machine, reconnects dropped
//! channels with bounded backoff, and derives the shared
//! [`InteractionGate`] that decides whether the user may type or send.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use task_stream::{Dispatcher, HttpTaskApi, StreamConfig, WsConnector};
//! use task_protocol::ThreadId;
//!
//! # struct NullSink;
//! # impl task_stream::RenderSink for NullSink {
//! #     fn append_foreground_message(&mut self, _: &task_protocol::TaskId, _: &str) {}
//! #     fn update_progress(&mut self, _: &task_protocol::TaskId, _: &str) {}
//! #     fn update_context_footer(&mut self, _: &task_protocol::TaskId, _: task_protocol::ContextUsage) {}
//! #     fn render_interaction_card(&mut self, _: task_protocol::InteractionId, _: &str, _: bool, _: Option<&str>) {}
//! #     fn update_interaction_card(&mut self, _: task_protocol::InteractionId, _: task_stream::CardState) {}
//! #     fn render_system_message(&mut self, _: &serde_json::Value) {}
//! #     fn update_thread_title(&mut self, _: &ThreadId, _: &str) {}
//! #     fn show_task_error(&mut self, _: &task_protocol::TaskId, _: &str) {}
//! #     fn show_connection_lost(&mut self, _: &task_protocol::TaskId) {}
//! #     fn set_compose_disabled(&mut self, _: bool) {}
//! #     fn set_answer_disabled(&mut self, _: bool) {}
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), task_stream::StreamError> {
//!     let config = StreamConfig::load(std::path::Path::new("/tmp/taskstream"), None)?;
//!     let api = Arc::new(HttpTaskApi::new(config.endpoints.clone()));
//!     let handle = Dispatcher::spawn(&config, Arc::new(WsConnector), api, Box::new(NullSink));
//!
//!     let thread = ThreadId::new("th-1");
//!     handle.activate_thread(&thread, false).await?;
//!     let reply = handle.submit_message(&thread, "hello").await?;
//!     reply.finished().await?;
//!     handle.shutdown().await
//! }
//! ```

pub mod api;
pub mod channel;
pub mod chunk;
pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod gate;
pub mod heartbeat;
pub mod interaction;
pub mod registry;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use api::{HttpTaskApi, TaskApi};
pub use channel::{ChannelEvent, ChannelFactory, ChannelId, Connector, SocketState, TaskChannel};
pub use chunk::ChunkAccumulator;
pub use config::{HeartbeatConfig, ReconnectConfig, StreamConfig};
pub use discovery::{Discovered, RunningTaskDiscovery};
pub use dispatch::{DispatchSnapshot, Dispatcher, DispatcherHandle, TaskWatch};
pub use endpoints::Endpoints;
pub use error::{ChannelError, StreamError};
pub use gate::{InputMode, InteractionGate};
pub use heartbeat::Heartbeat;
pub use interaction::InteractionLedger;
pub use registry::SessionRegistry;
pub use session::{SessionSeed, SessionSnapshot, SessionStatus, StreamSession};
pub use sink::{CardState, RenderSink};
pub use transport::WsConnector;
