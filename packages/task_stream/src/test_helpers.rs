//! Shared test doubles: a sink that records effects, a connector whose
//! connections are driven from the test, and an in-memory task API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use task_protocol::{
    BackgroundOp, ContextUsage, InteractionId, OperationResponse, RunningTask,
    SubmitMessageResponse, TaskId, ThreadId,
};
use tokio::sync::{Notify, mpsc};
use url::Url;

use crate::api::TaskApi;
use crate::channel::{ChannelEnvelope, ChannelFactory, Connection, Connector, Inbound};
use crate::config::{HeartbeatConfig, ReconnectConfig};
use crate::endpoints::Endpoints;
use crate::error::{ChannelError, StreamError};
use crate::gate::InputMode;
use crate::interaction::InteractionLedger;
use crate::session::SessionContext;
use crate::sink::{CardState, RenderSink};

// =============================================================================
// Recording sink
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RenderCall {
    Foreground(TaskId, String),
    Progress(TaskId, String),
    ContextFooter(TaskId, ContextUsage),
    InteractionCard {
        id: InteractionId,
        question: String,
        schema_present: bool,
        origin_name: Option<String>,
    },
    CardState(InteractionId, CardState),
    SystemMessage(serde_json::Value),
    ThreadTitle(ThreadId, String),
    TaskError(TaskId, String),
    ConnectionLost(TaskId),
    ComposeDisabled(bool),
    AnswerDisabled(bool),
    InputMode(InputMode),
}

/// Clones share one call log, so a copy handed to the dispatcher can be
/// inspected from the test.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<RenderCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<RenderCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn push(&self, call: RenderCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RenderSink for RecordingSink {
    fn append_foreground_message(&mut self, task_id: &TaskId, snapshot: &str) {
        self.push(RenderCall::Foreground(task_id.clone(), snapshot.to_string()));
    }

    fn update_progress(&mut self, task_id: &TaskId, text: &str) {
        self.push(RenderCall::Progress(task_id.clone(), text.to_string()));
    }

    fn update_context_footer(&mut self, task_id: &TaskId, usage: ContextUsage) {
        self.push(RenderCall::ContextFooter(task_id.clone(), usage));
    }

    fn render_interaction_card(
        &mut self,
        interaction_id: InteractionId,
        question: &str,
        schema_present: bool,
        origin_name: Option<&str>,
    ) {
        self.push(RenderCall::InteractionCard {
            id: interaction_id,
            question: question.to_string(),
            schema_present,
            origin_name: origin_name.map(str::to_string),
        });
    }

    fn update_interaction_card(&mut self, interaction_id: InteractionId, state: CardState) {
        self.push(RenderCall::CardState(interaction_id, state));
    }

    fn render_system_message(&mut self, message: &serde_json::Value) {
        self.push(RenderCall::SystemMessage(message.clone()));
    }

    fn update_thread_title(&mut self, thread_id: &ThreadId, subject: &str) {
        self.push(RenderCall::ThreadTitle(thread_id.clone(), subject.to_string()));
    }

    fn show_task_error(&mut self, task_id: &TaskId, message: &str) {
        self.push(RenderCall::TaskError(task_id.clone(), message.to_string()));
    }

    fn show_connection_lost(&mut self, task_id: &TaskId) {
        self.push(RenderCall::ConnectionLost(task_id.clone()));
    }

    fn set_compose_disabled(&mut self, disabled: bool) {
        self.push(RenderCall::ComposeDisabled(disabled));
    }

    fn set_answer_disabled(&mut self, disabled: bool) {
        self.push(RenderCall::AnswerDisabled(disabled));
    }

    fn set_input_mode(&mut self, mode: InputMode) {
        self.push(RenderCall::InputMode(mode));
    }
}

// =============================================================================
// In-memory connector
// =============================================================================

/// Server side of one in-memory connection.
pub struct ServerEnd {
    pub url: Url,
    to_client: fmpsc::UnboundedSender<Result<Inbound, ChannelError>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.unbounded_send(Ok(Inbound::Text(text.to_string())));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.unbounded_send(Ok(Inbound::Close {
            code,
            reason: reason.to_string(),
        }));
        self.to_client.close_channel();
    }

    /// Next frame written by the client; `None` once the client closed.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.from_client.next().await
    }
}

/// Connector whose connections are accepted by the test via
/// [`accept`](MemoryConnector::accept). Dropping a [`ServerEnd`] drops the
/// connection without a close frame.
pub struct MemoryConnector {
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
    refuse: AtomicUsize,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
            refuse: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Wait for the next successful connection.
    pub async fn accept(&self) -> ServerEnd {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::Unreachable("connection refused".into()));
        }

        let (to_server, from_client) = fmpsc::unbounded::<String>();
        let (to_client, from_server) = fmpsc::unbounded();
        let _ = self.accepted_tx.send(ServerEnd {
            url: url.clone(),
            to_client,
            from_client,
        });

        Ok(Connection {
            sink: Box::pin(to_server.sink_map_err(|e| ChannelError::Transport(e.to_string()))),
            stream: Box::pin(from_server),
        })
    }
}

// =============================================================================
// Session fixture
// =============================================================================

pub fn test_endpoints() -> Endpoints {
    Endpoints::new(Url::parse("http://chat.test").unwrap()).unwrap()
}

/// Everything a [`SessionContext`] borrows, owned in one place.
pub struct SessionHarness {
    pub sink: RecordingSink,
    pub ledger: InteractionLedger,
    pub reconnect: ReconnectConfig,
    pub factory: ChannelFactory,
    pub connector: Arc<MemoryConnector>,
    pub events: mpsc::Receiver<ChannelEnvelope>,
}

impl SessionHarness {
    pub fn new() -> Self {
        let connector = Arc::new(MemoryConnector::new());
        let (tx, events) = mpsc::channel(256);
        let factory = ChannelFactory::new(
            connector.clone(),
            test_endpoints(),
            HeartbeatConfig::default(),
            tx,
        );
        Self {
            sink: RecordingSink::new(),
            ledger: InteractionLedger::new(),
            reconnect: ReconnectConfig::default(),
            factory,
            connector,
            events,
        }
    }

    pub fn ctx(&mut self) -> SessionContext<'_> {
        SessionContext {
            sink: &mut self.sink,
            factory: &self.factory,
            reconnect: &self.reconnect,
            interactions: &mut self.ledger,
        }
    }
}

// =============================================================================
// Fake task API
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Submit(ThreadId, String),
    Operation(ThreadId, BackgroundOp),
    Answer(InteractionId, serde_json::Value),
    Cancel(InteractionId),
    ListRunning(ThreadId),
}

#[derive(Default)]
struct FakeState {
    running: HashMap<ThreadId, Vec<RunningTask>>,
    next_task: u64,
    fail_answers: bool,
    calls: Vec<ApiCall>,
    listing_gate: Option<Arc<Notify>>,
    answer_gate: Option<Arc<Notify>>,
}

/// [`TaskApi`] that hands out sequential task ids (`task-1`, `task-2`, ...)
/// and serves running tasks from a table.
#[derive(Default)]
pub struct FakeTaskApi {
    state: Mutex<FakeState>,
}

impl FakeTaskApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, thread_id: ThreadId, tasks: Vec<RunningTask>) {
        self.state.lock().unwrap().running.insert(thread_id, tasks);
    }

    pub fn fail_answers(&self, fail: bool) {
        self.state.lock().unwrap().fail_answers = fail;
    }

    /// Make list-running-tasks wait until the returned notify fires.
    pub fn hold_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().listing_gate = Some(gate.clone());
        gate
    }

    /// Make the next answer wait until the returned notify fires.
    pub fn hold_answer(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().answer_gate = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: ApiCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn next_task_id(&self) -> TaskId {
        let mut state = self.state.lock().unwrap();
        state.next_task += 1;
        TaskId::new(format!("task-{}", state.next_task))
    }
}

#[async_trait]
impl TaskApi for FakeTaskApi {
    async fn submit_message(
        &self,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<SubmitMessageResponse, StreamError> {
        self.record(ApiCall::Submit(thread_id.clone(), content.to_string()));
        Ok(SubmitMessageResponse {
            task_id: self.next_task_id(),
            thread_id: thread_id.clone(),
        })
    }

    async fn start_operation(
        &self,
        thread_id: &ThreadId,
        op: BackgroundOp,
    ) -> Result<OperationResponse, StreamError> {
        self.record(ApiCall::Operation(thread_id.clone(), op));
        Ok(OperationResponse {
            task_id: self.next_task_id(),
        })
    }

    async fn answer_interaction(
        &self,
        interaction_id: InteractionId,
        payload: serde_json::Value,
    ) -> Result<(), StreamError> {
        self.record(ApiCall::Answer(interaction_id, payload));
        let gate = self.state.lock().unwrap().answer_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.state.lock().unwrap().fail_answers {
            return Err(StreamError::Unavailable);
        }
        Ok(())
    }

    async fn cancel_interaction(&self, interaction_id: InteractionId) -> Result<(), StreamError> {
        self.record(ApiCall::Cancel(interaction_id));
        if self.state.lock().unwrap().fail_answers {
            return Err(StreamError::Unavailable);
        }
        Ok(())
    }

    async fn list_running_tasks(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<RunningTask>, StreamError> {
        self.record(ApiCall::ListRunning(thread_id.clone()));
        let gate = self.state.lock().unwrap().listing_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = self.state.lock().unwrap();
        Ok(state.running.get(thread_id).cloned().unwrap_or_default())
    }
}
