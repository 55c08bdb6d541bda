//! Stream Session
//!
//! Per-task state machine. A session owns the current [`TaskChannel`] for its
//! task and applies that channel's events in arrival order:
//!
//! ```text
//! PENDING -> STREAMING <-> AWAITING_INTERACTION -> COMPLETED | ERRORED | STALE
//! ```
//!
//! Sessions never touch the interaction gate directly. The dispatcher derives
//! the gate from the live session set after every event.

use std::time::Duration;

use task_protocol::{
    ContextUsage, InteractionId, InteractionStatus, RunningTask, ServerMessage, TaskId, ThreadId,
};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelFactory, ChannelId, SocketState, TaskChannel};
use crate::chunk::ChunkAccumulator;
use crate::config::ReconnectConfig;
use crate::error::StreamError;
use crate::interaction::InteractionLedger;
use crate::sink::{CardState, RenderSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Pending,
    Streaming,
    AwaitingInteraction,
    Completed,
    Errored,
    Stale,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Errored | SessionStatus::Stale
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Streaming => "streaming",
            SessionStatus::AwaitingInteraction => "awaiting_interaction",
            SessionStatus::Completed => "completed",
            SessionStatus::Errored => "errored",
            SessionStatus::Stale => "stale",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial state for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSeed {
    pub task_id: TaskId,
    pub thread_id: ThreadId,
    pub status: SessionStatus,
    pub accumulated_text: String,
    pub last_progress: Option<String>,
    pub is_background: bool,
}

impl SessionSeed {
    /// A task the user just started: nothing rendered yet.
    pub fn pending(task_id: TaskId, thread_id: ThreadId, is_background: bool) -> Self {
        Self {
            task_id,
            thread_id,
            status: SessionStatus::Pending,
            accumulated_text: String::new(),
            last_progress: None,
            is_background,
        }
    }

    /// A task found running on the server (reload resume).
    pub fn resumed(task: RunningTask, thread_id: ThreadId) -> Self {
        Self {
            is_background: task.kind.is_background(),
            task_id: task.task_id,
            thread_id,
            status: SessionStatus::Streaming,
            accumulated_text: task.current_response,
            last_progress: task.last_progress,
        }
    }
}

/// Point-in-time copy of a session, for callers outside the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub task_id: TaskId,
    pub thread_id: ThreadId,
    pub status: SessionStatus,
    pub accumulated_text: String,
    pub last_progress: Option<String>,
    pub pending_interaction: Option<InteractionId>,
    pub is_background: bool,
    pub reconnect_attempts: u32,
    pub socket: SocketState,
}

/// What a session handler may touch besides the session itself.
pub struct SessionContext<'a> {
    pub sink: &'a mut dyn RenderSink,
    pub factory: &'a ChannelFactory,
    pub reconnect: &'a ReconnectConfig,
    pub interactions: &'a mut InteractionLedger,
}

pub struct StreamSession {
    task_id: TaskId,
    thread_id: ThreadId,
    status: SessionStatus,
    chunks: ChunkAccumulator,
    last_progress: Option<String>,
    pending_interaction: Option<InteractionId>,
    is_background: bool,
    /// Abnormal closures since the last successful open.
    reconnect_attempts: u32,
    error: Option<String>,
    channel: TaskChannel,
}

impl StreamSession {
    /// Open the channel and render whatever the seed already carries.
    pub fn start(seed: SessionSeed, ctx: &mut SessionContext<'_>) -> Self {
        let SessionSeed {
            task_id,
            thread_id,
            status,
            accumulated_text,
            last_progress,
            is_background,
        } = seed;

        let channel = ctx.factory.open(&task_id, Duration::ZERO);
        info!(
            task_id = %task_id,
            thread_id = %thread_id,
            %status,
            background = is_background,
            channel = %channel.id(),
            "session started"
        );

        if !is_background && !accumulated_text.is_empty() {
            ctx.sink.append_foreground_message(&task_id, &accumulated_text);
        }
        if let Some(progress) = &last_progress {
            ctx.sink.update_progress(&task_id, progress);
        }

        Self {
            task_id,
            thread_id,
            status,
            chunks: ChunkAccumulator::seeded(accumulated_text),
            last_progress,
            pending_interaction: None,
            is_background,
            reconnect_attempts: 0,
            error: None,
            channel,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_background(&self) -> bool {
        self.is_background
    }

    pub fn accumulated_text(&self) -> &str {
        self.chunks.text()
    }

    pub fn last_chunk(&self) -> Option<&str> {
        self.chunks.last_chunk()
    }

    pub fn pending_interaction(&self) -> Option<InteractionId> {
        self.pending_interaction
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            task_id: self.task_id.clone(),
            thread_id: self.thread_id.clone(),
            status: self.status,
            accumulated_text: self.chunks.text().to_string(),
            last_progress: self.last_progress.clone(),
            pending_interaction: self.pending_interaction,
            is_background: self.is_background,
            reconnect_attempts: self.reconnect_attempts,
            socket: self.channel.state(),
        }
    }

    /// How the task ended, once it has.
    pub fn outcome(&self) -> Option<Result<(), StreamError>> {
        match self.status {
            SessionStatus::Completed => Some(Ok(())),
            SessionStatus::Errored => Some(Err(StreamError::Task {
                task_id: self.task_id.clone(),
                message: self.error.clone().unwrap_or_default(),
            })),
            SessionStatus::Stale => Some(Err(StreamError::ReconnectExhausted(self.task_id.clone()))),
            _ => None,
        }
    }

    /// Close the channel without changing status (teardown from outside).
    pub fn close(&mut self, reason: &str, interactions: &mut InteractionLedger) {
        if let Some(id) = self.pending_interaction {
            interactions.release(id);
        }
        self.channel.close(reason);
    }

    /// Apply one event from one of this task's channels.
    pub fn on_channel_event(
        &mut self,
        channel_id: ChannelId,
        event: ChannelEvent,
        ctx: &mut SessionContext<'_>,
    ) {
        if channel_id != self.channel.id() {
            debug!(task_id = %self.task_id, channel = %channel_id, "event from replaced channel ignored");
            return;
        }
        if self.status.is_terminal() {
            debug!(task_id = %self.task_id, status = %self.status, "event after terminal state ignored");
            return;
        }

        match event {
            ChannelEvent::Opened => {
                self.reconnect_attempts = 0;
                if self.status == SessionStatus::Pending {
                    self.transition(SessionStatus::Streaming);
                }
            }
            ChannelEvent::Message(text) => match ServerMessage::parse(&text) {
                Ok(msg) => self.apply(msg, ctx),
                Err(e) => {
                    let err = StreamError::from(e);
                    debug!(task_id = %self.task_id, error = %err, "dropping frame");
                }
            },
            ChannelEvent::ClosedClean => {
                // The server only closes cleanly once the task is done, even
                // if task_complete never reached us.
                info!(task_id = %self.task_id, "channel closed cleanly");
                self.finish(SessionStatus::Completed, "closed by server", ctx);
            }
            ChannelEvent::ClosedAbnormal { code, reason } => {
                self.on_abnormal_close(code, &reason, ctx);
            }
            ChannelEvent::TransportError(e) => {
                warn!(task_id = %self.task_id, error = %e, "transport error");
            }
        }
    }

    /// Apply one decoded server message.
    pub fn apply(&mut self, msg: ServerMessage, ctx: &mut SessionContext<'_>) {
        if self.status.is_terminal() {
            debug!(task_id = %self.task_id, kind = msg.kind(), "message after terminal state ignored");
            return;
        }

        match msg {
            ServerMessage::Ping | ServerMessage::Pong => {}

            ServerMessage::ProgressUpdate { progress_log } => {
                ctx.sink.update_progress(&self.task_id, &progress_log);
                self.last_progress = Some(progress_log);
            }

            ServerMessage::ResponseChunk { chunk } => {
                if self.is_background {
                    debug!(task_id = %self.task_id, "response_chunk on background task ignored");
                    return;
                }
                if self.status == SessionStatus::AwaitingInteraction {
                    // Content arrived before the resume acknowledgement.
                    self.clear_interaction(CardState::Resolved, ctx);
                    self.transition(SessionStatus::Streaming);
                } else if self.status == SessionStatus::Pending {
                    self.transition(SessionStatus::Streaming);
                }
                if self.chunks.push(&chunk) {
                    ctx.sink
                        .append_foreground_message(&self.task_id, self.chunks.text());
                }
            }

            ServerMessage::ContextConsumption {
                real_tokens,
                approx_tokens,
                max_context,
            } => {
                if let Some(usage) = ContextUsage::from_fields(real_tokens, approx_tokens, max_context)
                {
                    ctx.sink.update_context_footer(&self.task_id, usage);
                }
            }

            ServerMessage::NewMessage { message, .. } => {
                ctx.sink.render_system_message(&message);
            }

            ServerMessage::UserPrompt {
                interaction_id,
                question,
                schema,
                origin_name,
            } => {
                if let Some(previous) = self.pending_interaction.replace(interaction_id) {
                    if previous != interaction_id {
                        warn!(task_id = %self.task_id, %previous, next = %interaction_id, "prompt replaced an unanswered one");
                        ctx.interactions.release(previous);
                    }
                }
                ctx.sink.render_interaction_card(
                    interaction_id,
                    &question,
                    schema.is_some(),
                    origin_name.as_deref(),
                );
                self.transition(SessionStatus::AwaitingInteraction);
            }

            ServerMessage::InteractionUpdate {
                interaction_id,
                status,
            } => self.on_interaction_update(interaction_id, status, ctx),

            ServerMessage::TaskComplete {
                thread_id,
                thread_subject,
            } => {
                if let Some(subject) = thread_subject.filter(|s| !s.trim().is_empty()) {
                    let thread_id = thread_id.unwrap_or_else(|| self.thread_id.clone());
                    ctx.sink.update_thread_title(&thread_id, &subject);
                }
                self.finish(SessionStatus::Completed, "task complete", ctx);
            }

            ServerMessage::TaskError { message } => {
                warn!(task_id = %self.task_id, %message, "task failed");
                ctx.sink.show_task_error(&self.task_id, &message);
                self.error = Some(message);
                self.finish(SessionStatus::Errored, "task error", ctx);
            }

            ServerMessage::Unknown => {
                debug!(task_id = %self.task_id, "unknown message type ignored");
            }
        }
    }

    fn on_interaction_update(
        &mut self,
        interaction_id: InteractionId,
        status: InteractionStatus,
        ctx: &mut SessionContext<'_>,
    ) {
        if self.pending_interaction != Some(interaction_id) {
            debug!(task_id = %self.task_id, %interaction_id, ?status, "update for an interaction this task is not awaiting");
            if status != InteractionStatus::Answered {
                ctx.interactions.release(interaction_id);
            }
            return;
        }

        match status {
            InteractionStatus::Answered => {
                ctx.interactions.mark_processing(interaction_id);
                ctx.sink
                    .update_interaction_card(interaction_id, CardState::Processing);
            }
            InteractionStatus::Resuming => {
                self.clear_interaction(CardState::Resolved, ctx);
                self.transition(SessionStatus::Streaming);
            }
            InteractionStatus::Canceled => {
                self.clear_interaction(CardState::Canceled, ctx);
                self.finish(SessionStatus::Completed, "interaction canceled", ctx);
            }
        }
    }

    fn on_abnormal_close(&mut self, code: u16, reason: &str, ctx: &mut SessionContext<'_>) {
        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;

        if attempt >= ctx.reconnect.max_attempts {
            warn!(task_id = %self.task_id, code, %reason, attempts = attempt, "reconnect attempts exhausted");
            ctx.sink.show_connection_lost(&self.task_id);
            self.finish(SessionStatus::Stale, "reconnect exhausted", ctx);
            return;
        }

        let delay = ctx.reconnect.delay_for(attempt);
        self.channel = ctx.factory.open(&self.task_id, delay);
        info!(
            task_id = %self.task_id,
            code,
            %reason,
            attempt,
            delay_ms = delay.as_millis() as u64,
            channel = %self.channel.id(),
            "reconnect scheduled"
        );
    }

    fn clear_interaction(&mut self, card: CardState, ctx: &mut SessionContext<'_>) {
        if let Some(id) = self.pending_interaction.take() {
            ctx.interactions.release(id);
            ctx.sink.update_interaction_card(id, card);
        }
    }

    fn finish(&mut self, status: SessionStatus, reason: &str, ctx: &mut SessionContext<'_>) {
        if let Some(id) = self.pending_interaction.take() {
            ctx.interactions.release(id);
        }
        self.transition(status);
        self.channel.close(reason);
    }

    fn transition(&mut self, to: SessionStatus) {
        if self.status == to {
            return;
        }
        if to.is_terminal() {
            info!(task_id = %self.task_id, from = %self.status, %to, "session finished");
        } else {
            debug!(task_id = %self.task_id, from = %self.status, %to, "session transition");
        }
        self.status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RenderCall, SessionHarness};
    use task_protocol::{TaskKind, TokenCount};

    fn feed(session: &mut StreamSession, h: &mut SessionHarness, frame: &str) {
        let id = session.channel_id();
        session.on_channel_event(id, ChannelEvent::Message(frame.to_string()), &mut h.ctx());
    }

    fn open(session: &mut StreamSession, h: &mut SessionHarness) {
        let id = session.channel_id();
        session.on_channel_event(id, ChannelEvent::Opened, &mut h.ctx());
    }

    fn drop_connection(session: &mut StreamSession, h: &mut SessionHarness) {
        let id = session.channel_id();
        session.on_channel_event(
            id,
            ChannelEvent::ClosedAbnormal {
                code: 1006,
                reason: "gone".into(),
            },
            &mut h.ctx(),
        );
    }

    fn foreground(task: &str) -> SessionSeed {
        SessionSeed::pending(TaskId::new(task), ThreadId::new("th-1"), false)
    }

    fn renders(calls: &[RenderCall]) -> Vec<String> {
        calls
            .iter()
            .filter_map(|c| match c {
                RenderCall::Foreground(_, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn happy_path() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        assert_eq!(session.status(), SessionStatus::Pending);

        open(&mut session, &mut h);
        assert_eq!(session.status(), SessionStatus::Streaming);

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"Hi"}"#);
        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"Hi there"}"#);
        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"Hi there"}"#);
        assert_eq!(renders(&h.sink.take()), vec!["Hi", "Hi there"]);
        assert_eq!(session.accumulated_text(), "Hi there");

        feed(
            &mut session,
            &mut h,
            r#"{"type":"task_complete","thread_subject":"Greetings"}"#,
        );
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(matches!(session.outcome(), Some(Ok(()))));
        assert_eq!(
            h.sink.take(),
            vec![RenderCall::ThreadTitle(ThreadId::new("th-1"), "Greetings".into())]
        );
    }

    #[tokio::test]
    async fn interaction_pause_and_resume() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);

        feed(
            &mut session,
            &mut h,
            r#"{"type":"user_prompt","interaction_id":7,"question":"Proceed?","schema":{"type":"boolean"}}"#,
        );
        assert_eq!(session.status(), SessionStatus::AwaitingInteraction);
        assert_eq!(session.pending_interaction(), Some(InteractionId(7)));
        assert_eq!(
            h.sink.take(),
            vec![RenderCall::InteractionCard {
                id: InteractionId(7),
                question: "Proceed?".into(),
                schema_present: true,
                origin_name: None,
            }]
        );

        h.ledger.begin(InteractionId(7)).unwrap();
        feed(
            &mut session,
            &mut h,
            r#"{"type":"interaction_update","interaction_id":7,"status":"ANSWERED"}"#,
        );
        assert_eq!(session.status(), SessionStatus::AwaitingInteraction);
        assert!(h.ledger.is_processing(InteractionId(7)));

        feed(
            &mut session,
            &mut h,
            r#"{"type":"interaction_update","interaction_id":7,"status":"RESUMING"}"#,
        );
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(session.pending_interaction(), None);
        assert!(!h.ledger.is_processing(InteractionId(7)));

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"Done."}"#);
        let calls = h.sink.take();
        assert!(calls.contains(&RenderCall::CardState(InteractionId(7), CardState::Processing)));
        assert!(calls.contains(&RenderCall::CardState(InteractionId(7), CardState::Resolved)));
        assert_eq!(renders(&calls), vec!["Done."]);
    }

    #[tokio::test]
    async fn chunk_while_awaiting_resumes_streaming() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(
            &mut session,
            &mut h,
            r#"{"type":"user_prompt","interaction_id":3,"question":"?"}"#,
        );

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"after"}"#);
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(session.pending_interaction(), None);
        assert_eq!(renders(&h.sink.take()), vec!["after"]);
    }

    #[tokio::test]
    async fn canceled_interaction_completes_the_task() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(
            &mut session,
            &mut h,
            r#"{"type":"user_prompt","interaction_id":4,"question":"?"}"#,
        );
        feed(
            &mut session,
            &mut h,
            r#"{"type":"interaction_update","interaction_id":4,"status":"CANCELED"}"#,
        );
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(
            h.sink
                .take()
                .contains(&RenderCall::CardState(InteractionId(4), CardState::Canceled))
        );
    }

    #[tokio::test]
    async fn task_error_is_terminal_and_surfaced() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(&mut session, &mut h, r#"{"type":"task_error","message":"model overloaded"}"#);

        assert_eq!(session.status(), SessionStatus::Errored);
        assert_eq!(
            h.sink.take(),
            vec![RenderCall::TaskError(TaskId::new("t-1"), "model overloaded".into())]
        );
        match session.outcome() {
            Some(Err(StreamError::Task { message, .. })) => assert_eq!(message, "model overloaded"),
            other => panic!("unexpected outcome: {:?}", other),
        }

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"late"}"#);
        assert!(h.sink.take().is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_changes_nothing() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"Hi"}"#);
        h.sink.take();

        feed(&mut session, &mut h, "{not json");
        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":42}"#);
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(session.accumulated_text(), "Hi");
        assert!(h.sink.take().is_empty());
    }

    #[tokio::test]
    async fn unknown_type_is_ignored() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(&mut session, &mut h, r#"{"type":"typing_indicator","on":true}"#);
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert!(h.sink.take().is_empty());
    }

    #[tokio::test]
    async fn resumed_seed_renders_then_first_chunk_replaces() {
        let mut h = SessionHarness::new();
        let seed = SessionSeed::resumed(
            RunningTask {
                task_id: TaskId::new("t-9"),
                current_response: "partial".into(),
                last_progress: Some("Searching".into()),
                kind: TaskKind::Reply,
            },
            ThreadId::new("th-1"),
        );
        let mut session = StreamSession::start(seed, &mut h.ctx());
        assert_eq!(session.status(), SessionStatus::Streaming);
        assert_eq!(
            h.sink.take(),
            vec![
                RenderCall::Foreground(TaskId::new("t-9"), "partial".into()),
                RenderCall::Progress(TaskId::new("t-9"), "Searching".into()),
            ]
        );

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"partial"}"#);
        assert!(h.sink.take().is_empty());

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"partial and more"}"#);
        assert_eq!(renders(&h.sink.take()), vec!["partial and more"]);
    }

    #[tokio::test]
    async fn background_session_ignores_chunks() {
        let mut h = SessionHarness::new();
        let seed = SessionSeed::pending(TaskId::new("t-c"), ThreadId::new("th-1"), true);
        let mut session = StreamSession::start(seed, &mut h.ctx());
        open(&mut session, &mut h);

        feed(&mut session, &mut h, r#"{"type":"response_chunk","chunk":"summary"}"#);
        feed(&mut session, &mut h, r#"{"type":"progress_update","progress_log":"Compacting"}"#);
        assert_eq!(
            h.sink.take(),
            vec![RenderCall::Progress(TaskId::new("t-c"), "Compacting".into())]
        );
        assert_eq!(session.accumulated_text(), "");
    }

    #[tokio::test]
    async fn context_consumption_prefers_real_tokens() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(
            &mut session,
            &mut h,
            r#"{"type":"context_consumption","real_tokens":1200,"approx_tokens":1100,"max_context":200000}"#,
        );
        feed(&mut session, &mut h, r#"{"type":"context_consumption"}"#);
        assert_eq!(
            h.sink.take(),
            vec![RenderCall::ContextFooter(
                TaskId::new("t-1"),
                ContextUsage {
                    tokens: TokenCount::Real(1200),
                    max_context: Some(200000),
                }
            )]
        );
    }

    #[tokio::test]
    async fn new_message_is_rendered_out_of_band() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        feed(
            &mut session,
            &mut h,
            r#"{"type":"new_message","message":{"role":"system","text":"compacted"}}"#,
        );
        assert_eq!(
            h.sink.take(),
            vec![RenderCall::SystemMessage(serde_json::json!({
                "role": "system",
                "text": "compacted"
            }))]
        );
    }

    #[tokio::test]
    async fn five_abnormal_closes_go_stale() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);

        for attempt in 1..5 {
            let before = session.channel_id();
            drop_connection(&mut session, &mut h);
            assert_eq!(session.reconnect_attempts(), attempt);
            assert_eq!(session.status(), SessionStatus::Streaming);
            assert_ne!(session.channel_id(), before, "a fresh channel per attempt");
        }

        drop_connection(&mut session, &mut h);
        assert_eq!(session.status(), SessionStatus::Stale);
        assert_eq!(h.sink.take(), vec![RenderCall::ConnectionLost(TaskId::new("t-1"))]);
        assert!(matches!(
            session.outcome(),
            Some(Err(StreamError::ReconnectExhausted(_)))
        ));
    }

    #[tokio::test]
    async fn open_resets_reconnect_counter() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        drop_connection(&mut session, &mut h);
        drop_connection(&mut session, &mut h);
        assert_eq!(session.reconnect_attempts(), 2);

        open(&mut session, &mut h);
        assert_eq!(session.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn events_from_replaced_channel_are_ignored() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        let old = session.channel_id();
        drop_connection(&mut session, &mut h);

        session.on_channel_event(
            old,
            ChannelEvent::Message(r#"{"type":"response_chunk","chunk":"stale"}"#.into()),
            &mut h.ctx(),
        );
        assert!(h.sink.take().is_empty());
        assert_eq!(session.accumulated_text(), "");
    }

    #[tokio::test]
    async fn clean_close_completes() {
        let mut h = SessionHarness::new();
        let mut session = StreamSession::start(foreground("t-1"), &mut h.ctx());
        open(&mut session, &mut h);
        let id = session.channel_id();
        session.on_channel_event(id, ChannelEvent::ClosedClean, &mut h.ctx());
        assert_eq!(session.status(), SessionStatus::Completed);
    }
}
