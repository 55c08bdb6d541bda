//! Session dispatcher
//!
//! A single tokio task owns the [`SessionRegistry`], the interaction ledger
//! and the render sink. Channel events and handle commands are both applied
//! here, one at a time, so session state needs no locks. After every event
//! the loop deregisters finished sessions, wakes whoever is waiting on them,
//! and republishes the derived [`InteractionGate`].
//!
//! HTTP calls never run on this task. [`DispatcherHandle`] performs them on
//! the caller's task and feeds the results back in as commands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use task_protocol::{BackgroundOp, InteractionId, TaskId, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::api::TaskApi;
use crate::channel::{ChannelEnvelope, ChannelFactory, Connector};
use crate::config::{ReconnectConfig, StreamConfig};
use crate::discovery::{Discovered, RunningTaskDiscovery};
use crate::error::StreamError;
use crate::gate::{GatePublisher, InteractionGate};
use crate::interaction::InteractionLedger;
use crate::registry::SessionRegistry;
use crate::session::{SessionContext, SessionSeed, SessionSnapshot, StreamSession};
use crate::sink::RenderSink;

type Outcome = Result<(), StreamError>;

/// Commands sent to the dispatcher loop
enum DispatchCommand {
    Track {
        seed: SessionSeed,
        respond_to: oneshot::Sender<TaskWatch>,
    },
    Watch {
        task_id: TaskId,
        respond_to: oneshot::Sender<Option<TaskWatch>>,
    },
    BeginAnswer {
        interaction_id: InteractionId,
        respond_to: oneshot::Sender<Result<(), StreamError>>,
    },
    ReleaseAnswer {
        interaction_id: InteractionId,
    },
    ActivateThread {
        thread_id: ThreadId,
        respond_to: oneshot::Sender<u64>,
    },
    Discovered {
        generation: u64,
        result: Result<Discovered, StreamError>,
        respond_to: oneshot::Sender<Result<Vec<TaskId>, StreamError>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<DispatchSnapshot>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Resolves when a tracked task reaches a terminal state, or stops being
/// followed.
#[derive(Debug)]
pub struct TaskWatch {
    task_id: TaskId,
    rx: oneshot::Receiver<Outcome>,
}

impl TaskWatch {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub async fn finished(self) -> Result<(), StreamError> {
        self.rx.await.map_err(|_| StreamError::DispatcherGone)?
    }
}

/// State of the dispatcher as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub current_thread: Option<ThreadId>,
    pub gate: InteractionGate,
    /// Sorted by task id.
    pub sessions: Vec<SessionSnapshot>,
}

impl DispatchSnapshot {
    pub fn session(&self, task_id: &TaskId) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| &s.task_id == task_id)
    }
}

/// Handle to the dispatcher loop. Cheap to clone.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatchCommand>,
    api: Arc<dyn TaskApi>,
    discovery: RunningTaskDiscovery,
}

impl DispatcherHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DispatchCommand,
    ) -> Result<T, StreamError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| StreamError::DispatcherGone)?;
        rx.await.map_err(|_| StreamError::DispatcherGone)
    }

    /// Post a user message and follow the reply task it starts.
    pub async fn submit_message(
        &self,
        thread_id: &ThreadId,
        content: &str,
    ) -> Result<TaskWatch, StreamError> {
        let resp = self.api.submit_message(thread_id, content).await?;
        info!(task_id = %resp.task_id, thread_id = %resp.thread_id, "message submitted");
        self.track_task(SessionSeed::pending(resp.task_id, resp.thread_id, false))
            .await
    }

    /// Start a background operation and follow its task.
    pub async fn start_operation(
        &self,
        thread_id: &ThreadId,
        op: BackgroundOp,
    ) -> Result<TaskWatch, StreamError> {
        let resp = self.api.start_operation(thread_id, op).await?;
        info!(task_id = %resp.task_id, thread_id = %thread_id, op = op.path_segment(), "operation started");
        self.track_task(SessionSeed::pending(resp.task_id, thread_id.clone(), true))
            .await
    }

    /// Follow a task, opening a session for it unless one exists.
    pub async fn track_task(&self, seed: SessionSeed) -> Result<TaskWatch, StreamError> {
        self.request(|respond_to| DispatchCommand::Track { seed, respond_to })
            .await
    }

    /// Wait on a task that already has a session (e.g. one found by
    /// discovery). `None` if it is not tracked.
    pub async fn watch(&self, task_id: &TaskId) -> Result<Option<TaskWatch>, StreamError> {
        let task_id = task_id.clone();
        self.request(|respond_to| DispatchCommand::Watch {
            task_id,
            respond_to,
        })
        .await
    }

    /// Answer a pending interaction. A second answer while the first is
    /// still processing is rejected without a request.
    pub async fn answer_interaction(
        &self,
        interaction_id: InteractionId,
        payload: serde_json::Value,
    ) -> Result<(), StreamError> {
        self.begin_answer(interaction_id).await?;
        let result = self.api.answer_interaction(interaction_id, payload).await;
        self.finish_answer(interaction_id, result).await
    }

    pub async fn cancel_interaction(&self, interaction_id: InteractionId) -> Result<(), StreamError> {
        self.begin_answer(interaction_id).await?;
        let result = self.api.cancel_interaction(interaction_id).await;
        self.finish_answer(interaction_id, result).await
    }

    async fn begin_answer(&self, interaction_id: InteractionId) -> Result<(), StreamError> {
        self.request(|respond_to| DispatchCommand::BeginAnswer {
            interaction_id,
            respond_to,
        })
        .await?
    }

    async fn finish_answer(
        &self,
        interaction_id: InteractionId,
        result: Result<(), StreamError>,
    ) -> Result<(), StreamError> {
        if let Err(e) = &result {
            warn!(%interaction_id, error = %e, "answer request failed, releasing");
            self.sender
                .send(DispatchCommand::ReleaseAnswer { interaction_id })
                .await
                .map_err(|_| StreamError::DispatcherGone)?;
        }
        result
    }

    /// Make `thread_id` the current thread: sessions of any other thread are
    /// torn down, then the server is asked what still runs here. Returns
    /// the ids of the tasks now followed from discovery.
    ///
    /// `pending_cards` tells whether the thread view already shows an
    /// unanswered interaction card.
    pub async fn activate_thread(
        &self,
        thread_id: &ThreadId,
        pending_cards: bool,
    ) -> Result<Vec<TaskId>, StreamError> {
        let activated = thread_id.clone();
        let generation = self
            .request(|respond_to| DispatchCommand::ActivateThread {
                thread_id: activated,
                respond_to,
            })
            .await?;

        let result = self.discovery.discover(thread_id, pending_cards).await;
        self.request(|respond_to| DispatchCommand::Discovered {
            generation,
            result,
            respond_to,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<DispatchSnapshot, StreamError> {
        self.request(|respond_to| DispatchCommand::Snapshot { respond_to })
            .await
    }

    /// Close every channel and stop the loop.
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        self.request(|respond_to| DispatchCommand::Shutdown { respond_to })
            .await
    }
}

pub struct Dispatcher {
    registry: SessionRegistry,
    ledger: InteractionLedger,
    sink: Box<dyn RenderSink>,
    factory: ChannelFactory,
    reconnect: ReconnectConfig,
    gate: GatePublisher,
    current_thread: Option<ThreadId>,
    /// Bumped on every thread activation; discovery results from an older
    /// activation are discarded.
    generation: u64,
    waiters: HashMap<TaskId, Vec<oneshot::Sender<Outcome>>>,
    commands: mpsc::Receiver<DispatchCommand>,
    events: mpsc::Receiver<ChannelEnvelope>,
}

impl Dispatcher {
    /// Spawn the dispatcher loop and return its handle.
    pub fn spawn(
        config: &StreamConfig,
        connector: Arc<dyn Connector>,
        api: Arc<dyn TaskApi>,
        sink: Box<dyn RenderSink>,
    ) -> DispatcherHandle {
        let (event_tx, events) = mpsc::channel(config.event_capacity);
        let (sender, commands) = mpsc::channel(config.command_capacity);
        let factory = ChannelFactory::new(
            connector,
            config.endpoints.clone(),
            config.heartbeat,
            event_tx,
        );

        let dispatcher = Dispatcher {
            registry: SessionRegistry::new(),
            ledger: InteractionLedger::new(),
            sink,
            factory,
            reconnect: config.reconnect,
            gate: GatePublisher::new(),
            current_thread: None,
            generation: 0,
            waiters: HashMap::new(),
            commands,
            events,
        };
        tokio::spawn(dispatcher.run());

        DispatcherHandle {
            sender,
            discovery: RunningTaskDiscovery::new(api.clone()),
            api,
        }
    }

    async fn run(mut self) {
        debug!("dispatcher started");
        self.settle();

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(DispatchCommand::Shutdown { respond_to }) => {
                        self.shutdown();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        self.shutdown();
                        break;
                    }
                },

                Some(envelope) = self.events.recv() => self.on_envelope(envelope),
            }
        }

        debug!("dispatcher stopped");
    }

    fn on_envelope(&mut self, envelope: ChannelEnvelope) {
        let ChannelEnvelope {
            task_id,
            channel_id,
            event,
        } = envelope;

        let Some(session) = self.registry.get_mut(&task_id) else {
            debug!(task_id = %task_id, channel = %channel_id, "event for untracked task dropped");
            return;
        };
        let mut ctx = SessionContext {
            sink: self.sink.as_mut(),
            factory: &self.factory,
            reconnect: &self.reconnect,
            interactions: &mut self.ledger,
        };
        session.on_channel_event(channel_id, event, &mut ctx);
        self.settle();
    }

    fn on_command(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Track { seed, respond_to } => {
                let watch = self.add_waiter(&seed.task_id);
                let inactive = self
                    .current_thread
                    .as_ref()
                    .is_some_and(|current| current != &seed.thread_id);
                if inactive {
                    debug!(task_id = %seed.task_id, thread_id = %seed.thread_id, "task belongs to an inactive thread");
                    let task_id = seed.task_id;
                    self.notify(&task_id, || Err(StreamError::Detached(task_id.clone())));
                } else {
                    self.create(seed);
                    self.settle();
                }
                let _ = respond_to.send(watch);
            }

            DispatchCommand::Watch {
                task_id,
                respond_to,
            } => {
                let watch = self
                    .registry
                    .contains(&task_id)
                    .then(|| self.add_waiter(&task_id));
                let _ = respond_to.send(watch);
            }

            DispatchCommand::BeginAnswer {
                interaction_id,
                respond_to,
            } => {
                let result = self.ledger.begin(interaction_id);
                if let Err(e) = &result {
                    debug!(%interaction_id, error = %e, "answer rejected locally");
                }
                let _ = respond_to.send(result);
            }

            DispatchCommand::ReleaseAnswer { interaction_id } => {
                self.ledger.release_submit(interaction_id);
            }

            DispatchCommand::ActivateThread {
                thread_id,
                respond_to,
            } => {
                self.activate(thread_id);
                let _ = respond_to.send(self.generation);
            }

            DispatchCommand::Discovered {
                generation,
                result,
                respond_to,
            } => {
                let _ = respond_to.send(self.on_discovered(generation, result));
            }

            DispatchCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            // Handled by the loop itself
            DispatchCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    fn activate(&mut self, thread_id: ThreadId) {
        self.generation += 1;
        info!(thread_id = %thread_id, generation = self.generation, "thread activated");

        for session in self.registry.remove_other_threads(&thread_id, &mut self.ledger) {
            let task_id = session.task_id().clone();
            info!(task_id = %task_id, status = %session.status(), "stopped following task");
            self.notify(&task_id, || Err(StreamError::Detached(task_id.clone())));
        }
        let owned: HashSet<InteractionId> = self
            .registry
            .iter()
            .filter_map(|s| s.pending_interaction())
            .collect();
        let forgotten = self.ledger.retain(&owned);
        if forgotten > 0 {
            debug!(forgotten, "released answers for interactions no session owns");
        }
        self.current_thread = Some(thread_id);
        self.settle();
    }

    fn on_discovered(
        &mut self,
        generation: u64,
        result: Result<Discovered, StreamError>,
    ) -> Result<Vec<TaskId>, StreamError> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "stale discovery discarded");
            return Ok(Vec::new());
        }
        let discovered = result.inspect_err(|e| {
            warn!(error = %e, "running task discovery failed");
        })?;

        let task_ids: Vec<TaskId> = discovered.seeds.iter().map(|s| s.task_id.clone()).collect();
        for seed in discovered.seeds {
            self.create(seed);
        }

        if discovered.force_gate_open {
            if self.registry.gate().is_open() {
                self.gate.force_open(self.sink.as_mut());
            } else {
                debug!(thread_id = %discovered.thread_id, "gate not forced open, sessions still active");
            }
        }
        self.settle();
        Ok(task_ids)
    }

    fn create(&mut self, seed: SessionSeed) {
        let mut ctx = SessionContext {
            sink: self.sink.as_mut(),
            factory: &self.factory,
            reconnect: &self.reconnect,
            interactions: &mut self.ledger,
        };
        self.registry.create(seed, &mut ctx);
    }

    /// Deregister finished sessions, wake their waiters, republish the gate.
    fn settle(&mut self) {
        let finished = self.registry.remove_terminal(&mut self.ledger);
        let gate = self.registry.gate();
        self.gate.publish(gate, self.sink.as_mut());
        for session in &finished {
            self.notify_outcome(session);
        }
    }

    fn notify_outcome(&mut self, session: &StreamSession) {
        self.notify(session.task_id(), || session.outcome().unwrap_or(Ok(())));
    }

    fn notify(&mut self, task_id: &TaskId, outcome: impl Fn() -> Outcome) {
        if let Some(waiters) = self.waiters.remove(task_id) {
            for waiter in waiters {
                let _ = waiter.send(outcome());
            }
        }
    }

    fn add_waiter(&mut self, task_id: &TaskId) -> TaskWatch {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(task_id.clone()).or_default().push(tx);
        TaskWatch {
            task_id: task_id.clone(),
            rx,
        }
    }

    fn snapshot(&self) -> DispatchSnapshot {
        let mut sessions: Vec<SessionSnapshot> = self.registry.iter().map(|s| s.snapshot()).collect();
        sessions.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        DispatchSnapshot {
            current_thread: self.current_thread.clone(),
            gate: self.gate.current(),
            sessions,
        }
    }

    fn shutdown(&mut self) {
        let closed = self.registry.remove_all("shutdown", &mut self.ledger);
        info!(sessions = closed.len(), "dispatcher shutting down");
        self.waiters.clear();
    }
}
