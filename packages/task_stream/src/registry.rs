use std::collections::HashMap;

use task_protocol::{TaskId, ThreadId};
use tracing::debug;

use crate::gate::InteractionGate;
use crate::interaction::InteractionLedger;
use crate::session::{SessionContext, SessionSeed, StreamSession};

/// Live sessions keyed by task id.
///
/// Owned by the dispatcher's event loop; there is no shared access and no
/// locking.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<TaskId, StreamSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `seed`. If the task is already tracked the
    /// existing session is kept and `false` is returned.
    pub fn create(&mut self, seed: SessionSeed, ctx: &mut SessionContext<'_>) -> bool {
        if self.sessions.contains_key(&seed.task_id) {
            debug!(task_id = %seed.task_id, "session already registered");
            return false;
        }
        let task_id = seed.task_id.clone();
        let session = StreamSession::start(seed, ctx);
        self.sessions.insert(task_id, session);
        true
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&StreamSession> {
        self.sessions.get(task_id)
    }

    pub fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut StreamSession> {
        self.sessions.get_mut(task_id)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.sessions.contains_key(task_id)
    }

    /// Deregister a session and close its channel.
    pub fn remove(
        &mut self,
        task_id: &TaskId,
        reason: &str,
        interactions: &mut InteractionLedger,
    ) -> Option<StreamSession> {
        let mut session = self.sessions.remove(task_id)?;
        session.close(reason, interactions);
        debug!(task_id = %task_id, status = %session.status(), %reason, "session removed");
        Some(session)
    }

    /// Deregister every session that reached a terminal state.
    pub fn remove_terminal(&mut self, interactions: &mut InteractionLedger) -> Vec<StreamSession> {
        let done: Vec<TaskId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.status().is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        done.iter()
            .filter_map(|id| self.remove(id, "session finished", interactions))
            .collect()
    }

    /// Deregister every session that does not belong to `keep`.
    pub fn remove_other_threads(
        &mut self,
        keep: &ThreadId,
        interactions: &mut InteractionLedger,
    ) -> Vec<StreamSession> {
        let foreign: Vec<TaskId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.thread_id() != keep)
            .map(|(id, _)| id.clone())
            .collect();
        foreign
            .iter()
            .filter_map(|id| self.remove(id, "thread changed", interactions))
            .collect()
    }

    pub fn remove_all(
        &mut self,
        reason: &str,
        interactions: &mut InteractionLedger,
    ) -> Vec<StreamSession> {
        let all: Vec<TaskId> = self.sessions.keys().cloned().collect();
        all.iter()
            .filter_map(|id| self.remove(id, reason, interactions))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Gate derived from the sessions currently registered.
    pub fn gate(&self) -> InteractionGate {
        InteractionGate::derive(self.iter().map(|s| (s.status(), s.is_background())))
    }
}
