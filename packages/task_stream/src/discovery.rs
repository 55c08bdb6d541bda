use std::sync::Arc;

use task_protocol::ThreadId;
use tracing::info;

use crate::api::TaskApi;
use crate::error::StreamError;
use crate::session::SessionSeed;

/// Result of asking the server what is still running on a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub thread_id: ThreadId,
    /// One STREAMING seed per running task, carrying what was already
    /// streamed so a reload does not show an empty bubble.
    pub seeds: Vec<SessionSeed>,
    /// Nothing runs and no question is on screen: the gate must be open,
    /// whatever a previous view left behind.
    pub force_gate_open: bool,
}

#[derive(Clone)]
pub struct RunningTaskDiscovery {
    api: Arc<dyn TaskApi>,
}

impl RunningTaskDiscovery {
    pub fn new(api: Arc<dyn TaskApi>) -> Self {
        Self { api }
    }

    /// `pending_cards` is whether the server-rendered thread already shows
    /// an unanswered interaction card.
    pub async fn discover(
        &self,
        thread_id: &ThreadId,
        pending_cards: bool,
    ) -> Result<Discovered, StreamError> {
        let tasks = self.api.list_running_tasks(thread_id).await?;
        info!(thread_id = %thread_id, running = tasks.len(), "running tasks discovered");

        let force_gate_open = tasks.is_empty() && !pending_cards;
        let seeds = tasks
            .into_iter()
            .map(|task| SessionSeed::resumed(task, thread_id.clone()))
            .collect();

        Ok(Discovered {
            thread_id: thread_id.clone(),
            seeds,
            force_gate_open,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::test_helpers::FakeTaskApi;
    use task_protocol::{RunningTask, TaskId, TaskKind};

    #[tokio::test]
    async fn running_tasks_become_streaming_seeds() {
        let api = Arc::new(FakeTaskApi::new());
        api.set_running(
            ThreadId::new("th-1"),
            vec![
                RunningTask {
                    task_id: TaskId::new("t-1"),
                    current_response: "partial".into(),
                    last_progress: Some("Reading files".into()),
                    kind: TaskKind::Reply,
                },
                RunningTask {
                    task_id: TaskId::new("t-2"),
                    current_response: String::new(),
                    last_progress: None,
                    kind: TaskKind::Summarize,
                },
            ],
        );

        let discovered = RunningTaskDiscovery::new(api)
            .discover(&ThreadId::new("th-1"), false)
            .await
            .unwrap();

        assert!(!discovered.force_gate_open);
        assert_eq!(discovered.seeds.len(), 2);
        let reply = &discovered.seeds[0];
        assert_eq!(reply.status, SessionStatus::Streaming);
        assert_eq!(reply.accumulated_text, "partial");
        assert_eq!(reply.last_progress.as_deref(), Some("Reading files"));
        assert!(!reply.is_background);
        assert!(discovered.seeds[1].is_background);
    }

    #[tokio::test]
    async fn idle_thread_forces_gate_open() {
        let api = Arc::new(FakeTaskApi::new());
        let discovery = RunningTaskDiscovery::new(api);

        let idle = discovery.discover(&ThreadId::new("th-1"), false).await.unwrap();
        assert!(idle.seeds.is_empty());
        assert!(idle.force_gate_open);

        let with_card = discovery.discover(&ThreadId::new("th-1"), true).await.unwrap();
        assert!(!with_card.force_gate_open);
    }
}
