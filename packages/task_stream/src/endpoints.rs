use task_protocol::{BackgroundOp, InteractionId, TaskId, ThreadId};
use url::Url;

use crate::error::StreamError;

/// URL layout of the task server. Channel URLs use `wss` when the base is
/// `https` and `ws` when it is `http`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base: Url) -> Result<Self, StreamError> {
        match base.scheme() {
            "http" | "https" => Ok(Self { base }),
            other => Err(anyhow::anyhow!("unsupported base url scheme: {}", other).into()),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn channel_url(&self, task_id: &TaskId) -> Url {
        let mut url = self.join(&["ws", "tasks", task_id.as_str(), ""]);
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        // http(s) -> ws(s) is always permitted between special schemes
        let _ = url.set_scheme(scheme);
        url
    }

    pub fn submit_message_url(&self, thread_id: &ThreadId) -> Url {
        self.join(&["api", "threads", thread_id.as_str(), "messages"])
    }

    pub fn operation_url(&self, thread_id: &ThreadId, op: BackgroundOp) -> Url {
        self.join(&["api", "threads", thread_id.as_str(), op.path_segment()])
    }

    pub fn running_tasks_url(&self, thread_id: &ThreadId) -> Url {
        self.join(&["api", "threads", thread_id.as_str(), "running-tasks"])
    }

    pub fn answer_url(&self, interaction_id: InteractionId) -> Url {
        self.join(&["api", "interactions", &interaction_id.to_string(), "answer"])
    }

    pub fn cancel_url(&self, interaction_id: InteractionId) -> Url {
        self.join(&["api", "interactions", &interaction_id.to_string(), "cancel"])
    }

    fn join(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}
