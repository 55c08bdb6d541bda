use task_protocol::{ContextUsage, InteractionId, TaskId, ThreadId};

use crate::gate::InputMode;

/// Display state of an interaction card after the question was rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// An answer was accepted; the task has not resumed yet.
    Processing,
    /// The task resumed with the answer.
    Resolved,
    Canceled,
}

/// Where session effects go. Implemented by whatever draws the thread.
///
/// Calls are made from the dispatcher's event loop, one at a time.
pub trait RenderSink: Send {
    /// Replace the visible reply of a foreground task with `snapshot`.
    fn append_foreground_message(&mut self, task_id: &TaskId, snapshot: &str);

    fn update_progress(&mut self, task_id: &TaskId, text: &str);

    fn update_context_footer(&mut self, task_id: &TaskId, usage: ContextUsage);

    fn render_interaction_card(
        &mut self,
        interaction_id: InteractionId,
        question: &str,
        schema_present: bool,
        origin_name: Option<&str>,
    );

    fn update_interaction_card(&mut self, interaction_id: InteractionId, state: CardState);

    fn render_system_message(&mut self, message: &serde_json::Value);

    fn update_thread_title(&mut self, thread_id: &ThreadId, subject: &str);

    fn show_task_error(&mut self, task_id: &TaskId, message: &str);

    /// Reconnects are exhausted; only a reload recovers.
    fn show_connection_lost(&mut self, task_id: &TaskId);

    fn set_compose_disabled(&mut self, disabled: bool);

    fn set_answer_disabled(&mut self, disabled: bool);

    /// Placeholder hint for the input. Called with every gate change.
    fn set_input_mode(&mut self, _mode: InputMode) {}
}
