//! Terminal rendering of session effects.
//!
//! Reply text goes to stdout; everything else is status and goes to stderr.

use std::collections::HashMap;
use std::io::{self, Write};

use task_protocol::{ContextUsage, InteractionId, TaskId, ThreadId, TokenCount};
use task_stream::{CardState, InputMode, RenderSink};

/// Prints a streamed reply as it grows. Snapshots that extend what was
/// already printed only print the new suffix; anything else reprints.
#[derive(Default)]
pub struct TerminalSink {
    printed: HashMap<TaskId, String>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Bytes of `next` not yet on screen, or `None` if `next` does not extend
/// `printed` and must be reprinted whole.
fn unprinted_suffix<'a>(printed: &str, next: &'a str) -> Option<&'a str> {
    next.strip_prefix(printed)
}

impl RenderSink for TerminalSink {
    fn append_foreground_message(&mut self, task_id: &TaskId, snapshot: &str) {
        let printed = self.printed.entry(task_id.clone()).or_default();
        let mut out = io::stdout().lock();
        match unprinted_suffix(printed, snapshot) {
            Some(suffix) => {
                let _ = write!(out, "{}", suffix);
            }
            None => {
                let _ = write!(out, "\n[rewritten]\n{}", snapshot);
            }
        }
        let _ = out.flush();
        *printed = snapshot.to_string();
    }

    fn update_progress(&mut self, task_id: &TaskId, text: &str) {
        eprintln!("[{}] {}", task_id, text);
    }

    fn update_context_footer(&mut self, _task_id: &TaskId, usage: ContextUsage) {
        let tokens = match usage.tokens {
            TokenCount::Real(n) => n.to_string(),
            TokenCount::Approx(n) => format!("~{}", n),
        };
        match usage.max_context {
            Some(max) => eprintln!("[context: {} / {} tokens]", tokens, max),
            None => eprintln!("[context: {} tokens]", tokens),
        }
    }

    fn render_interaction_card(
        &mut self,
        interaction_id: InteractionId,
        question: &str,
        schema_present: bool,
        origin_name: Option<&str>,
    ) {
        eprintln!();
        match origin_name {
            Some(origin) => eprintln!("  Question {} from {}:", interaction_id, origin),
            None => eprintln!("  Question {}:", interaction_id),
        }
        eprintln!("  {}", question);
        let hint = if schema_present {
            "structured answer expected"
        } else {
            "free-form answer"
        };
        eprintln!(
            "  ({}; reply with `taskstream answer {} <json>`)",
            hint, interaction_id
        );
        eprintln!();
    }

    fn update_interaction_card(&mut self, interaction_id: InteractionId, state: CardState) {
        let label = match state {
            CardState::Processing => "processing",
            CardState::Resolved => "answered",
            CardState::Canceled => "canceled",
        };
        eprintln!("[question {}: {}]", interaction_id, label);
    }

    fn render_system_message(&mut self, message: &serde_json::Value) {
        let text = message
            .get("content")
            .or_else(|| message.get("text"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| message.to_string());
        eprintln!("[system] {}", text);
    }

    fn update_thread_title(&mut self, thread_id: &ThreadId, subject: &str) {
        eprintln!("[thread {} is now \"{}\"]", thread_id, subject);
    }

    fn show_task_error(&mut self, task_id: &TaskId, message: &str) {
        eprintln!("\n[task {} failed: {}]", task_id, message);
    }

    fn show_connection_lost(&mut self, task_id: &TaskId) {
        eprintln!(
            "\n[connection to task {} lost; run `taskstream watch` to pick it up again]",
            task_id
        );
    }

    fn set_compose_disabled(&mut self, _disabled: bool) {}

    fn set_answer_disabled(&mut self, _disabled: bool) {}

    fn set_input_mode(&mut self, mode: InputMode) {
        if mode == InputMode::AwaitingAnswer {
            eprintln!("[waiting for an answer]");
        }
    }
}
