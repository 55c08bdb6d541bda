//! Input gating across concurrent sessions.
//!
//! The gate is never stored as a source of truth. It is derived from the
//! live session set after every transition; [`GatePublisher`] only remembers
//! what was last pushed to the sink so unchanged values are not re-sent.

use crate::session::SessionStatus;
use crate::sink::RenderSink;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InteractionGate {
    /// A foreground reply is pending or streaming: sending is blocked.
    pub compose_disabled: bool,
    /// Some task awaits an answer: the whole input is blocked.
    pub answer_disabled: bool,
}

/// What the input placeholder should say. Awaiting an answer dominates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    Open,
    Busy,
    AwaitingAnswer,
}

impl InteractionGate {
    pub const OPEN: Self = Self {
        compose_disabled: false,
        answer_disabled: false,
    };

    /// Derive from `(status, is_background)` of every live session.
    pub fn derive<I>(sessions: I) -> Self
    where
        I: IntoIterator<Item = (SessionStatus, bool)>,
    {
        let mut gate = Self::OPEN;
        for (status, is_background) in sessions {
            match status {
                SessionStatus::AwaitingInteraction => gate.answer_disabled = true,
                SessionStatus::Pending | SessionStatus::Streaming if !is_background => {
                    gate.compose_disabled = true
                }
                _ => {}
            }
        }
        gate
    }

    pub fn is_open(&self) -> bool {
        *self == Self::OPEN
    }

    pub fn input_mode(&self) -> InputMode {
        if self.answer_disabled {
            InputMode::AwaitingAnswer
        } else if self.compose_disabled {
            InputMode::Busy
        } else {
            InputMode::Open
        }
    }
}

#[derive(Debug, Default)]
pub struct GatePublisher {
    published: Option<InteractionGate>,
}

impl GatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value pushed to the sink (open if nothing was pushed yet).
    pub fn current(&self) -> InteractionGate {
        self.published.unwrap_or_default()
    }

    /// Push `gate` to the sink, skipping fields that did not change.
    /// Returns whether anything was sent.
    pub fn publish(&mut self, gate: InteractionGate, sink: &mut dyn RenderSink) -> bool {
        let previous = self.published;
        if previous == Some(gate) {
            return false;
        }
        if previous.map(|p| p.compose_disabled) != Some(gate.compose_disabled) {
            sink.set_compose_disabled(gate.compose_disabled);
        }
        if previous.map(|p| p.answer_disabled) != Some(gate.answer_disabled) {
            sink.set_answer_disabled(gate.answer_disabled);
        }
        sink.set_input_mode(gate.input_mode());
        self.published = Some(gate);
        true
    }

    /// Push an open gate unconditionally, whatever the sink currently shows.
    pub fn force_open(&mut self, sink: &mut dyn RenderSink) {
        sink.set_compose_disabled(false);
        sink.set_answer_disabled(false);
        sink.set_input_mode(InputMode::Open);
        self.published = Some(InteractionGate::OPEN);
    }
}
