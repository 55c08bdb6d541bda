use std::collections::HashSet;

use task_protocol::InteractionId;

use crate::error::StreamError;

/// Interactions whose answer (or cancel) is in flight.
///
/// Two sources block a new submit. A local claim is taken when the user
/// submits and dropped only if that request fails. Server processing starts
/// when the server reports ANSWERED and outlives any local failure. Both end
/// when the server resumes or cancels the task.
#[derive(Debug, Default)]
pub struct InteractionLedger {
    submitting: HashSet<InteractionId>,
    processing: HashSet<InteractionId>,
}

impl InteractionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for a submit. Rejects a second submit for the same id.
    pub fn begin(&mut self, id: InteractionId) -> Result<(), StreamError> {
        if self.processing.contains(&id) || !self.submitting.insert(id) {
            return Err(StreamError::AnswerInFlight(id));
        }
        Ok(())
    }

    /// Drop the local claim after a failed submit. Server processing stays.
    pub fn release_submit(&mut self, id: InteractionId) -> bool {
        self.submitting.remove(&id)
    }

    pub fn mark_processing(&mut self, id: InteractionId) {
        self.processing.insert(id);
    }

    /// Forget `id` entirely.
    pub fn release(&mut self, id: InteractionId) -> bool {
        let submitting = self.submitting.remove(&id);
        self.processing.remove(&id) || submitting
    }

    /// Forget every id not in `owned`.
    pub fn retain(&mut self, owned: &HashSet<InteractionId>) -> usize {
        let before = self.submitting.len() + self.processing.len();
        self.submitting.retain(|id| owned.contains(id));
        self.processing.retain(|id| owned.contains(id));
        before - self.submitting.len() - self.processing.len()
    }

    pub fn is_processing(&self, id: InteractionId) -> bool {
        self.submitting.contains(&id) || self.processing.contains(&id)
    }
}
