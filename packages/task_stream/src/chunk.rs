//! Chunk application policy.
//!
//! A `response_chunk` carries the full current snapshot of a response unit,
//! not a delta. Applying one replaces the rendered text. The server is known
//! to resend identical chunks, so a chunk byte-equal to the previously
//! applied one is dropped, as is any empty or whitespace-only chunk.
//! Comparison is plain string equality: two different chunks that happen to
//! render the same are both applied.

/// Snapshot text plus the last chunk applied to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkAccumulator {
    text: String,
    last_chunk: Option<String>,
}

/// Result of [`ChunkAccumulator::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub next: ChunkAccumulator,
    pub should_render: bool,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a snapshot that is already on screen (reload resume).
    /// The seed counts as the last applied chunk.
    pub fn seeded(text: impl Into<String>) -> Self {
        let text = text.into();
        let last_chunk = if text.trim().is_empty() {
            None
        } else {
            Some(text.clone())
        };
        Self { text, last_chunk }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn last_chunk(&self) -> Option<&str> {
        self.last_chunk.as_deref()
    }

    /// Pure form: compute the next state without touching `self`.
    pub fn apply(&self, incoming: &str) -> Applied {
        if !accepts(self.last_chunk.as_deref(), incoming) {
            return Applied {
                next: self.clone(),
                should_render: false,
            };
        }
        Applied {
            next: Self {
                text: incoming.to_string(),
                last_chunk: Some(incoming.to_string()),
            },
            should_render: true,
        }
    }

    /// In-place form of [`apply`](Self::apply). Returns whether to render.
    pub fn push(&mut self, incoming: &str) -> bool {
        if !accepts(self.last_chunk.as_deref(), incoming) {
            return false;
        }
        self.text.clear();
        self.text.push_str(incoming);
        self.last_chunk = Some(incoming.to_string());
        true
    }
}

fn accepts(last_chunk: Option<&str>, incoming: &str) -> bool {
    if incoming.trim().is_empty() {
        return false;
    }
    last_chunk != Some(incoming)
}
