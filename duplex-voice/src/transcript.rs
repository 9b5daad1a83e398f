//! Transcript coalescing.
//!
//! The remote peer streams transcriptions as short fragments. Fragments from
//! the same speaker that arrive close together are merged into one entry until
//! the turn completes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Model,
}

/// One line of the running transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    /// Stable id, so consumers can update a line in place.
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    /// Set once the turn that produced this entry completed.
    pub is_final: bool,
    #[serde(skip)]
    pub updated_at: Instant,
}

/// Merges transcript fragments into entries.
#[derive(Debug)]
pub struct TranscriptCoalescer {
    window: Duration,
    entries: Vec<TranscriptEntry>,
    next_id: u64,
}

impl TranscriptCoalescer {
    /// Fragments closer together than `window` are merged.
    pub fn new(window: Duration) -> Self {
        Self { window, entries: Vec::new(), next_id: 1 }
    }

    /// Add a fragment and return the entry it landed in.
    pub fn push(&mut self, speaker: Speaker, fragment: &str, now: Instant) -> TranscriptEntry {
        let window = self.window;
        let open = self.entries.iter_mut().rev().find(|e| e.speaker == speaker).filter(|e| {
            !e.is_final && now.saturating_duration_since(e.updated_at) <= window
        });

        if let Some(entry) = open {
            entry.text.push_str(fragment);
            entry.updated_at = now;
            return entry.clone();
        }

        let entry = TranscriptEntry {
            id: self.next_id,
            speaker,
            text: fragment.to_string(),
            is_final: false,
            updated_at: now,
        };
        self.next_id += 1;
        self.entries.push(entry.clone());
        entry
    }

    /// Mark every open entry final and return them.
    ///
    /// Finalized entries are handed back and no longer kept.
    pub fn finalize(&mut self) -> Vec<TranscriptEntry> {
        let mut closed = std::mem::take(&mut self.entries);
        for entry in closed.iter_mut() {
            entry.is_final = true;
        }
        closed
    }

    /// Entries of the current turn, oldest first.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }
}
