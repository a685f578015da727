//! # Transcript Accumulation
//!
//! Collects the partial input/output transcription deltas streamed by the
//! live model during a conversational turn and flushes them into immutable
//! transcript items when the turn completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The human speaking into the microphone
    User,
    /// The synthesized voice persona
    Assistant,
}

/// One finished line of the conversation log. Immutable once flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionItem {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Accumulated input/output text for the current turn.
///
/// The live model streams transcription deltas for both directions
/// interleaved; this buffer keeps them separated until a turn-complete signal
/// flushes both, then resets to empty for the next turn.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    input: String,
    output: String,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a partial transcription of the user's speech.
    pub fn push_input(&mut self, delta: &str) {
        self.input.push_str(delta);
    }

    /// Append a partial transcription of the assistant's speech.
    pub fn push_output(&mut self, delta: &str) {
        self.output.push_str(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    /// Flush both buffers into transcript items and reset.
    ///
    /// Emits the user's line before the assistant's; an empty buffer produces
    /// no item, so a turn with only output text yields exactly one item and a
    /// turn with neither yields none.
    pub fn flush(&mut self, timestamp: DateTime<Utc>) -> Vec<TranscriptionItem> {
        let mut items = Vec::with_capacity(2);

        if !self.input.is_empty() {
            items.push(TranscriptionItem {
                sender: Sender::User,
                text: std::mem::take(&mut self.input),
                timestamp,
            });
        }

        if !self.output.is_empty() {
            items.push(TranscriptionItem {
                sender: Sender::Assistant,
                text: std::mem::take(&mut self.output),
                timestamp,
            });
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_emits_input_then_output() {
        let mut turn = TurnAccumulator::new();
        turn.push_output("Hi ");
        turn.push_input("Hello");
        turn.push_output("there");

        let items = turn.flush(Utc::now());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].sender, Sender::User);
        assert_eq!(items[0].text, "Hello");
        assert_eq!(items[1].sender, Sender::Assistant);
        assert_eq!(items[1].text, "Hi there");
    }

    #[test]
    fn test_flush_skips_empty_input() {
        let mut turn = TurnAccumulator::new();
        turn.push_output("Only the assistant spoke");

        let items = turn.flush(Utc::now());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sender, Sender::Assistant);
    }

    #[test]
    fn test_flush_with_both_empty_emits_nothing() {
        let mut turn = TurnAccumulator::new();
        assert!(turn.flush(Utc::now()).is_empty());
    }

    #[test]
    fn test_flush_resets_for_next_turn() {
        let mut turn = TurnAccumulator::new();
        turn.push_input("first turn");
        assert_eq!(turn.flush(Utc::now()).len(), 1);
        assert!(turn.is_empty());

        turn.push_input("second");
        turn.push_output("turn");
        let items = turn.flush(Utc::now());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "second");
        assert_eq!(items[1].text, "turn");
    }
}
