//! Per-node message buffer — a bounded FIFO window of recent turns.
//!
//! Every tree node owns exactly one of these. It is the only thing a
//! caller reads when assembling a prompt for that node without touching
//! the archive, and it is what gets snapshotted into the context-window
//! retrieval cutoff (`oldest_timestamp`).

use std::collections::VecDeque;

use ctxtree_core::{Role, Timestamp};

use crate::error::{BufferError, Result};

/// A single turn held in a node's buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
}

impl BufferMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }
}

/// Bounded, append-only-from-the-caller's-perspective FIFO buffer.
///
/// Oldest messages are evicted once `max_turns` is exceeded; eviction does
/// not delete information, it only drops it from the live buffer — the
/// rolling summarizer has already folded evicted content into the node's
/// summary by the time an eviction happens (see [`crate::summarizer`]).
#[derive(Debug, Clone)]
pub struct MessageBuffer {
    messages: VecDeque<BufferMessage>,
    max_turns: usize,
    /// Total number of messages ever pushed, including ones since evicted.
    /// Drives the summarizer's trigger cadence — it must not reset on
    /// eviction or the interval check would never advance past the window.
    messages_processed: u64,
    /// Running synopsis of this node's oldest turns. Overwritten in place
    /// on each summarization cycle; prior summaries are not retained.
    summary: String,
}

impl MessageBuffer {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_turns,
            messages_processed: 0,
            summary: String::new(),
        }
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn replace_summary(&mut self, summary: String) {
        self.summary = summary;
    }

    /// Append a message, evicting the oldest if the buffer is now over
    /// capacity. Returns the evicted message, if any.
    pub fn push(&mut self, message: BufferMessage) -> Option<BufferMessage> {
        self.messages.push_back(message);
        self.messages_processed += 1;
        if self.messages.len() > self.max_turns {
            self.messages.pop_front()
        } else {
            None
        }
    }

    /// Append with validation — rejects empty text. Returns the evicted
    /// turn, if the buffer was already at capacity.
    pub fn append(&mut self, role: Role, text: String, timestamp: Timestamp) -> Result<Option<BufferMessage>> {
        if text.is_empty() {
            return Err(BufferError::EmptyText);
        }
        Ok(self.push(BufferMessage::new(role, text, timestamp)))
    }

    /// Total messages ever pushed — monotonically increasing, never
    /// decremented by eviction or `clear`.
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferMessage> {
        self.messages.iter()
    }

    /// Snapshot the current buffer contents, oldest first.
    pub fn snapshot(&self) -> Vec<BufferMessage> {
        self.messages.iter().cloned().collect()
    }

    /// The `n` oldest messages currently in the buffer, oldest first.
    pub fn oldest(&self, n: usize) -> Vec<BufferMessage> {
        self.messages.iter().take(n).cloned().collect()
    }

    /// Timestamp of the oldest message currently held, or
    /// [`Timestamp::INFINITE`] when the buffer is empty — the retrieval
    /// cutoff semantics treat an empty buffer as "everything is eligible",
    /// not "nothing is eligible".
    pub fn oldest_timestamp(&self) -> Timestamp {
        self.messages
            .front()
            .map(|m| m.timestamp)
            .unwrap_or(Timestamp::INFINITE)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, ts: f64) -> BufferMessage {
        BufferMessage::new(Role::User, content, Timestamp(ts))
    }

    #[test]
    fn push_evicts_oldest_past_capacity() {
        let mut buf = MessageBuffer::new(2);
        assert!(buf.push(msg("a", 1.0)).is_none());
        assert!(buf.push(msg("b", 2.0)).is_none());
        let evicted = buf.push(msg("c", 3.0));
        assert_eq!(evicted.unwrap().content, "a");
        let contents: Vec<_> = buf.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn messages_processed_survives_eviction() {
        let mut buf = MessageBuffer::new(2);
        for i in 0..5 {
            buf.push(msg(&format!("m{i}"), i as f64));
        }
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.messages_processed(), 5);
    }

    #[test]
    fn oldest_timestamp_is_infinite_when_empty() {
        let buf = MessageBuffer::new(4);
        assert_eq!(buf.oldest_timestamp(), Timestamp::INFINITE);
    }

    #[test]
    fn oldest_timestamp_tracks_front_of_queue() {
        let mut buf = MessageBuffer::new(4);
        buf.push(msg("a", 10.0));
        buf.push(msg("b", 20.0));
        assert_eq!(buf.oldest_timestamp(), Timestamp(10.0));
    }

    #[test]
    fn append_rejects_empty_text() {
        let mut buf = MessageBuffer::new(4);
        let err = buf.append(Role::User, String::new(), Timestamp(1.0)).unwrap_err();
        assert!(matches!(err, crate::error::BufferError::EmptyText));
    }

    #[test]
    fn replace_summary_overwrites_in_place() {
        let mut buf = MessageBuffer::new(4);
        assert_eq!(buf.summary(), "");
        buf.replace_summary("user likes rust".to_string());
        assert_eq!(buf.summary(), "user likes rust");
        buf.replace_summary("updated".to_string());
        assert_eq!(buf.summary(), "updated");
    }
}
