//! Rolling summarizer — folds a node's oldest turns into a running
//! synopsis on a fixed cadence, so evicted turns are not simply lost from
//! the prompt before the archive can be consulted.
//!
//! Grounded on `compact_session_if_needed`'s shape (cheap-model call,
//! swallow-and-warn on failure, fire-and-forget from the orchestrator)
//! but repurposed: that function extracts discrete facts and deletes the
//! source turns, where this one merges a synopsis and leaves buffer
//! eviction to [`crate::buffer::MessageBuffer`] itself.

use ctxtree_core::Role;
use ctxtree_llm::{ChatRequest, LlmProvider, Message};
use tracing::warn;

use crate::buffer::BufferMessage;

/// How many of the buffer's oldest turns are folded into the summary on
/// each cycle.
pub const SUMMARY_BATCH: usize = 5;

/// Pure trigger-cadence check — starting from empty, summarization fires
/// at `messages_processed` values `{start_threshold, start_threshold +
/// interval, start_threshold + 2*interval, ...}`, and only then, and only
/// if at least `SUMMARY_BATCH` turns have accumulated since the last run.
pub fn should_summarize(
    messages_processed: u64,
    start_threshold: u64,
    interval: u64,
    turns_since_last: u64,
) -> bool {
    messages_processed >= start_threshold
        && (messages_processed - start_threshold) % interval == 0
        && turns_since_last >= SUMMARY_BATCH as u64
}

/// Merge `existing` with the oldest turns via an LM call. Returns `None`
/// on any LM failure — the caller leaves the prior summary untouched and
/// the user-visible turn continues uninterrupted.
pub async fn summarize(
    existing: &str,
    oldest: &[BufferMessage],
    lm: &dyn LlmProvider,
    model: &str,
) -> Option<String> {
    if oldest.is_empty() {
        return None;
    }

    let transcript: String = oldest
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let system = concat!(
        "You maintain a running synopsis of an ongoing conversation. ",
        "You are given the existing synopsis (may be empty) and a batch of ",
        "the oldest turns about to leave the active context window. ",
        "Merge the batch into the synopsis: keep it concise, preserve facts ",
        "and decisions that later turns may depend on, drop small talk and ",
        "resolved tangents. Return ONLY the updated synopsis text, no preamble."
    );

    let user_content = format!(
        "EXISTING SYNOPSIS:\n{}\n\nOLDEST TURNS TO FOLD IN:\n{}",
        if existing.is_empty() { "(none yet)" } else { existing },
        transcript
    );

    let req = ChatRequest {
        model: model.to_string(),
        system: system.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: user_content,
        }],
        max_tokens: 512,
    };

    match lm.send(&req).await {
        Ok(resp) => {
            let text = resp.content.trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Err(e) => {
            warn!(error = %e, "summarizer: LM call failed, leaving summary unchanged");
            None
        }
    }
}
