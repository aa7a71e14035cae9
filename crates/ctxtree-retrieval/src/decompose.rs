//! Query Decomposer (C6) — classifies a user query's intent and expands
//! it into 5–7 paraphrased sub-queries for multi-query retrieval.
//!
//! Grounded on `compact_session_if_needed`'s pattern of a small fixed-
//! prompt LM call followed by best-effort JSON extraction, but the two
//! steps here (classify, then expand) never delete anything and never
//! raise — a failure at either step degrades to a fixed fallback instead
//! of aborting the turn.

use ctxtree_core::Role;
use ctxtree_llm::{ChatRequest, LlmProvider, Message};
use tracing::warn;

/// One of the five fixed intent buckets the classifier may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Identity,
    Preference,
    Discussion,
    Factual,
    General,
}

impl Intent {
    fn as_str(&self) -> &'static str {
        match self {
            Intent::Identity => "identity",
            Intent::Preference => "preference",
            Intent::Discussion => "discussion",
            Intent::Factual => "factual",
            Intent::General => "general",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "identity" => Some(Intent::Identity),
            "preference" => Some(Intent::Preference),
            "discussion" => Some(Intent::Discussion),
            "factual" => Some(Intent::Factual),
            "general" => Some(Intent::General),
            _ => None,
        }
    }

    /// Intent-specific guidance folded into the expansion prompt, e.g.
    /// `identity` nudges the LM toward "my name is" / "I am a" paraphrases.
    fn expansion_hint(&self) -> &'static str {
        match self {
            Intent::Identity => {
                "The user is asking about who they are. Favor paraphrases like \
                 \"my name is\", \"I am a\", \"about myself\"."
            }
            Intent::Preference => {
                "The user is asking about something they like, dislike, or prefer. \
                 Favor paraphrases around stated likes, dislikes, and choices."
            }
            Intent::Discussion => {
                "The user is referring back to something discussed earlier. \
                 Favor paraphrases that restate the topic in different words."
            }
            Intent::Factual => {
                "The user is asking about a concrete fact stated earlier. \
                 Favor paraphrases that restate the fact as a question and as a statement."
            }
            Intent::General => {
                "Favor direct paraphrases of the query that vary wording but keep meaning."
            }
        }
    }
}

const MIN_SUBQUERIES: usize = 5;
const MAX_SUBQUERIES: usize = 7;

/// Classify a raw user query's intent. Falls back to [`Intent::General`]
/// on any LM failure or unparseable response — never raises.
pub async fn classify_intent(query: &str, lm: &dyn LlmProvider, model: &str) -> Intent {
    let system = concat!(
        "Classify the user's query into exactly one of: identity, preference, ",
        "discussion, factual, general. Reply with ONLY the single lowercase word, ",
        "nothing else."
    );

    let req = ChatRequest {
        model: model.to_string(),
        system: system.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: query.to_string(),
        }],
        max_tokens: 8,
    };

    match lm.send(&req).await {
        Ok(resp) => Intent::parse(&resp.content).unwrap_or_else(|| {
            warn!(raw = %resp.content, "decomposer: unparseable intent, defaulting to general");
            Intent::General
        }),
        Err(e) => {
            warn!(error = %e, "decomposer: intent classification failed, defaulting to general");
            Intent::General
        }
    }
}

/// Expand `query` into 5–7 deduplicated paraphrased sub-queries given its
/// classified `intent`. The original query always appears in the result.
/// On any LM failure or malformed response, falls back to `[query]` alone.
pub async fn decompose(
    query: &str,
    intent: Intent,
    lm: &dyn LlmProvider,
    model: &str,
) -> Vec<String> {
    let system = format!(
        "You expand a user query into {MIN_SUBQUERIES}-{MAX_SUBQUERIES} short paraphrased \
         sub-queries for a semantic search index. {hint} The original query MUST be included \
         verbatim as one of the sub-queries. Return ONLY a JSON array of strings, nothing else.",
        hint = intent.expansion_hint(),
    );

    let req = ChatRequest {
        model: model.to_string(),
        system,
        messages: vec![Message {
            role: Role::User,
            content: query.to_string(),
        }],
        max_tokens: 512,
    };

    let response = match lm.send(&req).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "decomposer: sub-query expansion failed, falling back to original query");
            return vec![query.to_string()];
        }
    };

    let raw = response.content.trim();
    let json_str = match (raw.find('['), raw.rfind(']')) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw,
    };

    let candidates: Vec<String> = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, raw = %json_str, "decomposer: sub-query JSON parse failed, falling back to original query");
            return vec![query.to_string()];
        }
    };

    dedup_with_original(query, candidates)
}

/// Case-insensitive dedup, guaranteeing the original query is present,
/// capped at [`MAX_SUBQUERIES`].
fn dedup_with_original(query: &str, candidates: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    let mut push = |s: String, seen: &mut std::collections::HashSet<String>, out: &mut Vec<String>| {
        let key = s.trim().to_lowercase();
        if key.is_empty() || seen.contains(&key) {
            return;
        }
        seen.insert(key);
        out.push(s);
    };

    push(query.to_string(), &mut seen, &mut out);
    for c in candidates {
        if out.len() >= MAX_SUBQUERIES {
            break;
        }
        push(c, &mut seen, &mut out);
    }

    if out.is_empty() {
        out.push(query.to_string());
    }

    out
}
