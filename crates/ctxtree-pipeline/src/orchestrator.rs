//! Chat Orchestrator (C9) — the per-turn control flow tying the tree,
//! buffer, archive, retrieval, and LM together.
//!
//! Drives an LM stream and fans deltas out to callers the way a
//! long-lived chat runtime does, but shares no raw pointers across the
//! spawned streaming task: the orchestrator clones owned
//! `Arc<Node>`/`Arc<VectorArchive>` handles into the task instead, so
//! nothing here is `unsafe`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ctxtree_archive::{ArchiveRecord, EmbeddingModel, VectorArchive};
use ctxtree_core::{NodeId, Role, Timestamp};
use ctxtree_llm::{ChatRequest, LlmProvider, Message, ProviderError, StreamEvent};
use ctxtree_retrieval::{classify_intent, decompose, retrieve};
use ctxtree_tree::{Forest, Node};

use crate::assembler::assemble;
use crate::error::{PipelineError, Result};

/// Per-turn knobs the caller (the gateway) resolves from config and
/// request flags before invoking the orchestrator.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub model_primary: String,
    pub model_decomposition: String,
    pub retrieval_enabled: bool,
    pub retrieval_top_k_per_subquery: usize,
    pub retrieval_top_k: usize,
    pub retrieval_window_seconds: f64,
    pub max_tokens: u32,
    pub summarization_start_threshold: u64,
    pub summarization_interval: u64,
}

/// Frame shape handed to the caller's SSE/non-streaming response layer —
/// one of four wire frame types, one JSON object per SSE `data:` line.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnEvent {
    Token { content: String },
    Title { content: String },
    Done,
    Error { content: String },
}

/// Metrics surfaced to logs/tests — never persisted.
#[derive(Debug, Clone, Default)]
pub struct TurnMetrics {
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub retrieval_ran: bool,
    pub retrieved_count: usize,
}

pub struct Orchestrator {
    forest: Arc<Forest>,
    archive: Arc<VectorArchive>,
    embedder: Arc<dyn EmbeddingModel>,
    lm: Arc<dyn LlmProvider>,
}

impl Orchestrator {
    pub fn new(
        forest: Arc<Forest>,
        archive: Arc<VectorArchive>,
        embedder: Arc<dyn EmbeddingModel>,
        lm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            forest,
            archive,
            embedder,
            lm,
        }
    }

    /// Resolve `node_id`, run retrieval if enabled, assemble the prompt,
    /// and stream the LM response back through `events`. Returns once the
    /// turn is fully settled (either `Done`/`Error` was sent, or the
    /// caller's `cancel` token fired).
    pub async fn run_turn(
        &self,
        node_id: &NodeId,
        user_text: &str,
        config: &TurnConfig,
        events: mpsc::Sender<TurnEvent>,
        cancel: CancellationToken,
    ) -> Result<TurnMetrics> {
        if user_text.is_empty() {
            return Err(PipelineError::BadInput("message must not be empty".to_string()));
        }

        let node = self
            .forest
            .get(node_id)
            .map_err(|_| PipelineError::NodeNotFound(node_id.to_string()))?;

        // Step 2: append + best-effort index the user turn. The cadence
        // check runs after this append too, not just after the assistant
        // append below — every successful turn advances
        // `messages_processed` by two, so checking only once per
        // round-trip would permanently skip the odd multiples of
        // `interval` (e.g. 15, 25, 35 with the defaults).
        self.append_and_index(&node, Role::User, user_text.to_string()).await?;
        self.maybe_summarize(&node, config).await;

        // Retrieval (C6 + C7), only if enabled for this call.
        let (retrieved, metrics_retrieval_ran, retrieved_count) = if config.retrieval_enabled {
            let records = self.run_retrieval(&node, user_text, config).await;
            let count = records.len();
            (Some(records), true, count)
        } else {
            (None, false, 0)
        };

        // Step 3: assemble the prompt from a buffer snapshot taken and
        // released before any LM call — the per-node mutex never spans
        // a suspension point.
        let prompt = assemble(&node, retrieved.as_deref(), user_text);

        let request = ChatRequest {
            model: config.model_primary.clone(),
            system: prompt.system,
            messages: prompt.messages,
            max_tokens: config.max_tokens,
        };

        let mut metrics = TurnMetrics {
            retrieval_ran: metrics_retrieval_ran,
            retrieved_count,
            ..Default::default()
        };

        // Step 4-7: stream the response, retrying once on a transient
        // failure.
        let outcome = self.stream_with_retry(&request, &events, &cancel).await;

        match outcome {
            StreamOutcome::Cancelled => {
                info!(node_id = %node_id, "turn cancelled mid-stream, discarding partial assistant text");
                return Ok(metrics);
            }
            StreamOutcome::Failed(e) => {
                warn!(node_id = %node_id, error = %e, "turn failed, user turn retained for retry");
                return if matches!(e, ProviderError::PoolExhausted { .. }) {
                    Err(PipelineError::LmUnavailable(e.to_string()))
                } else {
                    Err(PipelineError::LmFailed(e.to_string()))
                };
            }
            StreamOutcome::Completed {
                text,
                tokens_in,
                tokens_out,
            } => {
                metrics.tokens_in = tokens_in;
                metrics.tokens_out = tokens_out;

                // Step 5: append + index the assistant turn, maybe summarize,
                // maybe generate a title.
                self.append_and_index(&node, Role::Assistant, text).await?;
                self.maybe_summarize(&node, config).await;
                self.maybe_title(&node, config, &events).await;

                let _ = events.send(TurnEvent::Done).await;
                Ok(metrics)
            }
        }
    }

    async fn append_and_index(&self, node: &Node, role: Role, text: String) -> Result<()> {
        let timestamp = Timestamp::now();
        let title = node.title();

        let appended = node.with_buffer(|b| b.append(role, text.clone(), timestamp))?;
        let _ = appended; // eviction return value is not needed by the orchestrator itself.

        let embedding = match self.embedder.embed(&text).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, node_id = %node.id, "orchestrator: embedding failed, skipping archive index");
                return Ok(());
            }
        };

        self.archive
            .index(ArchiveRecord {
                record_id: ctxtree_core::RecordId::new(),
                node_id: node.id.clone(),
                role,
                text,
                timestamp,
                node_title_at_index_time: title,
                embedding,
            })
            .await;

        Ok(())
    }

    async fn run_retrieval(
        &self,
        node: &Node,
        user_text: &str,
        config: &TurnConfig,
    ) -> Vec<ArchiveRecord> {
        let intent = classify_intent(user_text, self.lm.as_ref(), &config.model_decomposition).await;
        let sub_queries = decompose(user_text, intent, self.lm.as_ref(), &config.model_decomposition).await;
        let cutoff = node.with_buffer(|b| b.oldest_timestamp());

        retrieve(
            &sub_queries,
            &node.id,
            cutoff,
            self.archive.as_ref(),
            self.embedder.as_ref(),
            config.retrieval_top_k_per_subquery,
            config.retrieval_top_k,
            config.retrieval_window_seconds,
        )
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, node_id = %node.id, "orchestrator: retrieval failed, proceeding without it");
            Vec::new()
        })
    }

    async fn stream_with_retry(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let first = self.stream_once(request, events, cancel).await;
        match first {
            StreamOutcome::Failed(e) if e.is_transient() => {
                warn!(error = %e, "turn: transient LM error, retrying once");
                tokio::time::sleep(Duration::from_millis(250)).await;
                self.stream_once(request, events, cancel).await
            }
            other => other,
        }
    }

    async fn stream_once(
        &self,
        request: &ChatRequest,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(32);
        let lm = self.lm.clone();
        let req = request.clone();
        let send_task = tokio::spawn(async move { lm.send_stream(&req, tx).await });

        let mut text = String::new();
        let mut tokens_in = 0u32;
        let mut tokens_out = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    send_task.abort();
                    return StreamOutcome::Cancelled;
                }
                event = rx.recv() => {
                    match event {
                        Some(StreamEvent::TextDelta { text: delta }) => {
                            text.push_str(&delta);
                            let _ = events.send(TurnEvent::Token { content: delta }).await;
                        }
                        Some(StreamEvent::Done { tokens_in: ti, tokens_out: to, .. }) => {
                            tokens_in = ti;
                            tokens_out = to;
                        }
                        Some(StreamEvent::Error { message }) => {
                            return StreamOutcome::Failed(ProviderError::Unavailable(message));
                        }
                        None => break,
                    }
                }
            }
        }

        match send_task.await {
            Ok(Ok(())) => StreamOutcome::Completed { text, tokens_in, tokens_out },
            Ok(Err(e)) => StreamOutcome::Failed(e),
            Err(_join_err) => StreamOutcome::Cancelled,
        }
    }

    async fn maybe_summarize(&self, node: &Node, config: &TurnConfig) {
        // `should_summarize` is called once per completed turn, so the
        // batch has always fully refilled by the time the cadence modulo
        // lines up again — `turns_since_last` is the fixed batch size.
        let (should, oldest) = node.with_buffer(|b| {
            let should = ctxtree_buffer::should_summarize(
                b.messages_processed(),
                config.summarization_start_threshold,
                config.summarization_interval,
                ctxtree_buffer::SUMMARY_BATCH as u64,
            );
            (should, b.oldest(ctxtree_buffer::SUMMARY_BATCH))
        });

        if !should {
            return;
        }

        let existing = node.with_buffer(|b| b.summary().to_string());
        if let Some(merged) =
            ctxtree_buffer::summarize(&existing, &oldest, self.lm.as_ref(), &config.model_decomposition).await
        {
            node.with_buffer(|b| b.replace_summary(merged));
        }
    }

    async fn maybe_title(&self, node: &Node, config: &TurnConfig, events: &mpsc::Sender<TurnEvent>) {
        let is_default_title = node.title() == crate::DEFAULT_NODE_TITLE;
        let first_completed_turn = node.with_buffer(|b| b.messages_processed() == 2);

        if !(is_default_title && first_completed_turn) {
            return;
        }

        let transcript = node.with_buffer(|b| {
            b.iter()
                .map(|m| format!("{}: {}", m.role.as_str(), m.content))
                .collect::<Vec<_>>()
                .join("\n")
        });

        let req = ChatRequest {
            model: config.model_decomposition.clone(),
            system: "Produce a short (≤6 word) title for this conversation. \
                     Return ONLY the title text, no quotes, no punctuation at the end."
                .to_string(),
            messages: vec![Message {
                role: Role::User,
                content: transcript,
            }],
            max_tokens: 16,
        };

        match self.lm.send(&req).await {
            Ok(resp) => {
                let title = resp.content.trim().to_string();
                if !title.is_empty() {
                    node.rename(title.clone());
                    let _ = events.send(TurnEvent::Title { content: title }).await;
                }
            }
            Err(e) => {
                warn!(error = %e, node_id = %node.id, "orchestrator: title generation failed, keeping default title");
            }
        }
    }
}

enum StreamOutcome {
    Completed {
        text: String,
        tokens_in: u32,
        tokens_out: u32,
    },
    Failed(ProviderError),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ctxtree_archive::HashEmbedModel;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &ChatRequest) -> std::result::Result<ctxtree_llm::ChatResponse, ProviderError> {
            Ok(ctxtree_llm::ChatResponse {
                content: format!("echo: {}", req.messages.last().map(|m| m.content.clone()).unwrap_or_default()),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
            })
        }
    }

    fn test_config() -> TurnConfig {
        TurnConfig {
            model_primary: "test-model".to_string(),
            model_decomposition: "test-model-small".to_string(),
            retrieval_enabled: false,
            retrieval_top_k_per_subquery: 5,
            retrieval_top_k: 5,
            retrieval_window_seconds: 60.0,
            max_tokens: 256,
            summarization_start_threshold: 15,
            summarization_interval: 5,
        }
    }

    #[tokio::test]
    async fn run_turn_appends_user_and_assistant_and_sends_done() {
        let forest = Arc::new(Forest::new(15));
        let root = forest.create_root("root".to_string());
        let db_dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(
            VectorArchive::open(db_dir.path().to_str().unwrap(), 8)
                .await
                .expect("test archive open is expected to succeed with an embedded backend"),
        );
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedModel::new(8));
        let lm: Arc<dyn LlmProvider> = Arc::new(EchoProvider);

        let orchestrator = Orchestrator::new(forest.clone(), archive, embedder, lm);
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        orchestrator
            .run_turn(&root.id, "hello there", &test_config(), tx, cancel)
            .await
            .unwrap();

        let mut saw_done = false;
        while let Some(ev) = rx.recv().await {
            if matches!(ev, TurnEvent::Done) {
                saw_done = true;
            }
        }
        assert!(saw_done);

        let snapshot = root.with_buffer(|b| b.snapshot());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].content, "hello there");
        assert_eq!(snapshot[1].content, "echo: hello there");
    }

    #[tokio::test]
    async fn run_turn_rejects_empty_message() {
        let forest = Arc::new(Forest::new(15));
        let root = forest.create_root("root".to_string());
        let db_dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(
            VectorArchive::open(db_dir.path().to_str().unwrap(), 8)
                .await
                .unwrap(),
        );
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedModel::new(8));
        let lm: Arc<dyn LlmProvider> = Arc::new(EchoProvider);
        let orchestrator = Orchestrator::new(forest, archive, embedder, lm);
        let (tx, _rx) = mpsc::channel(8);

        let err = orchestrator
            .run_turn(&root.id, "", &test_config(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BadInput(_)));
    }

    struct AlwaysFail;

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ctxtree_llm::ChatResponse, ProviderError> {
            Err(ProviderError::Api {
                status: 401,
                message: "bad api key".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn run_turn_propagates_permanent_lm_failure_as_err() {
        let forest = Arc::new(Forest::new(15));
        let root = forest.create_root("root".to_string());
        let db_dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(
            VectorArchive::open(db_dir.path().to_str().unwrap(), 8)
                .await
                .unwrap(),
        );
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedModel::new(8));
        let lm: Arc<dyn LlmProvider> = Arc::new(AlwaysFail);
        let orchestrator = Orchestrator::new(forest, archive, embedder, lm);
        let (tx, _rx) = mpsc::channel(8);

        let err = orchestrator
            .run_turn(&root.id, "hello", &test_config(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LmFailed(_)));
    }

    #[tokio::test]
    async fn run_turn_propagates_pool_exhaustion_as_lm_unavailable() {
        let forest = Arc::new(Forest::new(15));
        let root = forest.create_root("root".to_string());
        let db_dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(
            VectorArchive::open(db_dir.path().to_str().unwrap(), 8)
                .await
                .unwrap(),
        );
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedModel::new(8));
        let router = ctxtree_llm::ProviderRouter::new(vec![ctxtree_llm::ProviderSlot::new(
            Box::new(AlwaysFail),
            0,
        )]);
        let lm: Arc<dyn LlmProvider> = Arc::new(router);
        let orchestrator = Orchestrator::new(forest, archive, embedder, lm);
        let (tx, _rx) = mpsc::channel(8);

        let err = orchestrator
            .run_turn(&root.id, "hello", &test_config(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LmUnavailable(_)));
    }

    /// Regression test for the cadence bug: `maybe_summarize` must run
    /// after every buffer append, not only once per round-trip, or every
    /// odd multiple of `summarization_interval` (15, 25, 35 with the
    /// defaults) is permanently skipped. With `start_threshold: 15,
    /// interval: 5`, eight full turns (16 appends: user/assistant pairs)
    /// cross `messages_processed == 15` on the 8th turn's *user* append —
    /// an odd count the old once-per-round-trip check never reached.
    #[tokio::test]
    async fn summary_builds_on_the_15th_append_not_just_even_counts() {
        let forest = Arc::new(Forest::new(15));
        let root = forest.create_root("root".to_string());
        let db_dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(
            VectorArchive::open(db_dir.path().to_str().unwrap(), 8)
                .await
                .unwrap(),
        );
        let embedder: Arc<dyn EmbeddingModel> = Arc::new(HashEmbedModel::new(8));
        let lm: Arc<dyn LlmProvider> = Arc::new(EchoProvider);
        let orchestrator = Orchestrator::new(forest.clone(), archive, embedder, lm);

        for i in 0..8 {
            let (tx, mut rx) = mpsc::channel(32);
            orchestrator
                .run_turn(&root.id, &format!("turn {i}"), &test_config(), tx, CancellationToken::new())
                .await
                .unwrap();
            while rx.recv().await.is_some() {}
        }

        assert_eq!(root.with_buffer(|b| b.messages_processed()), 16);
        let summary = root.with_buffer(|b| b.summary().to_string());
        assert!(
            !summary.is_empty(),
            "summary should already be built by the 15th append (turn 8's user message), not deferred to the 20th"
        );
    }
}
