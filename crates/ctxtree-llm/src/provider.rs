use async_trait::async_trait;
use ctxtree_core::Role;
use tokio::sync::mpsc;

use crate::stream::StreamEvent;

/// A single message in the conversation history handed to an LM provider.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Request to an LM provider. Deliberately narrow — this system treats the
/// LM as an abstract completion/streaming service, so there is no
/// tool-calling or multimodal surface here.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

/// Response from an LM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Common interface for all LM providers. The dynamic-dispatch surface
/// the design notes ask for: a narrow capability set, implemented by
/// distinct variants (primary, fallback-echo, local, remote) with no
/// reflection or runtime monkey-patching.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming chat request, wait for full response.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response events through a channel.
    /// Default: falls back to non-streaming send, emits TextDelta + Done.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let resp = self.send(req).await?;
        let _ = tx.send(StreamEvent::TextDelta { text: resp.content }).await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model,
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Every configured slot in the router was tried and exhausted. Not
    /// transient from the orchestrator's point of view — an internal
    /// retry-once would just hit the same empty pool, so this is surfaced
    /// to the caller as a 503 with a retry hint instead.
    #[error("provider pool exhausted, retry after {retry_after_ms}ms")]
    PoolExhausted { retry_after_ms: u64 },
}

impl ProviderError {
    /// Transient errors are worth one retry by the orchestrator; permanent
    /// errors (auth, unknown model, malformed request) are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Http(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Unavailable(_)
                | ProviderError::Timeout { .. }
        )
    }
}
