use async_trait::async_trait;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Last-resort provider: never fails, never calls out over the network.
/// Installed as the final slot in a `ProviderRouter` so a turn always
/// completes — with a visibly synthetic answer — rather than hanging or
/// erroring when every real backend is down.
pub struct FallbackEchoProvider;

#[async_trait]
impl LlmProvider for FallbackEchoProvider {
    fn name(&self) -> &str {
        "fallback-echo"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, ctxtree_core::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let content = format!(
            "[fallback-echo] no LM backend is currently available. You said: {last_user}"
        );

        Ok(ChatResponse {
            content,
            model: "fallback-echo".to_string(),
            tokens_in: 0,
            tokens_out: 0,
            stop_reason: "fallback".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtree_core::Role;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let provider = FallbackEchoProvider;
        let req = ChatRequest {
            model: "irrelevant".to_string(),
            system: String::new(),
            messages: vec![crate::provider::Message {
                role: Role::User,
                content: "ping".to_string(),
            }],
            max_tokens: 16,
        };
        let resp = provider.send(&req).await.unwrap();
        assert!(resp.content.contains("ping"));
        assert_eq!(resp.model, "fallback-echo");
    }
}
