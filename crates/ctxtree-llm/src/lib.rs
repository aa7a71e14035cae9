pub mod anthropic;
pub mod anthropic_stream;
pub mod fallback_echo;
pub mod ollama;
pub mod provider;
pub mod router;
pub mod stream;

pub use anthropic::AnthropicProvider;
pub use fallback_echo::FallbackEchoProvider;
pub use ollama::OllamaProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError};
pub use router::{ProviderRouter, ProviderSlot};
pub use stream::StreamEvent;
