use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use ctxtree_archive::{EmbeddingModel, FastEmbedModel, HashEmbedModel, VectorArchive, DEFAULT_EMBEDDING_DIM};
use ctxtree_core::config::CtxtreeConfig;
use ctxtree_llm::{AnthropicProvider, FallbackEchoProvider, LlmProvider, OllamaProvider, ProviderRouter, ProviderSlot};
use ctxtree_tree::Forest;

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctxtree_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("CTXTREE_CONFIG").ok();
    let config = CtxtreeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        CtxtreeConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    let forest = Arc::new(Forest::new(config.buffer.max_turns));

    let archive = Arc::new(
        VectorArchive::open(&config.archive.path, DEFAULT_EMBEDDING_DIM)
            .await
            .expect("vector archive must open at startup — a broken archive_path is a fatal misconfiguration"),
    );

    let embedder: Arc<dyn EmbeddingModel> = match FastEmbedModel::new(&config.providers.embedding_model) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            warn!(error = %e, "embedding model failed to load, falling back to the deterministic hash embedder");
            Arc::new(HashEmbedModel::new(DEFAULT_EMBEDDING_DIM))
        }
    };

    let lm: Arc<dyn LlmProvider> = Arc::new(build_provider_router(&config));

    let state = Arc::new(app::AppState::new(config, forest, archive, embedder, lm));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "ctxtree gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Provider variants: primary (Anthropic), local (Ollama, if configured).
/// The "remote" variant from the design notes is realized by pointing a
/// second named `AnthropicProvider` at a different base URL when needed —
/// not wired here since no second remote endpoint is configured by
/// default.
///
/// `FallbackEchoProvider` is only installed when no real provider is
/// configured at all — it keeps a from-scratch deployment usable before
/// any API key is set, but it must never sit behind a configured
/// provider: it never fails, so a real permanent/pool-exhaustion error
/// from Anthropic or Ollama would never reach the caller.
fn build_provider_router(config: &CtxtreeConfig) -> ProviderRouter {
    let mut slots = Vec::new();

    if let Some(anthropic) = &config.providers.anthropic {
        slots.push(ProviderSlot::new(
            Box::new(AnthropicProvider::new(
                anthropic.api_key.clone(),
                Some(anthropic.base_url.clone()),
            )),
            1,
        ));
    }

    if let Some(ollama) = &config.providers.ollama {
        slots.push(ProviderSlot::new(
            Box::new(OllamaProvider::new(Some(ollama.base_url.clone()))),
            1,
        ));
    }

    if slots.is_empty() {
        warn!("no LM provider configured, falling back to the echo provider");
        slots.push(ProviderSlot::new(Box::new(FallbackEchoProvider), 0));
    }

    ProviderRouter::new(slots)
}
